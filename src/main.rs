//! Herald webhook delivery CLI.
//!
//! Builds one delivery engine from configuration, reads newline-delimited
//! JSON events from stdin and triggers each one. On EOF or a shutdown signal
//! the engine drains and the final metrics are logged.

use std::sync::Arc;

use anyhow::{Context, Result};
use herald_core::TracingAuditSink;
use herald_delivery::{DeliveryEngine, InMemoryRegistry};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

mod config;

use config::Config;

/// One line of stdin input.
#[derive(Debug, Deserialize)]
struct InboundEvent {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.log_filter)?;

    info!(
        tenant = %config.tenant,
        concurrency_limit = config.concurrency_limit,
        queue_limit = config.queue_limit,
        webhooks = config.webhooks.len(),
        "Configuration loaded"
    );

    let registry = InMemoryRegistry::with_webhooks(config.webhooks());
    let engine = DeliveryEngine::new(
        config.tenant_id(),
        config.to_engine_config(),
        Arc::new(registry),
        Arc::new(TracingAuditSink::new()),
    )
    .context("Failed to create delivery engine")?;

    info!("Herald is ready, reading events from stdin");

    tokio::select! {
        result = read_events(&engine) => {
            if let Err(e) = result {
                error!(error = %e, "Failed to read events");
            }
            info!("Input closed, starting graceful shutdown");
        }
        () = shutdown_signal() => {
            info!("Shutdown signal received, starting graceful shutdown");
        }
    }

    let report = engine.shutdown(config.shutdown_timeout()).await;
    info!(
        timed_out = report.timed_out,
        discarded = report.discarded,
        cancelled_in_flight = report.cancelled_in_flight,
        elapsed_ms = report.elapsed.as_millis(),
        "Delivery engine stopped"
    );

    match engine.metrics().encode_text() {
        Ok(exposition) => info!(metrics = %exposition, "Final delivery metrics"),
        Err(e) => warn!(error = %e, "Failed to encode metrics"),
    }

    info!("Herald shutdown complete");
    Ok(())
}

/// Triggers one delivery fan-out per stdin line until EOF.
async fn read_events(engine: &DeliveryEngine) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let inbound: InboundEvent = match serde_json::from_str(line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Skipping malformed event line");
                continue;
            },
        };

        let report = engine.trigger(&inbound.event, inbound.data).await;
        debug!(
            event = %inbound.event,
            matched = report.matched,
            enqueued = report.enqueued,
            dropped = report.dropped,
            "Event triggered"
        );
    }

    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing(fallback_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Waits for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
