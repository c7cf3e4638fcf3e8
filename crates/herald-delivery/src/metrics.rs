//! Prometheus metrics for one delivery engine.
//!
//! Each engine owns its own [`prometheus::Registry`] so several tenants can
//! run side by side in one process without clashing on metric names.

use std::time::Duration;

use herald_core::{OutcomeStatus, TenantId};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::error::{DeliveryError, Result};

/// Delivery counters, duration histogram and occupancy gauges.
#[derive(Clone)]
pub struct DeliveryMetrics {
    registry: Registry,
    deliveries: IntCounterVec,
    duration: HistogramVec,
    queue_size: IntGauge,
    in_flight: IntGauge,
}

impl DeliveryMetrics {
    /// Creates and registers the metric families for `tenant`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if a metric family cannot
    /// be created or registered.
    pub fn new(tenant: &TenantId) -> Result<Self> {
        let registry = Registry::new();

        let deliveries = IntCounterVec::new(
            Opts::new("webhook_deliveries_total", "Terminal webhook delivery outcomes"),
            &["event", "outcome"],
        )
        .map_err(|e| metrics_error("webhook_deliveries_total", &e))?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "webhook_delivery_duration_seconds",
                "Time from first attempt to terminal outcome",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["event", "outcome"],
        )
        .map_err(|e| metrics_error("webhook_delivery_duration_seconds", &e))?;

        let queue_size = IntGaugeVec::new(
            Opts::new("webhook_queue_size", "Jobs waiting for a worker slot"),
            &["tenant"],
        )
        .map_err(|e| metrics_error("webhook_queue_size", &e))?;

        let in_flight = IntGaugeVec::new(
            Opts::new("webhook_in_flight", "Delivery workers currently running"),
            &["tenant"],
        )
        .map_err(|e| metrics_error("webhook_in_flight", &e))?;

        registry
            .register(Box::new(deliveries.clone()))
            .map_err(|e| metrics_error("webhook_deliveries_total", &e))?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(|e| metrics_error("webhook_delivery_duration_seconds", &e))?;
        registry
            .register(Box::new(queue_size.clone()))
            .map_err(|e| metrics_error("webhook_queue_size", &e))?;
        registry
            .register(Box::new(in_flight.clone()))
            .map_err(|e| metrics_error("webhook_in_flight", &e))?;

        let queue_size = queue_size.with_label_values(&[tenant.as_str()]);
        let in_flight = in_flight.with_label_values(&[tenant.as_str()]);

        Ok(Self { registry, deliveries, duration, queue_size, in_flight })
    }

    /// Records a terminal outcome. Drops carry no duration.
    pub fn record_outcome(&self, event: &str, outcome: OutcomeStatus, duration: Option<Duration>) {
        let labels = [event, outcome.as_str()];
        self.deliveries.with_label_values(&labels).inc();
        if let Some(duration) = duration {
            self.duration.with_label_values(&labels).observe(duration.as_secs_f64());
        }
    }

    /// Records `count` dropped jobs for `event`.
    pub fn record_dropped(&self, event: &str, count: u64) {
        if count > 0 {
            self.deliveries
                .with_label_values(&[event, OutcomeStatus::Dropped.as_str()])
                .inc_by(count);
        }
    }

    /// Sets the queue-depth gauge.
    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.set(i64::try_from(size).unwrap_or(i64::MAX));
    }

    /// Sets the in-flight gauge.
    pub fn set_in_flight(&self, count: usize) {
        self.in_flight.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Current value of `webhook_deliveries_total{event, outcome}`.
    pub fn deliveries(&self, event: &str, outcome: OutcomeStatus) -> u64 {
        self.deliveries.with_label_values(&[event, outcome.as_str()]).get()
    }

    /// Number of duration observations for `{event, outcome}`.
    pub fn duration_samples(&self, event: &str, outcome: OutcomeStatus) -> u64 {
        self.duration.with_label_values(&[event, outcome.as_str()]).get_sample_count()
    }

    /// Sum of observed durations for `{event, outcome}`, in seconds.
    pub fn duration_sum(&self, event: &str, outcome: OutcomeStatus) -> f64 {
        self.duration.with_label_values(&[event, outcome.as_str()]).get_sample_sum()
    }

    /// Current queue-depth gauge value.
    pub fn queue_size(&self) -> i64 {
        self.queue_size.get()
    }

    /// Current in-flight gauge value.
    pub fn in_flight(&self) -> i64 {
        self.in_flight.get()
    }

    /// The engine's metric registry, for mounting on an exporter.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes every metric family in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::InternalError` if encoding fails.
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| DeliveryError::internal(format!("failed to encode metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| DeliveryError::internal(format!("metrics are not UTF-8: {e}")))
    }
}

impl std::fmt::Debug for DeliveryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryMetrics")
            .field("queue_size", &self.queue_size.get())
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}

fn metrics_error(name: &str, error: &prometheus::Error) -> DeliveryError {
    DeliveryError::configuration(format!("failed to register metric {name}: {error}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_labelled_by_event_and_outcome() {
        let metrics = DeliveryMetrics::new(&TenantId::new("acct-1")).unwrap();

        metrics.record_outcome("message", OutcomeStatus::Success, Some(Duration::from_millis(20)));
        metrics.record_outcome("message", OutcomeStatus::Error, Some(Duration::from_secs(3)));
        metrics.record_dropped("message", 2);

        assert_eq!(metrics.deliveries("message", OutcomeStatus::Success), 1);
        assert_eq!(metrics.deliveries("message", OutcomeStatus::Error), 1);
        assert_eq!(metrics.deliveries("message", OutcomeStatus::Dropped), 2);
        assert_eq!(metrics.duration_samples("message", OutcomeStatus::Success), 1);
        assert_eq!(metrics.duration_samples("message", OutcomeStatus::Dropped), 0);
        assert!(metrics.duration_sum("message", OutcomeStatus::Error) >= 3.0);
        assert_eq!(metrics.deliveries("ack", OutcomeStatus::Success), 0);
    }

    #[test]
    fn engines_do_not_share_registries() {
        let first = DeliveryMetrics::new(&TenantId::new("a")).unwrap();
        let second = DeliveryMetrics::new(&TenantId::new("b")).unwrap();

        first.record_outcome("message", OutcomeStatus::Success, None);
        first.set_queue_size(3);

        assert_eq!(second.deliveries("message", OutcomeStatus::Success), 0);
        assert_eq!(second.queue_size(), 0);
        assert_eq!(first.queue_size(), 3);
    }

    #[test]
    fn text_exposition_contains_families() {
        let metrics = DeliveryMetrics::new(&TenantId::new("acct-9")).unwrap();
        metrics.record_outcome("message", OutcomeStatus::Success, Some(Duration::from_millis(5)));
        metrics.set_in_flight(1);

        let text = metrics.encode_text().unwrap();
        assert!(text.contains(r#"webhook_deliveries_total{event="message",outcome="success"} 1"#));
        assert!(text.contains("webhook_delivery_duration_seconds_count"));
        assert!(text.contains(r#"webhook_in_flight{tenant="acct-9"} 1"#));
        assert!(text.contains(r#"webhook_queue_size{tenant="acct-9"} 0"#));
    }
}
