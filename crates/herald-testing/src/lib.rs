//! Test infrastructure for the delivery engine.
//!
//! Provides a [`TestEnv`] bundling a mock webhook receiver, a virtual clock,
//! an in-memory registry and an in-memory audit sink, plus fixture builders.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use herald_core::{MemoryAuditSink, TenantId, TestClock, Webhook};
use herald_delivery::{DeliveryEngine, EngineConfig, InMemoryRegistry, RetryPolicy};

pub mod fixtures;
pub mod http;

pub use fixtures::{audit_entry_for, message_payload, WebhookBuilder};
pub use http::{MockEndpoint, MockResponse, MockServer, RecordedRequest};

/// Tenant used by every test environment.
pub const TEST_TENANT: &str = "acct-test";

/// Isolated environment for engine integration tests.
pub struct TestEnv {
    /// HTTP mock server receiving webhook deliveries
    pub http_mock: MockServer,
    /// Virtual clock driving backoff sleeps
    pub clock: TestClock,
    /// Registry shared with engines built by this environment
    pub registry: InMemoryRegistry,
    /// Audit sink shared with engines built by this environment
    pub audit: MemoryAuditSink,
}

impl TestEnv {
    /// Starts a mock server and creates empty collaborators.
    pub async fn new() -> Self {
        Self {
            http_mock: MockServer::start().await,
            clock: TestClock::new(),
            registry: InMemoryRegistry::new(),
            audit: MemoryAuditSink::new(),
        }
    }

    /// Engine configuration with short timeouts and instant backoff.
    pub fn fast_config() -> EngineConfig {
        EngineConfig {
            concurrency_limit: 4,
            queue_limit: 100,
            retry_policy: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                attempt_timeout: Duration::from_secs(2),
                ..RetryPolicy::default()
            },
            shutdown_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        }
    }

    /// Builds an engine wired to this environment's collaborators.
    pub fn engine(&self, config: EngineConfig) -> Result<DeliveryEngine> {
        Ok(DeliveryEngine::with_clock(
            TenantId::new(TEST_TENANT),
            config,
            Arc::new(self.registry.clone()),
            Arc::new(self.audit.clone()),
            Arc::new(self.clock.clone()),
        )?)
    }

    /// Registers an active webhook posting to `path` on the mock server,
    /// subscribed to `events`.
    pub async fn register_webhook(&self, path: &str, events: &[&str]) -> Webhook {
        let webhook = WebhookBuilder::new(self.http_mock.endpoint_url(path)).events(events).build();
        self.registry.upsert(webhook.clone()).await;
        webhook
    }

    /// Waits until the audit sink holds at least `count` entries.
    pub async fn wait_for_audits(&self, count: usize, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.audit.len() < count {
            if tokio::time::Instant::now() >= deadline {
                bail!("expected {count} audit entries, found {}", self.audit.len());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }
}
