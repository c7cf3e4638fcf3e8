//! Delivery audit trail.
//!
//! Every terminal delivery outcome is reported exactly once to an
//! [`AuditSink`]. Sinks are fire-and-forget: the delivery engine never
//! waits on their success and a failing sink must log rather than panic.
//!
//! ```text
//! ┌─────────────────┐   AuditEntry   ┌──────────────────┐
//! │ DeliveryWorker  │ ──────────────▶│ MulticastAuditSink│
//! └─────────────────┘                └──────────────────┘
//!                                        │          │
//!                                        ▼          ▼
//!                              TracingAuditSink   store-backed sink
//! ```
//!
//! Entries carry the original event name and payload so an operator can
//! replay a delivery through the engine's admission path.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{OutcomeStatus, TenantId, WebhookId};

/// One recorded delivery outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Identifier of the delivery job, stable across its attempts.
    pub delivery_id: Uuid,

    /// Tenant whose engine produced the outcome.
    pub tenant_id: TenantId,

    /// Webhook that was targeted.
    pub webhook_id: WebhookId,

    /// URL the job was posted to.
    pub url: String,

    /// Event name that triggered the delivery.
    pub event: String,

    /// Payload sent as the `data` field of the request body.
    pub payload: serde_json::Value,

    /// Terminal status.
    pub status: OutcomeStatus,

    /// Last HTTP status received, if the endpoint answered at all.
    pub http_status: Option<u16>,

    /// Number of attempts made.
    pub attempts: u32,

    /// Wall time spent across all attempts and backoff sleeps.
    pub duration_ms: u64,

    /// Error detail for failed deliveries.
    pub error: Option<String>,

    /// Coarse classification of `error`, e.g. `network` or `server`.
    pub error_category: Option<String>,

    /// When the outcome was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Returns true if the delivery reached the endpoint successfully.
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Receiver of delivery audit entries.
///
/// Implementations persist or forward entries. They should not block
/// delivery processing; failures are the sink's own concern.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    /// Records one delivery outcome.
    async fn record(&self, entry: AuditEntry);
}

/// Sink that discards every entry.
#[derive(Debug, Default)]
pub struct NoOpAuditSink;

impl NoOpAuditSink {
    /// Creates a new no-op sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl AuditSink for NoOpAuditSink {
    async fn record(&self, _entry: AuditEntry) {}
}

/// Sink that emits each entry as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    /// Creates a new tracing sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) {
        match entry.status {
            OutcomeStatus::Success => tracing::info!(
                delivery_id = %entry.delivery_id,
                tenant_id = %entry.tenant_id,
                webhook_id = %entry.webhook_id,
                event = %entry.event,
                http_status = ?entry.http_status,
                attempts = entry.attempts,
                duration_ms = entry.duration_ms,
                "webhook delivered"
            ),
            OutcomeStatus::Error | OutcomeStatus::Dropped => tracing::warn!(
                delivery_id = %entry.delivery_id,
                tenant_id = %entry.tenant_id,
                webhook_id = %entry.webhook_id,
                event = %entry.event,
                status = %entry.status,
                http_status = ?entry.http_status,
                attempts = entry.attempts,
                duration_ms = entry.duration_ms,
                error = entry.error.as_deref().unwrap_or(""),
                error_category = entry.error_category.as_deref().unwrap_or(""),
                "webhook delivery failed"
            ),
        }
    }
}

/// Sink that keeps entries in memory, for tests and admin listings.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl MemoryAuditSink {
    /// Creates an empty in-memory sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded entries in arrival order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|entries| entries.clone()).unwrap_or_default()
    }

    /// Returns the number of recorded entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Sink that forwards entries to several subscribers concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl MulticastAuditSink {
    /// Creates a multicast sink with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    pub fn add_sink(&mut self, sink: Arc<dyn AuditSink>) {
        self.sinks.push(sink);
    }

    /// Returns the number of subscribers.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

#[async_trait::async_trait]
impl AuditSink for MulticastAuditSink {
    async fn record(&self, entry: AuditEntry) {
        let deliveries = self.sinks.iter().map(|sink| {
            let entry = entry.clone();
            async move { sink.record(entry).await }
        });
        futures::future::join_all(deliveries).await;
    }
}
