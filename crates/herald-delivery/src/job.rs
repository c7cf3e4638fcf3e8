//! Delivery jobs: one pending (webhook, event, payload) unit of work.

use std::{sync::Arc, time::Instant};

use herald_core::Webhook;
use uuid::Uuid;

/// A single webhook delivery awaiting or undergoing execution.
///
/// Jobs are immutable once created. Fan-out of one event shares the payload
/// between its jobs, and each job holds a snapshot of its webhook so registry
/// edits never affect an attempt chain in progress.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    /// Identifier sent as `X-Webhook-Delivery-Id`, stable across attempts.
    pub delivery_id: Uuid,
    /// Target webhook snapshot.
    pub webhook: Arc<Webhook>,
    /// Event name.
    pub event: Arc<str>,
    /// Event payload, sent as `data`.
    pub payload: Arc<serde_json::Value>,
    /// When the job was admitted to the queue.
    pub enqueued_at: Instant,
}

impl DeliveryJob {
    /// Creates a job with a fresh delivery ID.
    pub fn new(
        webhook: Arc<Webhook>,
        event: Arc<str>,
        payload: Arc<serde_json::Value>,
        enqueued_at: Instant,
    ) -> Self {
        Self { delivery_id: Uuid::new_v4(), webhook, event, payload, enqueued_at }
    }

    /// Target URL of the job.
    pub fn url(&self) -> &str {
        &self.webhook.url
    }
}
