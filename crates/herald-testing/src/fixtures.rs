//! Builders for webhooks, payloads and audit entries.

use chrono::Utc;
use herald_core::{
    AuditEntry, OutcomeStatus, Subscriptions, TenantId, Webhook, WebhookId, WILDCARD_EVENT,
};
use serde_json::{json, Value};
use uuid::Uuid;

/// Builder for test webhooks.
pub struct WebhookBuilder {
    id: WebhookId,
    url: String,
    events: Vec<String>,
    is_active: bool,
}

impl WebhookBuilder {
    /// Creates a builder for an active webhook posting to `url` and
    /// subscribed to `message`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: WebhookId::new(),
            url: url.into(),
            events: vec!["message".to_string()],
            is_active: true,
        }
    }

    /// Sets the webhook ID.
    #[must_use]
    pub fn id(mut self, id: WebhookId) -> Self {
        self.id = id;
        self
    }

    /// Replaces the subscribed events.
    #[must_use]
    pub fn events(mut self, events: &[&str]) -> Self {
        self.events = events.iter().map(|event| (*event).to_string()).collect();
        self
    }

    /// Subscribes to every event.
    #[must_use]
    pub fn all_events(self) -> Self {
        self.events(&[WILDCARD_EVENT])
    }

    /// Marks the webhook inactive.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Builds the webhook.
    pub fn build(self) -> Webhook {
        Webhook {
            id: self.id,
            url: self.url,
            events: Subscriptions::from_events(self.events),
            is_active: self.is_active,
        }
    }
}

/// Payload of an inbound chat message event.
pub fn message_payload(body: &str) -> Value {
    json!({
        "id": format!("msg_{}", Uuid::new_v4().simple()),
        "from": "15550001111@c.us",
        "body": body,
        "fromMe": false,
    })
}

/// Audit entry for a past delivery to `webhook`, suitable for replay.
pub fn audit_entry_for(webhook: &Webhook, event: &str, payload: Value) -> AuditEntry {
    AuditEntry {
        delivery_id: Uuid::new_v4(),
        tenant_id: TenantId::new("acct-test"),
        webhook_id: webhook.id,
        url: webhook.url.clone(),
        event: event.to_string(),
        payload,
        status: OutcomeStatus::Error,
        http_status: Some(503),
        attempts: 3,
        duration_ms: 7_000,
        error: Some("server error: HTTP 503".to_string()),
        error_category: Some("server".to_string()),
        recorded_at: Utc::now(),
    }
}
