//! Webhook registry abstraction consumed by the delivery engine.
//!
//! The registry owns webhook definitions and their delivery counters. The
//! engine only reads webhooks and reports outcomes; persistence is the
//! implementor's concern. [`InMemoryRegistry`] backs the CLI and tests.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use herald_core::{error::Result, CoreError, Webhook, WebhookId};
use tokio::sync::RwLock;

/// Registry operations required by the delivery engine.
pub trait WebhookRegistry: Send + Sync + std::fmt::Debug + 'static {
    /// Returns active webhooks subscribed to `event` or to every event.
    fn active_webhooks(
        &self,
        event: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Webhook>>> + Send + '_>>;

    /// Finds a webhook by ID regardless of its active flag.
    fn find_webhook(
        &self,
        id: WebhookId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Webhook>>> + Send + '_>>;

    /// Records a successful delivery.
    fn record_success(
        &self,
        id: WebhookId,
        http_status: u16,
        duration: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Records a delivery whose attempts were exhausted or cancelled.
    fn record_failure(
        &self,
        id: WebhookId,
        error: String,
        http_status: Option<u16>,
        duration: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Delivery counters kept per webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookStats {
    /// Successful deliveries.
    pub success_count: u64,
    /// Failed deliveries.
    pub failure_count: u64,
    /// HTTP status of the most recent outcome, if any.
    pub last_status: Option<u16>,
    /// Error of the most recent failure.
    pub last_error: Option<String>,
    /// Duration of the most recent outcome.
    pub last_duration: Option<Duration>,
}

/// In-memory registry.
///
/// Clones share state. Lookups can be forced to fail to exercise the
/// engine's error paths.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    webhooks: Arc<RwLock<Vec<Webhook>>>,
    stats: Arc<RwLock<HashMap<WebhookId, WebhookStats>>>,
    lookup_error: Arc<RwLock<Option<String>>>,
    failure_calls: Arc<AtomicUsize>,
    success_calls: Arc<AtomicUsize>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding `webhooks`.
    pub fn with_webhooks(webhooks: Vec<Webhook>) -> Self {
        Self { webhooks: Arc::new(RwLock::new(webhooks)), ..Self::default() }
    }

    /// Adds or replaces a webhook.
    pub async fn upsert(&self, webhook: Webhook) {
        let mut webhooks = self.webhooks.write().await;
        match webhooks.iter_mut().find(|existing| existing.id == webhook.id) {
            Some(existing) => *existing = webhook,
            None => webhooks.push(webhook),
        }
    }

    /// Sets the active flag of a webhook. Returns false if it is unknown.
    pub async fn set_active(&self, id: WebhookId, is_active: bool) -> bool {
        let mut webhooks = self.webhooks.write().await;
        match webhooks.iter_mut().find(|webhook| webhook.id == id) {
            Some(webhook) => {
                webhook.is_active = is_active;
                true
            },
            None => false,
        }
    }

    /// Makes every subsequent `active_webhooks` call fail with `message`.
    pub async fn fail_lookups(&self, message: impl Into<String>) {
        *self.lookup_error.write().await = Some(message.into());
    }

    /// Returns the counters of a webhook.
    pub async fn stats(&self, id: WebhookId) -> WebhookStats {
        self.stats.read().await.get(&id).cloned().unwrap_or_default()
    }

    /// Number of `record_success` calls across all webhooks.
    pub fn success_calls(&self) -> usize {
        self.success_calls.load(Ordering::SeqCst)
    }

    /// Number of `record_failure` calls across all webhooks.
    pub fn failure_calls(&self) -> usize {
        self.failure_calls.load(Ordering::SeqCst)
    }
}

impl WebhookRegistry for InMemoryRegistry {
    fn active_webhooks(
        &self,
        event: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Webhook>>> + Send + '_>> {
        let event = event.to_string();
        Box::pin(async move {
            if let Some(message) = self.lookup_error.read().await.clone() {
                return Err(CoreError::registry(message));
            }

            let webhooks = self.webhooks.read().await;
            Ok(webhooks.iter().filter(|webhook| webhook.wants(&event)).cloned().collect())
        })
    }

    fn find_webhook(
        &self,
        id: WebhookId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Webhook>>> + Send + '_>> {
        Box::pin(async move {
            let webhooks = self.webhooks.read().await;
            Ok(webhooks.iter().find(|webhook| webhook.id == id).cloned())
        })
    }

    fn record_success(
        &self,
        id: WebhookId,
        http_status: u16,
        duration: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.success_calls.fetch_add(1, Ordering::SeqCst);
            let mut stats = self.stats.write().await;
            let entry = stats.entry(id).or_default();
            entry.success_count += 1;
            entry.last_status = Some(http_status);
            entry.last_duration = Some(duration);
            Ok(())
        })
    }

    fn record_failure(
        &self,
        id: WebhookId,
        error: String,
        http_status: Option<u16>,
        duration: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.failure_calls.fetch_add(1, Ordering::SeqCst);
            let mut stats = self.stats.write().await;
            let entry = stats.entry(id).or_default();
            entry.failure_count += 1;
            entry.last_status = http_status;
            entry.last_error = Some(error);
            entry.last_duration = Some(duration);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use herald_core::Subscriptions;

    use super::*;

    fn webhook(events: &[&str]) -> Webhook {
        Webhook::new("https://example.com/hook", Subscriptions::from_events(events.iter().copied()))
    }

    #[tokio::test]
    async fn active_webhooks_match_event_or_wildcard() {
        let message_hook = webhook(&["message"]);
        let all_hook = webhook(&["all"]);
        let ack_hook = webhook(&["message_ack"]);
        let mut inactive = webhook(&["message"]);
        inactive.is_active = false;

        let registry = InMemoryRegistry::with_webhooks(vec![
            message_hook.clone(),
            all_hook.clone(),
            ack_hook,
            inactive,
        ]);

        let matched = registry.active_webhooks("message").await.unwrap();
        let ids: Vec<_> = matched.iter().map(|w| w.id).collect();
        assert_eq!(ids, vec![message_hook.id, all_hook.id]);
    }

    #[tokio::test]
    async fn lookup_failure_is_injectable() {
        let registry = InMemoryRegistry::with_webhooks(vec![webhook(&["all"])]);
        registry.fail_lookups("store offline").await;

        let err = registry.active_webhooks("message").await.unwrap_err();
        assert!(err.to_string().contains("store offline"));
    }

    #[tokio::test]
    async fn outcomes_update_counters() {
        let hook = webhook(&["all"]);
        let registry = InMemoryRegistry::with_webhooks(vec![hook.clone()]);

        registry.record_success(hook.id, 200, Duration::from_millis(12)).await.unwrap();
        let error = "server error: HTTP 503".to_string();
        registry.record_failure(hook.id, error, Some(503), Duration::from_secs(1)).await.unwrap();

        let stats = registry.stats(hook.id).await;
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.last_status, Some(503));
        assert_eq!(stats.last_error.as_deref(), Some("server error: HTTP 503"));
        assert_eq!(registry.success_calls(), 1);
        assert_eq!(registry.failure_calls(), 1);
    }

    #[tokio::test]
    async fn find_and_toggle_webhooks() {
        let hook = webhook(&["message"]);
        let registry = InMemoryRegistry::new();
        registry.upsert(hook.clone()).await;

        assert!(registry.set_active(hook.id, false).await);
        let found = registry.find_webhook(hook.id).await.unwrap().unwrap();
        assert!(!found.is_active);
        assert!(registry.active_webhooks("message").await.unwrap().is_empty());

        assert!(!registry.set_active(WebhookId::new(), true).await);
        assert!(registry.find_webhook(WebhookId::new()).await.unwrap().is_none());
    }
}
