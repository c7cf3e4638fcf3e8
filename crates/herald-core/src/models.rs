//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhooks, their event subscriptions, and newtype ID wrappers for
//! compile-time type safety. Webhooks are owned by the registry and are
//! read-only to the delivery engine.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event name that subscribes a webhook to every event.
pub const WILDCARD_EVENT: &str = "all";

/// Strongly-typed webhook identifier.
///
/// Wraps a UUID to prevent mixing with other ID types.
///
/// # Example
///
/// ```
/// use herald_core::models::WebhookId;
/// let webhook_id = WebhookId::new();
/// println!("Delivering to webhook: {}", webhook_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

impl WebhookId {
    /// Creates a new random webhook ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WebhookId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of the tenant (account context) that owns an engine.
///
/// Tenants are named by the panel's account identifiers, which are opaque
/// strings rather than UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    /// Creates a tenant ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Set of events a webhook is subscribed to.
///
/// Serialized as a plain list of event names. A list containing the
/// wildcard [`WILDCARD_EVENT`] collapses to [`Subscriptions::All`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum Subscriptions {
    /// Subscribed to every event.
    All,
    /// Subscribed to the listed event names only.
    Events(BTreeSet<String>),
}

impl Subscriptions {
    /// Builds a subscription set from event names.
    pub fn from_events<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names = BTreeSet::new();
        for event in events {
            let event = event.into();
            if event == WILDCARD_EVENT {
                return Self::All;
            }
            names.insert(event);
        }
        Self::Events(names)
    }

    /// Returns true if `event` is covered by this subscription set.
    pub fn contains(&self, event: &str) -> bool {
        match self {
            Self::All => true,
            Self::Events(names) => names.contains(event),
        }
    }
}

impl From<Vec<String>> for Subscriptions {
    fn from(events: Vec<String>) -> Self {
        Self::from_events(events)
    }
}

impl From<Subscriptions> for Vec<String> {
    fn from(subscriptions: Subscriptions) -> Self {
        match subscriptions {
            Subscriptions::All => vec![WILDCARD_EVENT.to_string()],
            Subscriptions::Events(names) => names.into_iter().collect(),
        }
    }
}

/// A user-configured HTTP destination for outbound events.
///
/// The URL is assumed to have passed SSRF validation before it reaches the
/// registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    /// Unique identifier.
    pub id: WebhookId,

    /// Target URL receiving POST requests.
    pub url: String,

    /// Events this webhook wants to receive.
    pub events: Subscriptions,

    /// Inactive webhooks are never selected for delivery.
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Webhook {
    /// Creates an active webhook with a fresh ID.
    pub fn new(url: impl Into<String>, events: Subscriptions) -> Self {
        Self { id: WebhookId::new(), url: url.into(), events, is_active: true }
    }

    /// Returns true if this webhook is active and subscribed to `event`.
    pub fn wants(&self, event: &str) -> bool {
        self.is_active && self.events.contains(event)
    }
}

/// Terminal status of one delivery job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Endpoint answered with a 2xx status.
    Success,
    /// Every attempt failed.
    Error,
    /// Job was rejected by admission control and never attempted.
    Dropped,
}

impl OutcomeStatus {
    /// Returns the label value used in metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Dropped => "dropped",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
