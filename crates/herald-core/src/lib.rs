//! Core domain models, audit trail and time abstractions.
//!
//! Shared by the delivery engine and its collaborators: webhook and tenant
//! identifiers, the audit sink contract, and the [`Clock`] used for all
//! timing so delivery can be tested deterministically.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod error;
pub mod models;
pub mod time;

pub use audit::{
    AuditEntry, AuditSink, MemoryAuditSink, MulticastAuditSink, NoOpAuditSink, TracingAuditSink,
};
pub use error::{CoreError, Result};
pub use models::{OutcomeStatus, Subscriptions, TenantId, Webhook, WebhookId, WILDCARD_EVENT};
pub use time::{Clock, RealClock, TestClock};
