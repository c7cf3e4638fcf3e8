//! Outbound webhook delivery with bounded concurrency and graceful drain.
//!
//! This crate fans events out to user-configured HTTP endpoints. Each
//! tenant gets its own [`DeliveryEngine`] with a bounded FIFO queue, a hard
//! ceiling on simultaneous deliveries, exponential-backoff retries and a
//! shutdown protocol that drains queued and in-flight work.
//!
//! # Delivery lifecycle
//!
//! 1. **Trigger** - registry lookup, one job per subscribed webhook
//! 2. **Admission** - enqueue or drop when the queue is full or draining
//! 3. **Pump** - start workers up to `concurrency_limit`
//! 4. **Attempts** - POST with per-attempt timeout, backoff between failures
//! 5. **Outcome** - metrics, registry counters and audit entry, once per job
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use herald_core::{TenantId, TracingAuditSink};
//! use herald_delivery::{DeliveryEngine, DeliveryError, EngineConfig, InMemoryRegistry};
//!
//! # async fn example() -> Result<(), DeliveryError> {
//! let engine = DeliveryEngine::new(
//!     TenantId::new("acct-1"),
//!     EngineConfig::default(),
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(TracingAuditSink::new()),
//! )?;
//!
//! engine.trigger("message", serde_json::json!({"body": "hello"})).await;
//! let report = engine.shutdown(Duration::from_secs(30)).await;
//! assert!(!report.timed_out);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod job;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod retry;
mod worker;

pub use client::{ClientConfig, DeliveryClient};
pub use engine::{DeliveryEngine, EngineConfig, EngineState, ShutdownReport, TriggerReport};
pub use error::{DeliveryError, DropReason, ErrorCategory, ReplayError, Result};
pub use metrics::DeliveryMetrics;
pub use registry::{InMemoryRegistry, WebhookRegistry, WebhookStats};
pub use retry::{post_with_retry, DeliveryFailure, DeliverySuccess, RetryPolicy};

/// Default number of simultaneous delivery workers per engine.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

/// Default number of queued jobs per engine.
pub const DEFAULT_QUEUE_LIMIT: usize = 1000;
