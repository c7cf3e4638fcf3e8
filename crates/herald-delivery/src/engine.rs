//! Per-tenant webhook delivery engine.
//!
//! Fans events out to subscribed webhooks through a bounded FIFO queue and a
//! pump that never runs more than `concurrency_limit` workers at once.
//!
//! # Architecture
//!
//! ```text
//! trigger()/replay()        ┌────────────┐  pump   ┌──────────────┐
//! ──────────────▶ admission │ Bounded    │ ──────▶ │ Worker tasks │──▶ HTTP
//!                 control   │ FIFO queue │         │ (≤ ceiling)  │
//!                           └────────────┘         └──────────────┘
//!                                 ▲                        │ settle
//!                                 └────────── re-pump ─────┘
//! ```
//!
//! Queue, in-flight count, pause flag and lifecycle state share one mutex
//! that is never held across an await, so admission, dispatch and
//! settlement cannot interleave past the ceiling.
//!
//! # Lifecycle
//!
//! `Running → Draining → Stopped`. [`DeliveryEngine::shutdown`] stops
//! admission immediately, lets queued and in-flight work drain, and on
//! timeout discards what is still queued and cancels in-flight attempt
//! chains.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use herald_core::{AuditEntry, AuditSink, Clock, RealClock, TenantId};
use serde::{Deserialize, Serialize};
use tokio::{runtime::Handle, sync::Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient},
    error::{DeliveryError, DropReason, ReplayError, Result},
    job::DeliveryJob,
    metrics::DeliveryMetrics,
    queue::BoundedQueue,
    registry::WebhookRegistry,
    retry::RetryPolicy,
    worker::DeliveryWorker,
};

/// Configuration for one tenant's delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of simultaneous delivery workers.
    pub concurrency_limit: usize,

    /// Maximum number of queued jobs not yet started.
    pub queue_limit: usize,

    /// Attempt bound, backoff and per-attempt timeout.
    pub retry_policy: RetryPolicy,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Drain bound used by callers that do not pass their own.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: crate::DEFAULT_CONCURRENCY_LIMIT,
            queue_limit: crate::DEFAULT_QUEUE_LIMIT,
            retry_policy: RetryPolicy::default(),
            client_config: ClientConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Checks limits that would make the engine unable to deliver.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` for a zero concurrency
    /// limit or queue limit.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(DeliveryError::configuration("concurrency_limit must be greater than 0"));
        }
        if self.queue_limit == 0 {
            return Err(DeliveryError::configuration("queue_limit must be greater than 0"));
        }
        Ok(())
    }
}

/// Lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Accepting and delivering jobs.
    Running,
    /// Rejecting new jobs while queued and in-flight work finishes.
    Draining,
    /// Terminal. Nothing is accepted or dispatched.
    Stopped,
}

/// Result of admitting the jobs of one trigger or replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerReport {
    /// Webhooks selected for the event.
    pub matched: usize,
    /// Jobs appended to the queue.
    pub enqueued: usize,
    /// Jobs rejected by admission control.
    pub dropped: usize,
}

/// Result of a shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Whether the drain hit its deadline.
    pub timed_out: bool,
    /// Queued jobs discarded at the deadline.
    pub discarded: usize,
    /// Workers still running at the deadline; their chains were cancelled.
    pub cancelled_in_flight: usize,
    /// Time spent draining.
    pub elapsed: Duration,
}

#[derive(Debug)]
struct DispatchState {
    queue: BoundedQueue<DeliveryJob>,
    in_flight: usize,
    peak_in_flight: usize,
    paused: bool,
    lifecycle: EngineState,
}

#[derive(Debug)]
struct EngineInner {
    tenant: TenantId,
    config: EngineConfig,
    state: Mutex<DispatchState>,
    settled: Notify,
    shutdown: tokio::sync::OnceCell<ShutdownReport>,
    registry: Arc<dyn WebhookRegistry>,
    clock: Arc<dyn Clock>,
    metrics: DeliveryMetrics,
    cancel: CancellationToken,
    worker: DeliveryWorker,
}

/// Delivery engine for one tenant.
///
/// Cheap to clone; clones drive the same engine. Engines are independent:
/// each has its own queue, ceiling, metrics registry and lifecycle.
#[derive(Debug, Clone)]
pub struct DeliveryEngine {
    inner: Arc<EngineInner>,
}

impl DeliveryEngine {
    /// Creates an engine using the wall clock.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the configuration is
    /// invalid or the HTTP client or metrics cannot be initialized.
    pub fn new(
        tenant: TenantId,
        config: EngineConfig,
        registry: Arc<dyn WebhookRegistry>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        Self::with_clock(tenant, config, registry, audit, Arc::new(RealClock::new()))
    }

    /// Creates an engine with an injected clock.
    ///
    /// # Errors
    ///
    /// Same as [`DeliveryEngine::new`].
    pub fn with_clock(
        tenant: TenantId,
        config: EngineConfig,
        registry: Arc<dyn WebhookRegistry>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let client = DeliveryClient::new(&config.client_config)?;
        let metrics = DeliveryMetrics::new(&tenant)?;
        let cancel = CancellationToken::new();

        let worker = DeliveryWorker {
            tenant: tenant.clone(),
            client,
            clock: clock.clone(),
            policy: config.retry_policy.clone(),
            registry: registry.clone(),
            audit,
            metrics: metrics.clone(),
            cancel: cancel.clone(),
        };

        let state = DispatchState {
            queue: BoundedQueue::new(config.queue_limit),
            in_flight: 0,
            peak_in_flight: 0,
            paused: false,
            lifecycle: EngineState::Running,
        };

        info!(
            tenant = %tenant,
            concurrency_limit = config.concurrency_limit,
            queue_limit = config.queue_limit,
            max_attempts = config.retry_policy.effective_attempts(),
            "delivery engine created"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                tenant,
                config,
                state: Mutex::new(state),
                settled: Notify::new(),
                shutdown: tokio::sync::OnceCell::new(),
                registry,
                clock,
                metrics,
                cancel,
                worker,
            }),
        })
    }

    /// Fans `event` out to every active subscribed webhook.
    ///
    /// Never waits for delivery. A registry failure is logged and nothing
    /// is enqueued. While draining or stopped every match is dropped.
    pub async fn trigger(&self, event: &str, payload: serde_json::Value) -> TriggerReport {
        let webhooks = match self.inner.registry.active_webhooks(event).await {
            Ok(webhooks) => webhooks,
            Err(e) => {
                warn!(tenant = %self.inner.tenant, event, error = %e, "webhook lookup failed");
                return TriggerReport::default();
            },
        };

        if webhooks.is_empty() {
            debug!(tenant = %self.inner.tenant, event, "no webhooks subscribed");
            return TriggerReport::default();
        }

        let event: Arc<str> = Arc::from(event);
        let payload = Arc::new(payload);
        let now = self.inner.clock.now();
        let jobs = webhooks.into_iter().map(|webhook| {
            DeliveryJob::new(Arc::new(webhook), event.clone(), payload.clone(), now)
        });

        self.inner.admit(jobs)
    }

    /// Re-submits an audited delivery to its webhook.
    ///
    /// The job goes through the same admission control as a trigger.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError`] if the webhook is unknown, inactive, or the
    /// registry lookup fails.
    pub async fn replay(
        &self,
        entry: &AuditEntry,
    ) -> std::result::Result<TriggerReport, ReplayError> {
        let webhook = self
            .inner
            .registry
            .find_webhook(entry.webhook_id)
            .await?
            .ok_or(ReplayError::WebhookNotFound(entry.webhook_id))?;

        if !webhook.is_active {
            return Err(ReplayError::WebhookInactive(webhook.id));
        }

        info!(
            tenant = %self.inner.tenant,
            webhook_id = %webhook.id,
            original_delivery_id = %entry.delivery_id,
            event = %entry.event,
            "replaying delivery"
        );

        let job = DeliveryJob::new(
            Arc::new(webhook),
            Arc::from(entry.event.as_str()),
            Arc::new(entry.payload.clone()),
            self.inner.clock.now(),
        );

        Ok(self.inner.admit(std::iter::once(job)))
    }

    /// Stops dispatching queued jobs. Admission still applies.
    ///
    /// A draining engine dispatches regardless of this flag.
    pub fn pause(&self) {
        self.inner.lock_state().paused = true;
        info!(tenant = %self.inner.tenant, "dispatch paused");
    }

    /// Resumes dispatching after [`DeliveryEngine::pause`].
    pub fn resume(&self) {
        self.inner.lock_state().paused = false;
        info!(tenant = %self.inner.tenant, "dispatch resumed");
        self.inner.pump();
    }

    /// Stops admission and drains the engine.
    ///
    /// Admission is switched off when this method is called, before the
    /// returned future is polled. The future resolves once the queue is
    /// empty and no worker is running, or after `timeout`, whichever comes
    /// first. On timeout queued jobs are discarded as dropped and in-flight
    /// attempt chains are cancelled. Later calls resolve to the first
    /// call's report.
    pub fn shutdown(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = ShutdownReport> + Send + 'static {
        self.inner.begin_drain();

        let inner = Arc::clone(&self.inner);
        async move { inner.shutdown.get_or_init(|| inner.drain(timeout)).await.clone() }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.inner.lock_state().lifecycle
    }

    /// Number of queued jobs not yet started.
    pub fn queue_len(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    /// Number of workers currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.lock_state().in_flight
    }

    /// Highest number of simultaneously running workers observed.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.lock_state().peak_in_flight
    }

    /// Whether dispatch is paused.
    pub fn is_paused(&self) -> bool {
        self.inner.lock_state().paused
    }

    /// The engine's metrics.
    pub fn metrics(&self) -> &DeliveryMetrics {
        &self.inner.metrics
    }

    /// Tenant served by this engine.
    pub fn tenant(&self) -> &TenantId {
        &self.inner.tenant
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(self: &Arc<Self>, jobs: impl IntoIterator<Item = DeliveryJob>) -> TriggerReport {
        let mut report = TriggerReport::default();
        let mut rejected = Vec::new();

        {
            let mut state = self.lock_state();
            for job in jobs {
                report.matched += 1;

                if state.lifecycle != EngineState::Running {
                    rejected.push((job, DropReason::Draining));
                    continue;
                }

                match state.queue.try_push(job) {
                    Ok(()) => report.enqueued += 1,
                    Err(job) => rejected.push((job, DropReason::QueueFull)),
                }
            }

            if state.lifecycle != EngineState::Stopped {
                self.metrics.set_queue_size(state.queue.len());
            }
        }

        for (job, reason) in rejected {
            report.dropped += 1;
            self.metrics.record_dropped(&job.event, 1);
            warn!(
                tenant = %self.tenant,
                delivery_id = %job.delivery_id,
                webhook_id = %job.webhook.id,
                event = %job.event,
                reason = %reason,
                "delivery dropped"
            );
        }

        if report.matched > 0 {
            self.pump();
        }

        report
    }

    /// Starts workers until the ceiling is reached or the queue is empty.
    fn pump(self: &Arc<Self>) {
        let Ok(handle) = Handle::try_current() else {
            error!(tenant = %self.tenant, "no tokio runtime available, dispatch deferred");
            return;
        };

        let jobs = {
            let mut state = self.lock_state();
            match state.lifecycle {
                EngineState::Stopped => return,
                EngineState::Running if state.paused => return,
                EngineState::Running | EngineState::Draining => {},
            }

            let mut jobs = Vec::new();
            while state.in_flight < self.config.concurrency_limit {
                let Some(job) = state.queue.pop() else { break };
                state.in_flight += 1;
                state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
                jobs.push(job);
            }

            if !jobs.is_empty() {
                self.metrics.set_queue_size(state.queue.len());
                self.metrics.set_in_flight(state.in_flight);
            }
            jobs
        };

        for job in jobs {
            let inner = Arc::clone(self);
            handle.spawn(async move {
                let _slot = SlotGuard { inner: Arc::clone(&inner) };
                inner.worker.run(job).await;
            });
        }
    }

    /// Frees one concurrency slot and refills it.
    fn settle(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.lifecycle != EngineState::Stopped {
                self.metrics.set_in_flight(state.in_flight);
            }
        }
        self.settled.notify_waiters();
        self.pump();
    }

    /// Stops admission. Queued jobs keep dispatching even if paused.
    fn begin_drain(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            if state.lifecycle != EngineState::Running {
                return;
            }
            state.lifecycle = EngineState::Draining;
            info!(
                tenant = %self.tenant,
                queued = state.queue.len(),
                in_flight = state.in_flight,
                paused = state.paused,
                "delivery engine draining"
            );
        }
        self.pump();
    }

    fn is_idle(&self) -> bool {
        let state = self.lock_state();
        state.queue.is_empty() && state.in_flight == 0
    }

    async fn drain(&self, timeout: Duration) -> ShutdownReport {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + timeout;

        let timed_out = loop {
            let notified = self.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_idle() {
                break false;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break !self.is_idle();
            }
        };

        let (discarded, cancelled_in_flight) = if timed_out {
            let (jobs, in_flight) = {
                let mut state = self.lock_state();
                (state.queue.drain(), state.in_flight)
            };

            for job in &jobs {
                self.metrics.record_dropped(&job.event, 1);
                warn!(
                    tenant = %self.tenant,
                    delivery_id = %job.delivery_id,
                    webhook_id = %job.webhook.id,
                    event = %job.event,
                    reason = %DropReason::ShutdownTimeout,
                    "delivery dropped"
                );
            }
            self.cancel.cancel();

            warn!(
                tenant = %self.tenant,
                discarded = jobs.len(),
                in_flight,
                "shutdown timed out, discarding queued jobs and cancelling deliveries"
            );
            (jobs.len(), in_flight)
        } else {
            (0, 0)
        };

        {
            let mut state = self.lock_state();
            state.lifecycle = EngineState::Stopped;
            self.metrics.set_queue_size(0);
            self.metrics.set_in_flight(0);
        }

        let elapsed = started.elapsed();
        let report = ShutdownReport { timed_out, discarded, cancelled_in_flight, elapsed };
        info!(
            tenant = %self.tenant,
            timed_out,
            discarded,
            cancelled_in_flight,
            elapsed_ms = elapsed.as_millis(),
            "delivery engine stopped"
        );
        report
    }
}

/// Releases a worker's concurrency slot when the task ends, panics included.
struct SlotGuard {
    inner: Arc<EngineInner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.settle();
    }
}

#[cfg(test)]
mod tests {
    use herald_core::NoOpAuditSink;

    use super::*;
    use crate::registry::InMemoryRegistry;

    fn engine(config: EngineConfig) -> DeliveryEngine {
        DeliveryEngine::new(
            TenantId::new("acct-test"),
            config,
            Arc::new(InMemoryRegistry::new()),
            Arc::new(NoOpAuditSink::new()),
        )
        .unwrap()
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = EngineConfig { concurrency_limit: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(DeliveryError::ConfigurationError { .. })));

        let config = EngineConfig { queue_limit: 0, ..Default::default() };
        assert!(config.validate().is_err());

        assert!(EngineConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn shutdown_of_idle_engine_completes_immediately() {
        let engine = engine(EngineConfig::default());
        assert_eq!(engine.state(), EngineState::Running);

        let report = engine.shutdown(Duration::from_secs(1)).await;

        assert!(!report.timed_out);
        assert_eq!(report.discarded, 0);
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_flips_state_before_first_poll() {
        let engine = engine(EngineConfig::default());

        let pending = engine.shutdown(Duration::from_secs(1));
        assert_eq!(engine.state(), EngineState::Draining);

        pending.await;
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn repeated_shutdown_returns_first_report() {
        let engine = engine(EngineConfig::default());

        let first = engine.shutdown(Duration::from_secs(1)).await;
        let second = engine.shutdown(Duration::from_secs(5)).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn pause_flag_round_trips() {
        let engine = engine(EngineConfig::default());
        engine.pause();
        assert!(engine.is_paused());
        engine.resume();
        assert!(!engine.is_paused());
    }
}
