//! Execution of a single delivery job.
//!
//! A worker runs the attempt chain for one job and reports its terminal
//! outcome exactly once to metrics, the registry and the audit sink.
//! Nothing escapes: delivery errors become outcomes, registry errors and
//! panics are logged, and a panic inside the attempt chain is recorded as
//! an internal error.

use std::{any::Any, future::Future, panic::AssertUnwindSafe, sync::Arc};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use herald_core::{AuditEntry, AuditSink, Clock, OutcomeStatus, TenantId};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    client::DeliveryClient,
    error::{DeliveryError, ErrorCategory},
    job::DeliveryJob,
    metrics::DeliveryMetrics,
    registry::WebhookRegistry,
    retry::{post_with_retry, DeliveryFailure, DeliverySuccess, RetryPolicy},
};

/// Shared context every spawned worker runs with.
#[derive(Debug)]
pub(crate) struct DeliveryWorker {
    pub(crate) tenant: TenantId,
    pub(crate) client: DeliveryClient,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) policy: RetryPolicy,
    pub(crate) registry: Arc<dyn WebhookRegistry>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) metrics: DeliveryMetrics,
    pub(crate) cancel: CancellationToken,
}

impl DeliveryWorker {
    /// Delivers `job` and records its outcome.
    pub(crate) async fn run(&self, job: DeliveryJob) -> OutcomeStatus {
        let started = self.clock.now();

        let attempt_chain =
            post_with_retry(&self.client, self.clock.as_ref(), &self.policy, &job, &self.cancel);

        let result = match AssertUnwindSafe(attempt_chain).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(DeliveryFailure {
                error: DeliveryError::internal(panic_message(panic.as_ref())),
                last_status: None,
                duration: self.clock.now().saturating_duration_since(started),
                attempts: 0,
            }),
        };

        match result {
            Ok(success) => {
                self.record_success(&job, &success).await;
                OutcomeStatus::Success
            },
            Err(failure) => {
                self.record_failure(&job, failure).await;
                OutcomeStatus::Error
            },
        }
    }

    async fn record_success(&self, job: &DeliveryJob, success: &DeliverySuccess) {
        self.metrics.record_outcome(&job.event, OutcomeStatus::Success, Some(success.duration));

        info!(
            delivery_id = %job.delivery_id,
            webhook_id = %job.webhook.id,
            event = %job.event,
            status = success.status_code,
            attempts = success.attempts,
            duration_ms = success.duration.as_millis(),
            "webhook delivered"
        );

        let hook = self.registry.record_success(
            job.webhook.id,
            success.status_code,
            success.duration,
        );
        report_to_registry(job, OutcomeStatus::Success, hook).await;

        let mut entry = self.audit_entry(job, OutcomeStatus::Success, success.attempts);
        entry.http_status = Some(success.status_code);
        entry.duration_ms = duration_ms(success.duration);
        self.audit.record(entry).await;
    }

    async fn record_failure(&self, job: &DeliveryJob, failure: DeliveryFailure) {
        self.metrics.record_outcome(&job.event, OutcomeStatus::Error, Some(failure.duration));

        let category = ErrorCategory::from(&failure.error);
        let message = failure.error.to_string();

        warn!(
            delivery_id = %job.delivery_id,
            webhook_id = %job.webhook.id,
            event = %job.event,
            status = ?failure.last_status,
            attempts = failure.attempts,
            duration_ms = failure.duration.as_millis(),
            category = %category,
            error = %message,
            "webhook delivery failed"
        );

        let hook = self.registry.record_failure(
            job.webhook.id,
            message.clone(),
            failure.last_status,
            failure.duration,
        );
        report_to_registry(job, OutcomeStatus::Error, hook).await;

        let mut entry = self.audit_entry(job, OutcomeStatus::Error, failure.attempts);
        entry.http_status = failure.last_status;
        entry.duration_ms = duration_ms(failure.duration);
        entry.error = Some(message);
        entry.error_category = Some(category.to_string());
        self.audit.record(entry).await;
    }

    fn audit_entry(&self, job: &DeliveryJob, status: OutcomeStatus, attempts: u32) -> AuditEntry {
        AuditEntry {
            delivery_id: job.delivery_id,
            tenant_id: self.tenant.clone(),
            webhook_id: job.webhook.id,
            url: job.webhook.url.clone(),
            event: job.event.to_string(),
            payload: job.payload.as_ref().clone(),
            status,
            http_status: None,
            attempts,
            duration_ms: 0,
            error: None,
            error_category: None,
            recorded_at: DateTime::<Utc>::from(self.clock.now_system()),
        }
    }
}

/// Awaits a registry hook. Errors and panics are logged so the audit
/// entry is still written.
async fn report_to_registry(
    job: &DeliveryJob,
    outcome: OutcomeStatus,
    hook: impl Future<Output = herald_core::Result<()>>,
) {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => {
            warn!(webhook_id = %job.webhook.id, %outcome, error = %e, "failed to record delivery");
        },
        Err(panic) => {
            warn!(
                webhook_id = %job.webhook.id,
                %outcome,
                panic = %panic_message(panic.as_ref()),
                "registry hook panicked"
            );
        },
    }
}

fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_string()
    }
}
