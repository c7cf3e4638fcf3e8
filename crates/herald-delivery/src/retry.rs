//! Exponential backoff attempt sequence for one delivery job.
//!
//! [`post_with_retry`] runs attempts `1..=max_attempts` as a bounded loop.
//! Attempt `k` that fails with a retryable error is followed by a sleep of
//! `base_delay * 2^(k-1)`, capped at `max_delay` and optionally jittered.
//! The engine's cancellation token aborts an attempt or sleep in progress.

use std::time::Duration;

use herald_core::Clock;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    client::{DeliveryClient, DeliveryRequest},
    error::DeliveryError,
    job::DeliveryJob,
};

/// Retry policy for webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. `0` behaves as `1`.
    pub max_attempts: u32,

    /// Backoff unit: the delay after the first failed attempt.
    pub base_delay: Duration,

    /// Maximum delay between attempts.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0). `0.0` gives exact delays.
    pub jitter_factor: f64,

    /// Timeout for each HTTP attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.0,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Number of attempts every job gets, never less than one.
    pub fn effective_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let capped = self.base_delay.saturating_mul(multiplier).min(self.max_delay);

        apply_jitter(capped, self.jitter_factor).min(self.max_delay)
    }
}

/// Randomizes `duration` by up to ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}

/// Successful end of an attempt chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySuccess {
    /// 2xx status returned by the endpoint.
    pub status_code: u16,
    /// Time across all attempts and backoff sleeps.
    pub duration: Duration,
    /// Attempt that succeeded (1-based).
    pub attempts: u32,
}

/// Failed end of an attempt chain.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// Error of the last attempt.
    pub error: DeliveryError,
    /// Last HTTP status received during the chain, if any.
    pub last_status: Option<u16>,
    /// Time across all attempts and backoff sleeps.
    pub duration: Duration,
    /// Number of attempts made.
    pub attempts: u32,
}

/// Posts `job` until an attempt succeeds, attempts run out, a
/// non-retryable error occurs, or `cancel` fires.
///
/// # Errors
///
/// Returns [`DeliveryFailure`] describing the last error when the chain
/// ends without a 2xx answer. Cancellation yields
/// `DeliveryError::ShutdownRequested`.
pub async fn post_with_retry(
    client: &DeliveryClient,
    clock: &dyn Clock,
    policy: &RetryPolicy,
    job: &DeliveryJob,
    cancel: &CancellationToken,
) -> Result<DeliverySuccess, DeliveryFailure> {
    let started = clock.now();
    let max_attempts = policy.effective_attempts();
    let mut last_status = None;
    let mut attempt = 1;

    loop {
        let failure = |error: DeliveryError, last_status: Option<u16>, attempts: u32| {
            DeliveryFailure {
                error,
                last_status,
                duration: clock.now().saturating_duration_since(started),
                attempts,
            }
        };

        let request = DeliveryRequest::for_job(
            job,
            attempt,
            clock.epoch_millis(),
            policy.attempt_timeout,
        )
        .map_err(|e| failure(e, last_status, attempt))?;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(DeliveryError::ShutdownRequested),
            result = client.deliver(request) => result,
        };

        let error = match outcome {
            Ok(response) if response.is_success => {
                return Ok(DeliverySuccess {
                    status_code: response.status_code,
                    duration: clock.now().saturating_duration_since(started),
                    attempts: attempt,
                });
            },
            Ok(response) => {
                last_status = Some(response.status_code);
                DeliveryError::from_status(response.status_code, response.body)
            },
            Err(error) => error,
        };

        if attempt >= max_attempts || !error.is_retryable() {
            return Err(failure(error, last_status, attempt));
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::debug!(
            delivery_id = %job.delivery_id,
            attempt,
            delay_ms = delay.as_millis(),
            error = %error,
            "attempt failed, backing off"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(failure(DeliveryError::ShutdownRequested, last_status, attempt));
            },
            () = clock.sleep(delay) => {},
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_from_base() {
        let policy = RetryPolicy { base_delay: Duration::from_millis(100), ..Default::default() };

        let delays = (1..=5).map(|attempt| policy.delay_for_attempt(attempt)).collect::<Vec<_>>();

        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1600),
            ]
        );
    }

    #[test]
    fn max_delay_enforced() {
        let policy = RetryPolicy { max_delay: Duration::from_secs(60), ..Default::default() };

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn zero_attempts_clamp_to_one() {
        let policy = RetryPolicy { max_attempts: 0, ..Default::default() };
        assert_eq!(policy.effective_attempts(), 1);

        let policy = RetryPolicy { max_attempts: 5, ..Default::default() };
        assert_eq!(policy.effective_attempts(), 5);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base_delay = Duration::from_secs(10);
        let mut seen_delays = std::collections::HashSet::new();

        for _ in 0..20 {
            let jittered = apply_jitter(base_delay, 0.5);
            seen_delays.insert(jittered.as_millis());
        }

        assert!(seen_delays.len() > 1, "jitter should create variation");
        for &delay_ms in &seen_delays {
            assert!((5_000..=15_000).contains(&delay_ms), "delay out of range: {delay_ms}ms");
        }
    }

    #[test]
    fn no_jitter_by_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.jitter_factor, 0.0);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
    }
}
