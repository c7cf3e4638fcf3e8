//! Integration tests for the attempt sequence.
//!
//! Drives `post_with_retry` against a mock receiver with a virtual clock so
//! backoff schedules can be asserted exactly.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use herald_core::TestClock;
use herald_delivery::{
    client::{ATTEMPT_HEADER, DELIVERY_ID_HEADER},
    job::DeliveryJob,
    post_with_retry, DeliveryClient, DeliveryError, RetryPolicy,
};
use herald_testing::{message_payload, MockEndpoint, TestEnv, WebhookBuilder};
use http::StatusCode;
use tokio_util::sync::CancellationToken;

fn job_for(url: String) -> DeliveryJob {
    let webhook = WebhookBuilder::new(url).build();
    DeliveryJob::new(
        Arc::new(webhook),
        Arc::from("message"),
        Arc::new(message_payload("hello")),
        std::time::Instant::now(),
    )
}

fn policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        attempt_timeout: Duration::from_secs(2),
        ..RetryPolicy::default()
    }
}

#[tokio::test]
async fn zero_max_attempts_still_attempts_once() -> Result<()> {
    let env = TestEnv::new().await;
    let unavailable = MockEndpoint::failure("/hook", StatusCode::SERVICE_UNAVAILABLE);
    env.http_mock.mock_endpoint(unavailable).await;

    let client = DeliveryClient::with_defaults()?;
    let clock = TestClock::new();
    let job = job_for(env.http_mock.endpoint_url("/hook"));

    let failure = post_with_retry(&client, &clock, &policy(0), &job, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.last_status, Some(503));
    env.http_mock.assert_request_count(1).await;
    assert!(clock.recorded_sleeps().is_empty());
    Ok(())
}

#[tokio::test]
async fn single_attempt_policy_never_retries() -> Result<()> {
    let env = TestEnv::new().await;
    env.http_mock.mock_endpoint(MockEndpoint::failure("/hook", StatusCode::BAD_GATEWAY)).await;

    let client = DeliveryClient::with_defaults()?;
    let clock = TestClock::new();
    let job = job_for(env.http_mock.endpoint_url("/hook"));

    let failure = post_with_retry(&client, &clock, &policy(1), &job, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 1);
    assert!(matches!(failure.error, DeliveryError::ServerError { status_code: 502, .. }));
    env.http_mock.assert_request_count(1).await;
    Ok(())
}

#[tokio::test]
async fn backoff_doubles_between_attempts() -> Result<()> {
    let env = TestEnv::new().await;
    let unavailable = MockEndpoint::failure("/hook", StatusCode::SERVICE_UNAVAILABLE);
    env.http_mock.mock_endpoint(unavailable).await;

    let client = DeliveryClient::with_defaults()?;
    let clock = TestClock::new();
    let job = job_for(env.http_mock.endpoint_url("/hook"));

    let failure = post_with_retry(&client, &clock, &policy(4), &job, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 4);
    assert_eq!(
        clock.recorded_sleeps(),
        vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]
    );
    assert_eq!(failure.duration, Duration::from_millis(700));

    let requests = env.http_mock.requests_to("/hook").await;
    assert_eq!(requests.len(), 4);

    let delivery_id = job.delivery_id.to_string();
    for (index, request) in requests.iter().enumerate() {
        assert_eq!(request.header(ATTEMPT_HEADER), Some((index + 1).to_string().as_str()));
        assert_eq!(request.header(DELIVERY_ID_HEADER), Some(delivery_id.as_str()));
    }
    Ok(())
}

#[tokio::test]
async fn succeeds_after_transient_failures() -> Result<()> {
    let env = TestEnv::new().await;
    env.http_mock
        .mock_sequence("/hook")
        .respond_with(503)
        .respond_with(500)
        .respond_with(200)
        .build()
        .await;

    let client = DeliveryClient::with_defaults()?;
    let clock = TestClock::new();
    let job = job_for(env.http_mock.endpoint_url("/hook"));

    let success = post_with_retry(&client, &clock, &policy(3), &job, &CancellationToken::new())
        .await
        .map_err(|failure| failure.error)?;

    assert_eq!(success.status_code, 200);
    assert_eq!(success.attempts, 3);
    assert_eq!(success.duration, Duration::from_millis(300));
    Ok(())
}

#[tokio::test]
async fn client_errors_are_retried() -> Result<()> {
    let env = TestEnv::new().await;
    env.http_mock.mock_endpoint(MockEndpoint::failure("/hook", StatusCode::NOT_FOUND)).await;

    let client = DeliveryClient::with_defaults()?;
    let clock = TestClock::new();
    let job = job_for(env.http_mock.endpoint_url("/hook"));

    let failure = post_with_retry(&client, &clock, &policy(2), &job, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.last_status, Some(404));
    assert!(matches!(failure.error, DeliveryError::ClientError { status_code: 404, .. }));
    Ok(())
}

#[tokio::test]
async fn attempt_timeouts_are_retried() -> Result<()> {
    let env = TestEnv::new().await;
    env.http_mock.mock_endpoint(MockEndpoint::slow("/hook", Duration::from_millis(500))).await;

    let client = DeliveryClient::with_defaults()?;
    let clock = TestClock::new();
    let job = job_for(env.http_mock.endpoint_url("/hook"));
    let policy = RetryPolicy { attempt_timeout: Duration::from_millis(50), ..policy(2) };

    let failure = post_with_retry(&client, &clock, &policy, &job, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(failure.attempts, 2);
    assert_eq!(failure.last_status, None);
    assert!(matches!(failure.error, DeliveryError::Timeout { timeout_ms: 50 }));
    Ok(())
}

#[tokio::test]
async fn cancelled_chain_stops_without_sending() -> Result<()> {
    let env = TestEnv::new().await;
    env.http_mock.mock_endpoint(MockEndpoint::success("/hook")).await;

    let client = DeliveryClient::with_defaults()?;
    let clock = TestClock::new();
    let job = job_for(env.http_mock.endpoint_url("/hook"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let failure = post_with_retry(&client, &clock, &policy(3), &job, &cancel).await.unwrap_err();

    assert!(matches!(failure.error, DeliveryError::ShutdownRequested));
    assert_eq!(failure.attempts, 1);
    env.http_mock.assert_request_count(0).await;
    Ok(())
}
