//! HTTP client for webhook delivery.
//!
//! Builds the wire request (JSON body `{event, timestamp, data}` plus the
//! `X-Webhook-*` headers), applies the per-attempt timeout and maps
//! transport failures to [`DeliveryError`] variants. Non-2xx answers are
//! returned as responses; the retry layer decides what they mean.

use std::time::{Duration, Instant};

use bytes::Bytes;
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::{
    error::{DeliveryError, Result},
    job::DeliveryJob,
};

/// Header carrying the event name.
pub const EVENT_HEADER: &str = "X-Webhook-Event";
/// Header carrying the delivery ID, stable across attempts.
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery-Id";
/// Header carrying the 1-based attempt number.
pub const ATTEMPT_HEADER: &str = "X-Webhook-Attempt";

const MAX_RECORDED_BODY_SIZE: usize = 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Upper bound on any single request, applied client-wide.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Herald-Webhook-Delivery/1.0".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// JSON body posted to every webhook.
#[derive(Debug, Serialize)]
pub struct WebhookBody<'a> {
    /// Event name.
    pub event: &'a str,
    /// Milliseconds since the Unix epoch at attempt time.
    pub timestamp: u64,
    /// Event payload.
    pub data: &'a serde_json::Value,
}

/// One HTTP attempt of a delivery job.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Delivery ID of the job.
    pub delivery_id: Uuid,
    /// Destination URL.
    pub url: String,
    /// Event name, sent as `X-Webhook-Event`.
    pub event: String,
    /// Serialized JSON body.
    pub body: Bytes,
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// Timeout for this attempt.
    pub timeout: Duration,
}

impl DeliveryRequest {
    /// Builds the request for attempt `attempt_number` of `job`.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::InternalError` if the payload cannot be
    /// serialized.
    pub fn for_job(
        job: &DeliveryJob,
        attempt_number: u32,
        timestamp: u64,
        timeout: Duration,
    ) -> Result<Self> {
        let body = WebhookBody { event: job.event.as_ref(), timestamp, data: job.payload.as_ref() };
        let body = serde_json::to_vec(&body)
            .map_err(|e| DeliveryError::internal(format!("failed to encode payload: {e}")))?;

        Ok(Self {
            delivery_id: job.delivery_id,
            url: job.url().to_string(),
            event: job.event.to_string(),
            body: Bytes::from(body),
            attempt_number,
            timeout,
        })
    }
}

/// Response from a webhook delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated for recording.
    pub body: String,
    /// Duration of the request.
    pub duration: Duration,
    /// Whether the request was successful (2xx status).
    pub is_success: bool,
}

impl DeliveryResponse {
    /// Converts a non-2xx response into its delivery error.
    pub fn into_error(self) -> Option<DeliveryError> {
        (!self.is_success).then(|| DeliveryError::from_status(self.status_code, self.body))
    }
}

/// HTTP client shared by every worker of an engine.
///
/// Wraps a pooled `reqwest::Client`; cloning is cheap.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
}

impl DeliveryClient {
    /// Creates a new delivery client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be configured with the provided settings.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client })
    }

    /// Creates a new delivery client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(&ClientConfig::default())
    }

    /// Performs one delivery attempt.
    ///
    /// # Errors
    ///
    /// - `Timeout` when the attempt exceeds `request.timeout`
    /// - `NetworkError` for connection and transport failures
    /// - `ConfigurationError` when the request cannot be built, e.g. a
    ///   malformed URL
    ///
    /// Any HTTP answer, 2xx or not, is `Ok`.
    pub async fn deliver(&self, request: DeliveryRequest) -> Result<DeliveryResponse> {
        let start_time = Instant::now();

        let span = info_span!(
            "webhook_attempt",
            delivery_id = %request.delivery_id,
            event = %request.event,
            url = %request.url,
            attempt = request.attempt_number
        );

        async move {
            tracing::debug!("sending webhook");

            let response = self
                .client
                .post(&request.url)
                .timeout(request.timeout)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(EVENT_HEADER, &request.event)
                .header(DELIVERY_ID_HEADER, request.delivery_id.to_string())
                .header(ATTEMPT_HEADER, request.attempt_number.to_string())
                .body(request.body)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(
                        duration_ms = start_time.elapsed().as_millis(),
                        error = %e,
                        "request failed"
                    );
                    return Err(classify_transport_error(&e, request.timeout));
                },
            };

            let delivery_response = read_response(response, start_time).await;

            if delivery_response.is_success {
                tracing::debug!(
                    status = delivery_response.status_code,
                    duration_ms = delivery_response.duration.as_millis(),
                    "endpoint accepted webhook"
                );
            } else {
                tracing::warn!(
                    status = delivery_response.status_code,
                    duration_ms = delivery_response.duration.as_millis(),
                    "endpoint rejected webhook"
                );
            }

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }
}

fn classify_transport_error(error: &reqwest::Error, timeout: Duration) -> DeliveryError {
    if error.is_timeout() {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        return DeliveryError::timeout(timeout_ms);
    }
    if error.is_builder() {
        return DeliveryError::configuration(format!("invalid request: {error}"));
    }
    if error.is_connect() {
        return DeliveryError::network(format!("connection failed: {error}"));
    }
    DeliveryError::network(error.to_string())
}

async fn read_response(response: Response, start_time: Instant) -> DeliveryResponse {
    let status_code = response.status().as_u16();
    let is_success = response.status().is_success();

    let body = match response.bytes().await {
        Ok(bytes) => truncate_body(&bytes),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read response body");
            format!("[failed to read response body: {e}]")
        },
    };

    DeliveryResponse { status_code, body, duration: start_time.elapsed(), is_success }
}

fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() > MAX_RECORDED_BODY_SIZE {
        let suffix = "... (truncated)";
        let max_content = MAX_RECORDED_BODY_SIZE - suffix.len();
        let truncated = String::from_utf8_lossy(&bytes[..max_content]);
        format!("{truncated}{suffix}")
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use herald_core::{Subscriptions, Webhook};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn job_for(url: String) -> DeliveryJob {
        let webhook = Webhook::new(url, Subscriptions::All);
        DeliveryJob::new(
            Arc::new(webhook),
            Arc::from("message"),
            Arc::new(serde_json::json!({"from": "alice", "body": "hello"})),
            Instant::now(),
        )
    }

    fn request_for(url: String, timeout: Duration) -> DeliveryRequest {
        DeliveryRequest::for_job(&job_for(url), 1, 1_700_000_000_000, timeout).unwrap()
    }

    #[tokio::test]
    async fn successful_delivery_sends_wire_contract() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("content-type", "application/json"))
            .and(matchers::header(EVENT_HEADER, "message"))
            .and(matchers::header(ATTEMPT_HEADER, "1"))
            .and(matchers::header_exists(DELIVERY_ID_HEADER))
            .and(matchers::body_json(serde_json::json!({
                "event": "message",
                "timestamp": 1_700_000_000_000_u64,
                "data": {"from": "alice", "body": "hello"},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let request = request_for(format!("{}/hook", mock_server.uri()), Duration::from_secs(5));

        let response = client.deliver(request).await.unwrap();
        assert_eq!(response.status_code, 200);
        assert!(response.is_success);
        assert_eq!(response.body, "OK");
        assert!(response.into_error().is_none());
    }

    #[tokio::test]
    async fn non_success_status_is_returned_not_raised() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let request = request_for(format!("{}/hook", mock_server.uri()), Duration::from_secs(5));

        let response = client.deliver(request).await.unwrap();
        assert_eq!(response.status_code, 404);
        assert!(!response.is_success);

        let error = response.into_error().unwrap();
        assert!(matches!(error, DeliveryError::ClientError { status_code: 404, .. }));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let client = DeliveryClient::with_defaults().unwrap();
        let request = request_for(format!("{}/hook", mock_server.uri()), Duration::from_millis(50));

        let error = client.deliver(request).await.unwrap_err();
        assert!(matches!(error, DeliveryError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        let client = DeliveryClient::with_defaults().unwrap();
        let request = request_for("http://127.0.0.1:1/hook".to_string(), Duration::from_secs(2));

        let error = client.deliver(request).await.unwrap_err();
        assert!(matches!(error, DeliveryError::NetworkError { .. }));
        assert!(error.is_retryable());
    }

    #[test]
    fn bodies_over_recording_cap_are_truncated() {
        for size in [MAX_RECORDED_BODY_SIZE + 1, 60 * 1024, 65 * 1024] {
            let recorded = truncate_body(&vec![b'x'; size]);
            assert_eq!(recorded.len(), MAX_RECORDED_BODY_SIZE, "body of {size} bytes");
            assert!(recorded.ends_with("... (truncated)"));
        }

        let at_cap = vec![b'y'; MAX_RECORDED_BODY_SIZE];
        assert_eq!(truncate_body(&at_cap).len(), MAX_RECORDED_BODY_SIZE);
        assert!(!truncate_body(&at_cap).ends_with("... (truncated)"));
        assert_eq!(truncate_body(b"ok"), "ok");
    }
}
