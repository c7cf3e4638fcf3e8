//! HTTP mocking utilities for webhook testing.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::Value;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer as WiremockServer, ResponseTemplate,
};

/// HTTP mock server standing in for webhook receivers.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Returns the base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Returns the full URL for `path`.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Configures an endpoint to return a specific response.
    pub async fn mock_endpoint(&self, endpoint: MockEndpoint) {
        let mut mock = Mock::given(method("POST")).and(path(endpoint.path.clone()));

        for (key, value) in &endpoint.expected_headers {
            mock = mock.and(header(key.as_str(), value.as_str()));
        }

        mock.respond_with(endpoint.response.into_template()).mount(&self.server).await;
    }

    /// Configures every POST to fail with `status`.
    pub async fn mock_endpoint_always_fail(&self, status: u16) {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Creates a builder for responses served once each, in order.
    pub fn mock_sequence(&self, path: impl Into<String>) -> MockSequenceBuilder<'_> {
        MockSequenceBuilder { server: &self.server, path: path.into(), responses: Vec::new() }
    }

    /// Returns all requests received by the server, in arrival order.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| RecordedRequest {
                method: request.method.to_string(),
                path: request.url.path().to_string(),
                headers: request.headers.clone(),
                body: Bytes::from(request.body),
            })
            .collect()
    }

    /// Returns requests received on `path`.
    pub async fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.received_requests().await.into_iter().filter(|r| r.path == path).collect()
    }

    /// Asserts that exactly n requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let requests = self.received_requests().await;
        assert_eq!(
            requests.len(),
            expected,
            "Expected {} requests, received {}",
            expected,
            requests.len()
        );
    }
}

/// Configuration for a mock endpoint.
pub struct MockEndpoint {
    /// Request path to match.
    pub path: String,
    /// Headers a request must carry to match.
    pub expected_headers: HashMap<String, String>,
    /// Response to serve.
    pub response: MockResponse,
}

impl MockEndpoint {
    /// Creates a mock endpoint that answers 200.
    pub fn success(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            expected_headers: HashMap::new(),
            response: MockResponse::Success { status: StatusCode::OK, body: Bytes::new() },
        }
    }

    /// Creates a mock endpoint that answers with `status`.
    pub fn failure(path: impl Into<String>, status: StatusCode) -> Self {
        Self {
            path: path.into(),
            expected_headers: HashMap::new(),
            response: MockResponse::Failure { status },
        }
    }

    /// Creates a mock endpoint that answers 200 after `delay`.
    pub fn slow(path: impl Into<String>, delay: Duration) -> Self {
        Self {
            path: path.into(),
            expected_headers: HashMap::new(),
            response: MockResponse::Delayed { status: StatusCode::OK, delay },
        }
    }

    /// Adds an expected header to the mock.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected_headers.insert(key.into(), value.into());
        self
    }

    /// Sets the response body of a success response.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        if let MockResponse::Success { status, .. } = self.response {
            self.response = MockResponse::Success { status, body: body.into() };
        }
        self
    }
}

/// Types of mock responses.
pub enum MockResponse {
    /// Immediate answer with a body.
    Success {
        /// Status code
        status: StatusCode,
        /// Response body
        body: Bytes,
    },
    /// Immediate answer without a body.
    Failure {
        /// Status code
        status: StatusCode,
    },
    /// Answer after a delay.
    Delayed {
        /// Status code
        status: StatusCode,
        /// Time before the response is sent
        delay: Duration,
    },
}

impl MockResponse {
    fn into_template(self) -> ResponseTemplate {
        match self {
            Self::Success { status, body } => {
                ResponseTemplate::new(status.as_u16()).set_body_bytes(body.to_vec())
            },
            Self::Failure { status } => ResponseTemplate::new(status.as_u16()),
            Self::Delayed { status, delay } => {
                ResponseTemplate::new(status.as_u16()).set_delay(delay)
            },
        }
    }
}

/// A recorded HTTP request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw request body.
    pub body: Bytes,
}

impl RecordedRequest {
    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|value| value.to_str().ok())
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.body)
    }
}

/// Builder for mock response sequences on one path.
pub struct MockSequenceBuilder<'a> {
    server: &'a WiremockServer,
    path: String,
    responses: Vec<u16>,
}

impl MockSequenceBuilder<'_> {
    /// Adds a response with the given status code.
    #[must_use]
    pub fn respond_with(mut self, status: u16) -> Self {
        self.responses.push(status);
        self
    }

    /// Mounts the sequence. Each response is served once, in order; later
    /// requests fall through to other mocks or a 404.
    pub async fn build(self) {
        for status in self.responses {
            Mock::given(method("POST"))
                .and(path(self.path.clone()))
                .respond_with(ResponseTemplate::new(status))
                .up_to_n_times(1)
                .mount(self.server)
                .await;
        }
    }
}

/// HTTP assertions for webhook testing.
pub mod assertions {
    use super::*;

    /// Asserts that a request contains the expected header.
    pub fn assert_header_present(request: &RecordedRequest, key: &str, value: &str) {
        let header_value =
            request.header(key).unwrap_or_else(|| panic!("Header '{key}' not present"));
        assert_eq!(header_value, value, "Header '{key}' has unexpected value");
    }

    /// Asserts that the request body matches expected JSON.
    pub fn assert_json_body(request: &RecordedRequest, expected: &Value) {
        let actual = request.json().expect("Failed to parse request body as JSON");
        assert_eq!(actual, *expected, "Request body does not match expected JSON");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn post(url: &str) -> u16 {
        let response =
            reqwest::Client::new().post(url).json(&serde_json::json!({})).send().await.unwrap();
        response.status().as_u16()
    }

    #[tokio::test]
    async fn mock_server_starts() {
        let server = MockServer::start().await;
        assert!(server.url().starts_with("http://"));
        assert_eq!(server.endpoint_url("/hook"), format!("{}/hook", server.url()));
    }

    #[tokio::test]
    async fn sequence_serves_responses_in_order() {
        let server = MockServer::start().await;
        server
            .mock_sequence("/hook")
            .respond_with(503)
            .respond_with(500)
            .respond_with(200)
            .build()
            .await;

        let url = server.endpoint_url("/hook");
        assert_eq!(post(&url).await, 503);
        assert_eq!(post(&url).await, 500);
        assert_eq!(post(&url).await, 200);

        let requests = server.requests_to("/hook").await;
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].json().unwrap(), serde_json::json!({}));
    }
}
