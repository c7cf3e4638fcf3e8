//! Error types for webhook delivery operations.
//!
//! Covers per-attempt HTTP failures, admission rejections and replay
//! failures. Delivery errors never leave a worker: they are classified for
//! retry decisions and recorded in metrics and the audit trail.

use std::fmt;

use herald_core::{CoreError, WebhookId};
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Failure of a single delivery attempt or of the client setup.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Attempt exceeded its per-attempt timeout.
    #[error("request timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout that was exceeded, in milliseconds
        timeout_ms: u64,
    },

    /// HTTP response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx)
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Endpoint answered with a status outside 2xx, 4xx and 5xx.
    #[error("unexpected response: HTTP {status_code}")]
    UnexpectedStatus {
        /// HTTP status code
        status_code: u16,
    },

    /// HTTP client or request could not be built.
    #[error("invalid delivery configuration: {message}")]
    ConfigurationError {
        /// Configuration error message
        message: String,
    },

    /// Engine cancelled the attempt chain while shutting down.
    #[error("delivery cancelled by engine shutdown")]
    ShutdownRequested,

    /// Unexpected internal error, including worker panics.
    #[error("internal delivery error: {message}")]
    InternalError {
        /// Internal error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a client error from HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Maps a non-2xx response status to its error variant.
    pub fn from_status(status_code: u16, body: impl Into<String>) -> Self {
        match status_code {
            400..=499 => Self::client_error(status_code, body),
            500..=599 => Self::server_error(status_code, body),
            _ => Self::UnexpectedStatus { status_code },
        }
    }

    /// Returns the HTTP status carried by this error, if the endpoint answered.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::ClientError { status_code, .. }
            | Self::ServerError { status_code, .. }
            | Self::UnexpectedStatus { status_code } => Some(*status_code),
            _ => None,
        }
    }

    /// Determines if another attempt may follow this failure.
    ///
    /// Every answer from the endpoint other than 2xx is retried, 4xx
    /// included, as are network errors and timeouts. Configuration errors,
    /// shutdown cancellation and internal errors end the chain.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError { .. }
            | Self::Timeout { .. }
            | Self::ClientError { .. }
            | Self::ServerError { .. }
            | Self::UnexpectedStatus { .. } => true,

            Self::ConfigurationError { .. }
            | Self::ShutdownRequested
            | Self::InternalError { .. } => false,
        }
    }
}

/// Category of delivery error for audit entries and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network connectivity issues.
    Network,
    /// Per-attempt timeout.
    Timeout,
    /// HTTP client errors (4xx).
    Client,
    /// HTTP server errors (5xx) and other unexpected statuses.
    Server,
    /// Configuration problems.
    Configuration,
    /// Engine shutdown.
    Shutdown,
    /// Internal system errors.
    Internal,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NetworkError { .. } => Self::Network,
            DeliveryError::Timeout { .. } => Self::Timeout,
            DeliveryError::ClientError { .. } => Self::Client,
            DeliveryError::ServerError { .. } | DeliveryError::UnexpectedStatus { .. } => {
                Self::Server
            },
            DeliveryError::ConfigurationError { .. } => Self::Configuration,
            DeliveryError::ShutdownRequested => Self::Shutdown,
            DeliveryError::InternalError { .. } => Self::Internal,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Configuration => write!(f, "configuration"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Why admission control rejected a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Queue was at `queue_limit`.
    QueueFull,
    /// Engine was draining or stopped.
    Draining,
    /// Job was still queued when the shutdown deadline passed.
    ShutdownTimeout,
}

impl DropReason {
    /// Returns the label used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Draining => "draining",
            Self::ShutdownTimeout => "shutdown_timeout",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to replay an audited delivery.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Registry has no webhook with this ID.
    #[error("webhook {0} not found")]
    WebhookNotFound(WebhookId),

    /// Webhook exists but is disabled.
    #[error("webhook {0} is inactive")]
    WebhookInactive(WebhookId),

    /// Registry lookup failed.
    #[error("registry lookup failed: {0}")]
    Registry(#[from] CoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_endpoint_answer_is_retryable() {
        assert!(DeliveryError::network("connection refused").is_retryable());
        assert!(DeliveryError::timeout(10_000).is_retryable());
        assert!(DeliveryError::client_error(404, "not found").is_retryable());
        assert!(DeliveryError::server_error(503, "unavailable").is_retryable());
        assert!(DeliveryError::from_status(302, "").is_retryable());

        assert!(!DeliveryError::configuration("relative URL").is_retryable());
        assert!(!DeliveryError::ShutdownRequested.is_retryable());
        assert!(!DeliveryError::internal("worker panicked").is_retryable());
    }

    #[test]
    fn status_mapping_and_extraction() {
        assert!(matches!(
            DeliveryError::from_status(429, "slow down"),
            DeliveryError::ClientError { status_code: 429, .. }
        ));
        assert!(matches!(
            DeliveryError::from_status(500, ""),
            DeliveryError::ServerError { status_code: 500, .. }
        ));
        assert_eq!(DeliveryError::from_status(302, "").http_status(), Some(302));
        assert_eq!(DeliveryError::network("reset").http_status(), None);
    }

    #[test]
    fn error_categories_mapped_correctly() {
        assert_eq!(ErrorCategory::from(&DeliveryError::network("test")), ErrorCategory::Network);
        assert_eq!(ErrorCategory::from(&DeliveryError::timeout(5)), ErrorCategory::Timeout);
        assert_eq!(
            ErrorCategory::from(&DeliveryError::client_error(400, "bad request")),
            ErrorCategory::Client
        );
        assert_eq!(
            ErrorCategory::from(&DeliveryError::ShutdownRequested).to_string(),
            "shutdown"
        );
    }

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(250).to_string(), "request timeout after 250ms");
        assert_eq!(DropReason::QueueFull.to_string(), "queue_full");
        assert_eq!(DropReason::ShutdownTimeout.to_string(), "shutdown_timeout");
    }
}
