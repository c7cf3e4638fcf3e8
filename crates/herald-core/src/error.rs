//! Error types for registry and audit collaborators.
//!
//! Collaborators that sit outside the delivery engine (webhook registries,
//! audit stores) report failures through [`CoreError`]. The engine logs these
//! and never lets them interrupt delivery.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error reported by registry and audit implementations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backing store of the registry could not be read or written.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Creates a registry error from any displayable cause.
    pub fn registry(cause: impl std::fmt::Display) -> Self {
        Self::Registry(cause.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_error_carries_cause() {
        let err = CoreError::registry("connection reset");
        assert_eq!(err.to_string(), "Registry error: connection reset");
    }

    #[test]
    fn serde_errors_convert() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: CoreError = parse.unwrap_err().into();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
