//! tunnelgate error types

use axum::http::StatusCode;
use thiserror::Error;

/// tunnelgate error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request rejected before it reached the queue
    #[error("Validation error: {0}")]
    Validation(String),

    /// No result arrived before the waiter's deadline
    #[error("Timed out waiting for job {0}")]
    Timeout(String),

    /// The agent returned a response the broker cannot deliver
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Reference agent error
    #[error("Agent error: {0}")]
    Agent(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// HTTP status reported to the caller for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Serialization(_) => StatusCode::BAD_REQUEST,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Agent(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result type alias for tunnelgate operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::Validation("Missing id".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Timeout("abc".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            Error::Upstream("bad base64".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Config("nope".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_serde_error_is_validation_status() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("Serialization error"));
    }
}
