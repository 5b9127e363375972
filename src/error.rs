use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the Autosign application
#[derive(Error, Debug)]
pub enum AutosignError {
    // Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Batch errors
    #[error("A batch run is already in progress")]
    BatchAlreadyRunning,

    // Account errors
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    // Proxy errors
    #[error("No proxies available")]
    NoProxiesAvailable,

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // HTTP client errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Autosign operations
pub type Result<T> = std::result::Result<T, AutosignError>;

impl AutosignError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AutosignError::InvalidRequest(_)
            | AutosignError::InvalidProxyAddress(_)
            | AutosignError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AutosignError::AccountNotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AutosignError::BatchAlreadyRunning | AutosignError::AccountExists(_) => {
                StatusCode::CONFLICT
            }

            // 503 Service Unavailable
            AutosignError::NoProxiesAvailable => StatusCode::SERVICE_UNAVAILABLE,

            // 502 Bad Gateway
            AutosignError::Http(_) => StatusCode::BAD_GATEWAY,

            // 500 Internal Server Error
            AutosignError::Storage(_)
            | AutosignError::Serialization(_)
            | AutosignError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for AutosignError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "status": "error",
            "msg": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<url::ParseError> for AutosignError {
    fn from(err: url::ParseError) -> Self {
        AutosignError::InvalidConfig(err.to_string())
    }
}

/// Failure to obtain a usable proxy from the upstream provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    #[error("provider response could not be parsed: {0}")]
    Unparseable(String),

    #[error("liveness probe through {proxy} failed: {reason}")]
    ProbeFailed { proxy: String, reason: String },

    #[error("provider request failed: {0}")]
    Network(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            AutosignError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AutosignError::AccountNotFound("alice".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AutosignError::BatchAlreadyRunning.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AutosignError::AccountExists("alice".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AutosignError::NoProxiesAvailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AutosignError::Internal("boom".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_client_server_helpers() {
        assert!(AutosignError::BatchAlreadyRunning.is_client_error());
        assert!(!AutosignError::BatchAlreadyRunning.is_server_error());

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = AutosignError::from(io);
        assert!(err.is_server_error());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_acquire_error_display() {
        let err = AcquireError::ProbeFailed {
            proxy: "203.0.113.5:8080".to_string(),
            reason: "timed out".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "liveness probe through 203.0.113.5:8080 failed: timed out"
        );
    }
}
