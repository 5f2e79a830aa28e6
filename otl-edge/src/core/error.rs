use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Main error type for edge cache operations
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Upstream returned {status} for {url}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid lifecycle transition: cannot {action} while {phase}")]
    InvalidPhase { action: &'static str, phase: String },

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl EdgeError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Network(_) | Self::UpstreamStatus { .. } => StatusCode::BAD_GATEWAY,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidPhase { .. } => StatusCode::CONFLICT,
            Self::InstallFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_)
            | Self::IoError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for EdgeError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for EdgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Implement IntoResponse for Axum integration
impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// Result type alias for edge cache operations
pub type Result<T> = std::result::Result<T, EdgeError>;
