//! Error taxonomy shared across the engine.
//!
//! The variants mirror the failure taxonomy of the processing pipeline:
//! transport errors are retried, permanent-remote and validation errors are
//! archived and dropped, policy drops are silent, and local I/O errors are
//! surfaced and retried. See the queue and inbox modules for how each variant
//! is routed.

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde_json::json;
use thiserror::Error;

/// Result alias used throughout the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Requested object/user/index entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed input: JSON parse failure, missing required field, bad digest.
    #[error("validation error: {0}")]
    Validation(String),

    /// HTTP signature missing, malformed, or failing verification.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Dropped by policy: blocked instance, muted actor, filter match, account age.
    #[error("policy drop: {0}")]
    Policy(String),

    /// Network/DNS/TLS/timeout failure. Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Permanent remote rejection (4xx other than 408/429, or Gone).
    #[error("permanent remote error ({status}): {0}", status = .0.clone())]
    PermanentRemote(String),

    /// Local disk I/O failure (cannot write index, disk full, lock failure).
    #[error("local I/O error: {0}")]
    LocalIo(String),

    /// Conflict with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Configuration load failure or on-disk layout mismatch. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status this error should be reported as, for the thin server layer.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Policy(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Transport(_) | Self::PermanentRemote(_) => StatusCode::BAD_GATEWAY,
            Self::LocalIo(_) | Self::Config(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether this failure class is retried by the queue.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::LocalIo(_))
    }

    /// Short machine-readable error code, used in archived items and logs.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation",
            Self::Authentication(_) => "authentication",
            Self::Policy(_) => "policy",
            Self::Transport(_) => "transport",
            Self::PermanentRemote(_) => "permanent_remote",
            Self::LocalIo(_) => "local_io",
            Self::Conflict(_) => "conflict",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(error = %self, code, "server error");
        } else {
            tracing::debug!(error = %self, code, "client error");
        }

        let body = Json(json!({
            "error": { "code": code, "message": self.to_string() }
        }));

        (status, body).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::LocalIo(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transport(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<url::ParseError> for AppError {
    fn from(err: url::ParseError) -> Self {
        Self::Validation(format!("invalid URL: {err}"))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
