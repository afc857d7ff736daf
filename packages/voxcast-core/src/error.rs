//! Centralized error types for the Voxcast core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

/// Application-wide error type for the Voxcast server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Client sent a malformed or semantically invalid request.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested action conflicts with the orchestrator's current state
    /// (e.g. `stop` while already stopped, a second concurrent `start`).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The requested preset, clip, or cache entry does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A required external collaborator failed (ffmpeg/ffprobe subprocess,
    /// TTS/STT adapter, filesystem write).
    #[error("Dependency failure: {0}")]
    Dependency(String),

    /// Anything else: programmer errors, invariant violations, unexpected
    /// I/O failures that don't fit the categories above.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Dependency(_) => "dependency_failure",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Dependency(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type AppResult<T> = Result<T, AppError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<crate::utils::MotionPathError> for AppError {
    fn from(err: crate::utils::MotionPathError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Per-action-item error surfaced from a batch request (`POST
/// /api/stream/text` with multiple actions, or a multi-clip generation
/// request). Carries context a generic [`AppError`] doesn't need: which
/// request this failure belongs to, so a client submitting several actions
/// can tell which one failed without losing the others.
#[derive(Debug, Clone, Serialize)]
pub struct ActionProcessingError {
    pub message: String,
    pub request_id: String,
    #[serde(skip)]
    pub status_code: StatusCode,
}

impl std::fmt::Display for ActionProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.request_id, self.message)
    }
}

impl std::error::Error for ActionProcessingError {}

impl ActionProcessingError {
    pub fn new(request_id: impl Into<String>, message: impl Into<String>, status_code: StatusCode) -> Self {
        Self {
            request_id: request_id.into(),
            message: message.into(),
            status_code,
        }
    }
}

/// Converts a per-item batch error into the generic error taxonomy at the
/// HTTP boundary, following the propagation policy: 4xx per-item failures
/// become `Validation`, everything else becomes `Internal`.
impl From<ActionProcessingError> for AppError {
    fn from(err: ActionProcessingError) -> Self {
        if err.status_code.is_client_error() {
            Self::Validation(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_returns_correct_code() {
        let err = AppError::Validation("bad input".into());
        assert_eq!(err.code(), "validation_error");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn conflict_returns_correct_code() {
        let err = AppError::Conflict("already running".into());
        assert_eq!(err.code(), "conflict");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn not_found_returns_correct_code() {
        let err = AppError::NotFound("preset missing".into());
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn dependency_failure_returns_bad_gateway() {
        let err = AppError::Dependency("ffmpeg exited 1".into());
        assert_eq!(err.code(), "dependency_failure");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn action_processing_error_client_status_maps_to_validation() {
        let err = ActionProcessingError::new("req-1", "bad field", StatusCode::BAD_REQUEST);
        let app_err: AppError = err.into();
        assert_eq!(app_err.code(), "validation_error");
    }

    #[test]
    fn action_processing_error_server_status_maps_to_internal() {
        let err = ActionProcessingError::new("req-1", "boom", StatusCode::INTERNAL_SERVER_ERROR);
        let app_err: AppError = err.into();
        assert_eq!(app_err.code(), "internal_error");
    }
}
