//! Structured API error responses
//!
//! Every failure crosses the HTTP boundary as `{kind, message, retryable}`
//! with the kind repeated in the `x-error-code` header.

use axum::http::header::HeaderName;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::{AccessError, IdentityError};
use crate::infra::{SinkError, SyncError};
use crate::log::LogError;

// ============================================================================
// Error Kinds
// ============================================================================

/// Stable, machine-readable error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    /// Unauthorized append or owner-only operation
    PermissionDenied,
    /// Operation not allowed in the engine's current state
    FailedPrecondition,
    /// Transient sink failure
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::FailedPrecondition => StatusCode::CONFLICT,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
            ErrorKind::FailedPrecondition => "FAILED_PRECONDITION",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Response
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether the same request may succeed later
    pub retryable: bool,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind == ErrorKind::Unavailable,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.kind.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = HeaderValue::from_static(self.kind.as_str());
        let mut response = (status, Json(self)).into_response();
        response
            .headers_mut()
            .insert(HeaderName::from_static("x-error-code"), code);
        response
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<SinkError> for ApiError {
    fn from(err: SinkError) -> Self {
        let retryable = err.is_retryable();
        match err {
            SinkError::InvalidData(msg) => ApiError::invalid_argument(msg),
            other if retryable => ApiError::new(ErrorKind::Unavailable, other.to_string()),
            other => {
                error!(error = %other, "Sink error");
                ApiError::internal(other.to_string())
            }
        }
    }
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::AppendUnauthorized { .. } => {
                ApiError::new(ErrorKind::PermissionDenied, err.to_string())
            }
            LogError::UnknownCursor(_) | LogError::InvalidEntry(_) => {
                ApiError::invalid_argument(err.to_string())
            }
            LogError::Internal(_) => {
                error!(error = %err, "Log error");
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Sink(e) => e.into(),
            SyncError::Log(e) => e.into(),
            SyncError::BatchNotFound(_) => ApiError::not_found(err.to_string()),
            SyncError::InvalidArgument(_) => ApiError::invalid_argument(err.to_string()),
            SyncError::InvalidState { .. } | SyncError::EngineStopped => {
                ApiError::new(ErrorKind::FailedPrecondition, err.to_string())
            }
            SyncError::BatchExhausted { .. } => {
                ApiError::new(ErrorKind::Unavailable, err.to_string()).with_retryable(false)
            }
            SyncError::Configuration(_) | SyncError::Internal(_) => {
                error!(error = %err, "Sync error");
                ApiError::internal(err.to_string())
            }
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotOwner(_) => ApiError::new(ErrorKind::PermissionDenied, err.to_string()),
            AccessError::StalePolicy { .. } => {
                ApiError::new(ErrorKind::FailedPrecondition, err.to_string())
            }
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::KeyDerivation(_) => ApiError::invalid_argument(err.to_string()),
            IdentityError::UnknownIdentity(_) => ApiError::not_found(err.to_string()),
            IdentityError::KeystoreMismatch { .. } | IdentityError::Keystore(_) => {
                error!(error = %err, "Identity error");
                ApiError::internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SyncState;

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_value(ApiError::not_found("missing")).unwrap();
        assert_eq!(json["kind"], "NOT_FOUND");
        assert_eq!(json["retryable"], false);
    }

    #[test]
    fn test_unauthorized_append_is_permission_denied() {
        let err: ApiError = SyncError::Log(LogError::AppendUnauthorized {
            writer: "0xabc".into(),
        })
        .into();
        assert_eq!(err.kind, ErrorKind::PermissionDenied);
        assert!(!err.retryable);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_transient_sink_error_is_retryable() {
        let err: ApiError = SyncError::Sink(SinkError::Unavailable("down".into())).into();
        assert_eq!(err.kind, ErrorKind::Unavailable);
        assert!(err.retryable);

        let err: ApiError = SyncError::InvalidState {
            operation: "trigger",
            state: SyncState::Paused,
        }
        .into();
        assert_eq!(err.kind, ErrorKind::FailedPrecondition);
    }

    #[test]
    fn test_error_code_header() {
        let response = ApiError::invalid_argument("bad").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("x-error-code").unwrap(),
            "INVALID_ARGUMENT"
        );
    }
}
