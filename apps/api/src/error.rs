//! # API Errors
//!
//! Every failure leaves the service as
//! `{"error_type": "...", "message": "...", "retryable": bool}`.
//!
//! ```text
//!   CoreError ──┐
//!               ├──► ErrorKind ──► HTTP status + error_type
//!   DbError ────┘
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use meridian_core::{CoreError, ErrorKind, ValidationError};
use meridian_db::DbError;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub error_type: &'static str,
    pub message: String,
    pub retryable: bool,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        ApiError {
            kind,
            error_type: kind.as_str(),
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::new(ErrorKind::Validation, message)
    }

    pub fn status(&self) -> StatusCode {
        match self.kind {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::InsufficientStock | ErrorKind::IntegrityConflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        let kind = err.kind();
        if kind == ErrorKind::Internal {
            error!(error = %err, "Internal database error");
        }
        ApiError {
            kind,
            error_type: kind.as_str(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::new(err.kind(), err.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::from(CoreError::Validation(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err = ApiError::from(DbError::Timeout { seconds: 10 });
        assert_eq!(err.error_type, "timeout");
        assert!(err.retryable);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_not_found() {
        let err = ApiError::from(DbError::not_found("Sale", 9));
        assert_eq!(err.error_type, "not_found");
        assert!(!err.retryable);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_duplicate_is_conflict() {
        let err = ApiError::from(DbError::duplicate("barcode", "4780001"));
        assert_eq!(err.error_type, "integrity_conflict");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_body_shape() {
        let body = serde_json::to_value(ApiError::validation("quantity must be positive")).unwrap();
        assert_eq!(body["error_type"], "validation_error");
        assert_eq!(body["retryable"], false);
        assert!(body.get("kind").is_none());
    }
}
