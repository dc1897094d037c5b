//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{DomainError, FieldError};
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing X-API-Key header")]
    MissingApiKey,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Version conflict: concurrent modification detected")]
    VersionConflict,

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => AppError::VersionConflict,
            other => AppError::Store(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<crate::domain::ValidationErrors> for AppError {
    fn from(errors: crate::domain::ValidationErrors) -> Self {
        AppError::Domain(DomainError::Validation(errors))
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }

    pub fn error_code(&self) -> &'static str {
        self.classify().1
    }

    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::MissingApiKey => (StatusCode::UNAUTHORIZED, "missing_api_key"),
            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key"),
            AppError::PermissionDenied => (StatusCode::FORBIDDEN, "permission_denied"),
            AppError::VersionConflict => (StatusCode::CONFLICT, "version_conflict"),

            AppError::Domain(err) => match err {
                DomainError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
                DomainError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
                DomainError::InsufficientBalance { .. } => (StatusCode::BAD_REQUEST, "insufficient_balance"),
                DomainError::AlreadyProcessed { .. } => (StatusCode::CONFLICT, "already_processed"),
                DomainError::LoanNotFound(_) => (StatusCode::NOT_FOUND, "loan_not_found"),
                DomainError::MemberNotFound(_) => (StatusCode::NOT_FOUND, "member_not_found"),
                DomainError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "account_not_found"),
                DomainError::WithdrawalNotFound(_) => (StatusCode::NOT_FOUND, "withdrawal_not_found"),
                DomainError::Calculation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "calculation_error"),
            },

            AppError::Store(err) => match err {
                StoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                StoreError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate"),
                StoreError::VersionConflict { .. } => (StatusCode::CONFLICT, "version_conflict"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "persistence_error"),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.classify();

        let (error, details, fields) = match &self {
            AppError::Domain(DomainError::Validation(errors)) => (
                "Validation failed".to_string(),
                None,
                errors.errors().to_vec(),
            ),
            AppError::InvalidRequest(msg) => (self.to_string(), Some(msg.clone()), Vec::new()),
            _ if status.is_server_error() => {
                tracing::error!(error = %self, error_code, "Request failed");
                // Internal details stay in the log
                ("Internal server error".to_string(), None, Vec::new())
            }
            _ => (self.to_string(), None, Vec::new()),
        };

        let body = ErrorResponse {
            error,
            error_code: error_code.to_string(),
            details,
            fields,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_domain_error_status_codes() {
        let cases = [
            (DomainError::invalid_field("amount", "required"), StatusCode::UNPROCESSABLE_ENTITY),
            (
                DomainError::InvalidState {
                    entity: "loan",
                    id: Uuid::nil(),
                    action: "approve",
                    current: "paid".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (DomainError::insufficient_balance(dec!(10), dec!(5)), StatusCode::BAD_REQUEST),
            (
                DomainError::AlreadyProcessed {
                    id: Uuid::nil(),
                    status: "approved".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (DomainError::LoanNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_store_errors() {
        let conflict = AppError::from(StoreError::VersionConflict {
            entity: "loan",
            id: Uuid::nil(),
        });
        assert!(matches!(conflict, AppError::VersionConflict));

        let corrupt = AppError::from(StoreError::Corrupt("bad status".into()));
        assert_eq!(corrupt.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(corrupt.error_code(), "persistence_error");
    }
}
