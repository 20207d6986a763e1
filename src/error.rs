use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::api::middleware::auth::AuthError;
use crate::services::lifecycle::LifecycleError;
use crate::services::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Archive transfer failed: {0}")]
    TransferFailure(String),

    #[error("Inconsistent state for account {account_id}: {detail}")]
    InconsistentState { account_id: Uuid, detail: String },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidOperation(_) => "INVALID_OPERATION",
            AppError::Conflict(_) => "CONFLICT",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Gone(_) => "ARCHIVED",
            AppError::TransferFailure(_) => "TRANSFER_FAILURE",
            AppError::InconsistentState { .. } => "INCONSISTENT_STATE",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();

        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InvalidOperation(msg)
            | AppError::Conflict(msg)
            | AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Gone(msg) => (StatusCode::GONE, msg),
            AppError::TransferFailure(msg) => {
                tracing::error!(error = %msg, "Archive transfer failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "Archive store unavailable, no change was applied".to_string(),
                )
            }
            AppError::InconsistentState { account_id, detail } => {
                tracing::error!(account_id = %account_id, detail = %detail, "Inconsistent account state");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!(
                        "Account {} needs manual reconciliation between stores",
                        account_id
                    ),
                )
            }
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Authentication required. Please log in.".to_string(),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "Administrator role required".to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "success": false,
            "message": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Database(e) => AppError::Database(e),
            StoreError::StaleVersion { .. } | StoreError::Duplicate(_) => {
                AppError::Conflict(error.to_string())
            }
            StoreError::Unavailable(msg) => AppError::Internal(msg),
        }
    }
}

impl From<LifecycleError> for AppError {
    fn from(error: LifecycleError) -> Self {
        match error {
            LifecycleError::NotFound(msg) => AppError::NotFound(msg),
            LifecycleError::InvalidOperation(msg) => AppError::InvalidOperation(msg),
            LifecycleError::Conflict(msg) => AppError::Conflict(msg),
            LifecycleError::Validation(msg) => AppError::Validation(msg),
            LifecycleError::Archived(numero) => {
                AppError::Gone(format!("Account {} has been archived", numero))
            }
            LifecycleError::TransferFailure(msg) => AppError::TransferFailure(msg),
            LifecycleError::InconsistentState { account_id, detail } => {
                AppError::InconsistentState { account_id, detail }
            }
            LifecycleError::Internal(msg) => AppError::Internal(msg),
            LifecycleError::Store(e) => e.into(),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Unauthorized => AppError::Unauthorized,
            AuthError::Forbidden => AppError::Forbidden,
            AuthError::SessionError => AppError::Internal("Session error occurred".to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_errors_map_to_status() {
        let cases = [
            (LifecycleError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                LifecycleError::InvalidOperation("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (LifecycleError::Conflict("x".into()), StatusCode::BAD_REQUEST),
            (LifecycleError::Archived("CP1".into()), StatusCode::GONE),
            (
                LifecycleError::TransferFailure("x".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (
                LifecycleError::InconsistentState {
                    account_id: Uuid::nil(),
                    detail: "x".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, status) in cases {
            let response = AppError::from(error).into_response();
            assert_eq!(response.status(), status);
        }
    }

    #[test]
    fn test_stale_version_is_conflict() {
        let error = AppError::from(StoreError::StaleVersion {
            id: Uuid::nil(),
            expected: 3,
        });
        assert!(matches!(error, AppError::Conflict(_)));
    }
}
