//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use uuid::Uuid;

use crate::domain::ValidationError;
use crate::orchestrator::{TransferFault, TransferOutcome, TransferServiceError};
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Invalid Idempotency-Key header: {0}")]
    InvalidIdempotencyKey(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(Uuid),

    #[error(transparent)]
    Transfer(#[from] TransferServiceError),

    // Server errors (5xx)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AppError {
    fn transfer_status(err: &TransferServiceError) -> (StatusCode, &'static str, Option<String>) {
        let transfer_id = err.transfer_id.map(|id| id.to_string());
        match (&err.outcome, &err.fault) {
            (_, TransferFault::IdempotencyConflict(_)) => {
                (StatusCode::CONFLICT, "idempotency_conflict", None)
            }
            (TransferOutcome::Rejected, _) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "transfer_rejected", None)
            }
            (TransferOutcome::Aborted, fault) if fault.is_remote() => {
                (StatusCode::SERVICE_UNAVAILABLE, "transfer_aborted", transfer_id)
            }
            (TransferOutcome::Aborted, _) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "transfer_aborted", transfer_id)
            }
            (TransferOutcome::FailedButCommitted, _) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "transfer_failed_committed",
                transfer_id,
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }
            AppError::Validation(e) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(e.to_string()))
            }
            AppError::InvalidIdempotencyKey(value) => {
                (StatusCode::BAD_REQUEST, "invalid_idempotency_key", Some(value.clone()))
            }

            // 404 Not Found
            AppError::TransferNotFound(id) => {
                (StatusCode::NOT_FOUND, "transfer_not_found", Some(id.to_string()))
            }

            // Transfer failures: 409, 503 or 500 depending on the outcome
            AppError::Transfer(e) => AppError::transfer_status(e),

            // 500 Internal Server Error
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
