//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{TransferRecord, TransferRequest};
use crate::error::{AppError, AppResult};

use super::AppState;

/// Header carrying the caller's idempotency key
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

// =========================================================================
// Request/Response types
// =========================================================================

/// Amount as sent by the client, either `"100.50"` or `100.50`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    fn as_text(&self) -> String {
        match self {
            AmountInput::Text(s) => s.clone(),
            AmountInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    pub sender_id: String,
    pub recipient_id: String,
    pub amount: AmountInput,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub success: bool,
    pub transfer_id: Uuid,
    pub replayed: bool,
}

#[derive(Debug, Serialize)]
pub struct TransferDetailResponse {
    pub transfer_id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    pub amount: String,
    pub created_at: DateTime<Utc>,
}

impl From<TransferRecord> for TransferDetailResponse {
    fn from(record: TransferRecord) -> Self {
        Self {
            transfer_id: record.transfer_id,
            sender_id: record.sender_id,
            recipient_id: record.recipient_id,
            amount: record.amount.to_string(),
            created_at: record.created_at,
        }
    }
}

// =========================================================================
// Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/transfers", post(create_transfer))
        .route("/transfers/:transfer_id", get(get_transfer))
}

/// Parse the optional `Idempotency-Key` header
fn idempotency_key(headers: &HeaderMap) -> AppResult<Option<Uuid>> {
    let Some(value) = headers.get(IDEMPOTENCY_KEY_HEADER) else {
        return Ok(None);
    };
    let text = value
        .to_str()
        .map_err(|_| AppError::InvalidIdempotencyKey("[invalid utf8]".to_string()))?;
    Uuid::parse_str(text.trim())
        .map(Some)
        .map_err(|_| AppError::InvalidIdempotencyKey(text.to_string()))
}

// =========================================================================
// POST /transfers
// =========================================================================

/// Run a transfer
async fn create_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<CreateTransferRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<TransferResponse>)> {
    let Json(request) = body?;
    let idem_key = idempotency_key(&headers)?;
    let transfer = TransferRequest::parse(
        &request.sender_id,
        &request.recipient_id,
        &request.amount.as_text(),
    )?;

    let receipt = state.orchestrator.execute(&transfer, idem_key).await?;

    let status = if receipt.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(TransferResponse {
            success: true,
            transfer_id: receipt.transfer_id,
            replayed: receipt.replayed,
        }),
    ))
}

// =========================================================================
// GET /transfers/:transfer_id
// =========================================================================

/// Look up a committed transfer record
async fn get_transfer(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<TransferDetailResponse>> {
    let Path(transfer_id) = path?;
    let record = state
        .store
        .find(transfer_id)
        .await?
        .ok_or(AppError::TransferNotFound(transfer_id))?;

    Ok(Json(record.into()))
}
