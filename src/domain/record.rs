//! Transfer record
//!
//! The persisted form of a transfer intent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amount::Amount;
use super::request::TransferRequest;

/// Persisted transfer intent. Created once per successful transfer, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transfer_id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
}

impl TransferRecord {
    pub fn new(transfer_id: Uuid, request: &TransferRequest) -> Self {
        Self {
            transfer_id,
            sender_id: request.sender_id().to_string(),
            recipient_id: request.recipient_id().to_string(),
            amount: request.amount().clone(),
            created_at: Utc::now(),
        }
    }
}
