//! Idempotency module
//!
//! Lets callers retry a transfer safely: a key that already produced a
//! committed outcome is answered from that outcome instead of re-running.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long an idempotency key is remembered
pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

/// Committed outcome recorded against a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyOutcome {
    /// Record, withdrawal and deposit all committed
    Completed,
    /// Committed without a deposit; needs reconciliation
    FailedCommitted,
}

impl IdempotencyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyOutcome::Completed => "completed",
            IdempotencyOutcome::FailedCommitted => "failed_committed",
        }
    }
}

impl TryFrom<&str> for IdempotencyOutcome {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "completed" => Ok(IdempotencyOutcome::Completed),
            "failed_committed" => Ok(IdempotencyOutcome::FailedCommitted),
            other => Err(format!("unknown idempotency outcome '{}'", other)),
        }
    }
}

impl std::fmt::Display for IdempotencyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored idempotency key information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyEntry {
    pub key: Uuid,
    pub request_hash: String,
    pub transfer_id: Uuid,
    pub outcome: IdempotencyOutcome,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyEntry {
    pub fn new(
        key: Uuid,
        request_hash: impl Into<String>,
        transfer_id: Uuid,
        outcome: IdempotencyOutcome,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            key,
            request_hash: request_hash.into(),
            transfer_id,
            outcome,
            created_at,
            expires_at: created_at + Duration::hours(IDEMPOTENCY_TTL_HOURS),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
