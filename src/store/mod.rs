//! Transfer Record Store
//!
//! Durable storage for transfer records, the transactional outbox, and
//! idempotency keys. Every write made through a [`StoreTransaction`] becomes
//! visible only when that transaction commits.

mod memory;
mod postgres;

pub use memory::InMemoryTransferStore;
pub use postgres::PgTransferStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{EventEnvelope, TransferRecord};
use crate::idempotency::IdempotencyEntry;
use crate::publisher::PublishError;

/// Errors raised by the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint violated
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored row could not be decoded
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Map a sqlx error, surfacing unique violations as [`StoreError::Duplicate`].
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505") {
                return StoreError::Duplicate(db.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}

/// A message waiting in (or delivered from) the outbox
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxMessage {
    /// Commit-ordered sequence number
    pub id: i64,
    pub channel: String,
    pub envelope: EventEnvelope,
    pub attempts: i32,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set once the relay gave up on the message
    pub dead_lettered_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// Undelivered and already tried at least once
    pub fn is_blocking(&self) -> bool {
        self.delivered_at.is_none() && self.attempts > 0
    }
}

/// One open transactional boundary.
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert the transfer record
    async fn save(&mut self, record: &TransferRecord) -> Result<(), StoreError>;

    /// Enqueue an event for `channel` in the outbox
    async fn send(&mut self, channel: &str, envelope: &EventEnvelope) -> Result<(), PublishError>;

    /// Remember the outcome of an idempotent request
    async fn record_idempotency(&mut self, entry: &IdempotencyEntry) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Open a new transactional boundary
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Look up a committed transfer record
    async fn find(&self, transfer_id: Uuid) -> Result<Option<TransferRecord>, StoreError>;

    /// Look up a committed idempotency entry
    async fn find_idempotency(&self, key: Uuid) -> Result<Option<IdempotencyEntry>, StoreError>;

    /// Delete idempotency entries that expired before `now`
    async fn delete_expired_idempotency(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Relay-side access to the outbox
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Deliverable messages in commit order.
    ///
    /// Dead-lettered messages are excluded, as is any message behind an
    /// earlier undelivered message of the same transfer that already failed.
    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError>;

    async fn mark_delivered(&self, id: i64) -> Result<(), StoreError>;

    async fn mark_attempt_failed(&self, id: i64, error: &str) -> Result<(), StoreError>;

    /// Record a final failed attempt and stop retrying the message
    async fn dead_letter(&self, id: i64, error: &str) -> Result<(), StoreError>;

    /// Delete delivered messages older than `before`
    async fn purge_delivered(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}
