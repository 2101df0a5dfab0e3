//! PostgreSQL store
//!
//! The record insert, the outbox inserts and the idempotency insert share one
//! database transaction, so the outbox is exactly as durable as the record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{Amount, EventEnvelope, TransferRecord};
use crate::idempotency::{IdempotencyEntry, IdempotencyOutcome};
use crate::publisher::PublishError;

use super::{OutboxMessage, OutboxStore, StoreError, StoreTransaction, TransferStore};

/// Store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

type OutboxRow = (
    i64,
    String,
    Uuid,
    Uuid,
    String,
    serde_json::Value,
    DateTime<Utc>,
    i32,
    Option<DateTime<Utc>>,
    Option<String>,
    Option<DateTime<Utc>>,
);

fn outbox_from_row(row: OutboxRow) -> OutboxMessage {
    let (
        id,
        channel,
        message_id,
        transfer_id,
        event_type,
        payload,
        occurred_at,
        attempts,
        delivered_at,
        last_error,
        dead_lettered_at,
    ) = row;
    OutboxMessage {
        id,
        channel,
        envelope: EventEnvelope {
            message_id,
            transfer_id,
            event_type,
            payload,
            occurred_at,
        },
        attempts,
        delivered_at,
        last_error,
        dead_lettered_at,
    }
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn find(&self, transfer_id: Uuid) -> Result<Option<TransferRecord>, StoreError> {
        let row: Option<(Uuid, String, String, Decimal, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT transfer_id, sender_id, recipient_id, amount, created_at
            FROM transfer_records
            WHERE transfer_id = $1
            "#,
        )
        .bind(transfer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(transfer_id, sender_id, recipient_id, amount, created_at)| {
            let amount = Amount::new(amount).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            Ok(TransferRecord {
                transfer_id,
                sender_id,
                recipient_id,
                amount,
                created_at,
            })
        })
        .transpose()
    }

    async fn find_idempotency(&self, key: Uuid) -> Result<Option<IdempotencyEntry>, StoreError> {
        let row: Option<(Uuid, String, Uuid, String, DateTime<Utc>, DateTime<Utc>)> =
            sqlx::query_as(
                r#"
                SELECT key, request_hash, transfer_id, outcome, created_at, expires_at
                FROM transfer_idempotency_keys
                WHERE key = $1 AND expires_at > NOW()
                "#,
            )
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(
            |(key, request_hash, transfer_id, outcome, created_at, expires_at)| {
                let outcome =
                    IdempotencyOutcome::try_from(outcome.as_str()).map_err(StoreError::Corrupt)?;
                Ok(IdempotencyEntry {
                    key,
                    request_hash,
                    transfer_id,
                    outcome,
                    created_at,
                    expires_at,
                })
            },
        )
        .transpose()
    }

    async fn delete_expired_idempotency(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM transfer_idempotency_keys
            WHERE expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }
}

#[async_trait]
impl OutboxStore for PgTransferStore {
    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT m.id, m.channel, m.message_id, m.transfer_id, m.event_type, m.payload,
                   m.occurred_at, m.attempts, m.delivered_at, m.last_error, m.dead_lettered_at
            FROM outbox_messages m
            WHERE m.delivered_at IS NULL
              AND m.dead_lettered_at IS NULL
              AND NOT EXISTS (
                  SELECT 1 FROM outbox_messages earlier
                  WHERE earlier.transfer_id = m.transfer_id
                    AND earlier.id < m.id
                    AND earlier.delivered_at IS NULL
                    AND earlier.attempts > 0
              )
            ORDER BY m.id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(outbox_from_row).collect())
    }

    async fn mark_delivered(&self, id: i64) -> Result<(), StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET delivered_at = NOW(), attempts = attempts + 1, last_error = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::Corrupt(format!("outbox message {} not found", id)));
        }
        Ok(())
    }

    async fn mark_attempt_failed(&self, id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET attempts = attempts + 1, last_error = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn dead_letter(&self, id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET attempts = attempts + 1, last_error = $2, dead_lettered_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn purge_delivered(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM outbox_messages
            WHERE delivered_at IS NOT NULL AND delivered_at < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn save(&mut self, record: &TransferRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transfer_records (transfer_id, sender_id, recipient_id, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.transfer_id)
        .bind(&record.sender_id)
        .bind(&record.recipient_id)
        .bind(record.amount.value())
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?;

        Ok(())
    }

    async fn send(&mut self, channel: &str, envelope: &EventEnvelope) -> Result<(), PublishError> {
        sqlx::query(
            r#"
            INSERT INTO outbox_messages (
                message_id, transfer_id, channel, event_type, payload, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(envelope.message_id)
        .bind(envelope.transfer_id)
        .bind(channel)
        .bind(&envelope.event_type)
        .bind(&envelope.payload)
        .bind(envelope.occurred_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| PublishError::Outbox(StoreError::from_sqlx(e).to_string()))?;

        Ok(())
    }

    /// An expired entry for the same key is replaced; a live one is a duplicate.
    async fn record_idempotency(&mut self, entry: &IdempotencyEntry) -> Result<(), StoreError> {
        let rows = sqlx::query(
            r#"
            INSERT INTO transfer_idempotency_keys (
                key, request_hash, transfer_id, outcome, created_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key) DO UPDATE
            SET request_hash = EXCLUDED.request_hash,
                transfer_id = EXCLUDED.transfer_id,
                outcome = EXCLUDED.outcome,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE transfer_idempotency_keys.expires_at <= NOW()
            "#,
        )
        .bind(entry.key)
        .bind(&entry.request_hash)
        .bind(entry.transfer_id)
        .bind(entry.outcome.as_str())
        .bind(entry.created_at)
        .bind(entry.expires_at)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::from_sqlx)?
        .rows_affected();

        if rows == 0 {
            return Err(StoreError::Duplicate(format!(
                "transfer_idempotency_keys.key = {}",
                entry.key
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
