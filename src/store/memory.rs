//! In-memory store
//!
//! Same commit/rollback semantics as the PostgreSQL store: writes are
//! buffered per transaction and applied atomically on commit, with unique
//! constraints checked against committed state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{EventEnvelope, TransferRecord};
use crate::idempotency::IdempotencyEntry;
use crate::publisher::PublishError;

use super::{OutboxMessage, OutboxStore, StoreError, StoreTransaction, TransferStore};

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<TransferRecord>,
    outbox: Vec<OutboxMessage>,
    idempotency: HashMap<Uuid, IdempotencyEntry>,
    next_outbox_id: i64,
}

impl MemoryState {
    fn has_record(&self, transfer_id: Uuid) -> bool {
        self.records.iter().any(|r| r.transfer_id == transfer_id)
    }

    fn has_outbox(&self, transfer_id: Uuid, event_type: &str) -> bool {
        self.outbox.iter().any(|m| {
            m.envelope.transfer_id == transfer_id && m.envelope.event_type == event_type
        })
    }

    /// Key held by an entry that has not expired yet
    fn has_live_key(&self, key: Uuid, now: DateTime<Utc>) -> bool {
        self.idempotency
            .get(&key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    fn outbox_mut(&mut self, id: i64) -> Result<&mut OutboxMessage, StoreError> {
        self.outbox
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::Corrupt(format!("outbox message {} not found", id)))
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTransferStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All committed transfer records, in commit order
    pub async fn records(&self) -> Vec<TransferRecord> {
        self.state.lock().await.records.clone()
    }

    /// All committed outbox messages, delivered or not
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state.lock().await.outbox.clone()
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            records: Vec::new(),
            outbox: Vec::new(),
            idempotency: Vec::new(),
        }))
    }

    async fn find(&self, transfer_id: Uuid) -> Result<Option<TransferRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .iter()
            .find(|r| r.transfer_id == transfer_id)
            .cloned())
    }

    async fn find_idempotency(&self, key: Uuid) -> Result<Option<IdempotencyEntry>, StoreError> {
        let now = Utc::now();
        Ok(self
            .state
            .lock()
            .await
            .idempotency
            .get(&key)
            .filter(|entry| !entry.is_expired(now))
            .cloned())
    }

    async fn delete_expired_idempotency(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.idempotency.len();
        state.idempotency.retain(|_, entry| !entry.is_expired(now));
        Ok((before - state.idempotency.len()) as u64)
    }
}

#[async_trait]
impl OutboxStore for InMemoryTransferStore {
    async fn pending_outbox(&self, limit: i64) -> Result<Vec<OutboxMessage>, StoreError> {
        let state = self.state.lock().await;
        let limit = limit.max(0) as usize;
        let mut blocked: HashSet<Uuid> = HashSet::new();
        let mut pending = Vec::new();

        for message in state.outbox.iter().filter(|m| m.delivered_at.is_none()) {
            if pending.len() == limit {
                break;
            }
            let transfer_id = message.envelope.transfer_id;
            let behind_failure = blocked.contains(&transfer_id);
            if message.is_blocking() {
                blocked.insert(transfer_id);
            }
            if !behind_failure && message.dead_lettered_at.is_none() {
                pending.push(message.clone());
            }
        }
        Ok(pending)
    }

    async fn mark_delivered(&self, id: i64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let message = state.outbox_mut(id)?;
        message.attempts += 1;
        message.delivered_at = Some(Utc::now());
        message.last_error = None;
        Ok(())
    }

    async fn mark_attempt_failed(&self, id: i64, error: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let message = state.outbox_mut(id)?;
        message.attempts += 1;
        message.last_error = Some(error.to_string());
        Ok(())
    }

    async fn dead_letter(&self, id: i64, error: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let message = state.outbox_mut(id)?;
        message.attempts += 1;
        message.last_error = Some(error.to_string());
        message.dead_lettered_at = Some(Utc::now());
        Ok(())
    }

    async fn purge_delivered(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let count = state.outbox.len();
        state
            .outbox
            .retain(|m| !matches!(m.delivered_at, Some(at) if at < before));
        Ok((count - state.outbox.len()) as u64)
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    records: Vec<TransferRecord>,
    outbox: Vec<(String, EventEnvelope)>,
    idempotency: Vec<IdempotencyEntry>,
}

impl MemoryTransaction {
    fn check_constraints(&self, state: &MemoryState) -> Result<(), StoreError> {
        for record in &self.records {
            if state.has_record(record.transfer_id) {
                return Err(StoreError::Duplicate(format!(
                    "transfer_records.transfer_id = {}",
                    record.transfer_id
                )));
            }
        }
        for (_, envelope) in &self.outbox {
            if state.has_outbox(envelope.transfer_id, &envelope.event_type) {
                return Err(StoreError::Duplicate(format!(
                    "outbox_messages ({}, {})",
                    envelope.transfer_id, envelope.event_type
                )));
            }
        }
        let now = Utc::now();
        for entry in &self.idempotency {
            if state.has_live_key(entry.key, now) {
                return Err(StoreError::Duplicate(format!(
                    "transfer_idempotency_keys.key = {}",
                    entry.key
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn save(&mut self, record: &TransferRecord) -> Result<(), StoreError> {
        let committed = self.state.lock().await.has_record(record.transfer_id);
        if committed || self.records.iter().any(|r| r.transfer_id == record.transfer_id) {
            return Err(StoreError::Duplicate(format!(
                "transfer_records.transfer_id = {}",
                record.transfer_id
            )));
        }
        self.records.push(record.clone());
        Ok(())
    }

    async fn send(&mut self, channel: &str, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let committed = self
            .state
            .lock()
            .await
            .has_outbox(envelope.transfer_id, &envelope.event_type);
        let pending = self.outbox.iter().any(|(_, e)| {
            e.transfer_id == envelope.transfer_id && e.event_type == envelope.event_type
        });
        if committed || pending {
            return Err(PublishError::Outbox(format!(
                "duplicate outbox message {}",
                envelope.dedupe_key()
            )));
        }
        self.outbox.push((channel.to_string(), envelope.clone()));
        Ok(())
    }

    async fn record_idempotency(&mut self, entry: &IdempotencyEntry) -> Result<(), StoreError> {
        let committed = self.state.lock().await.has_live_key(entry.key, Utc::now());
        if committed || self.idempotency.iter().any(|e| e.key == entry.key) {
            return Err(StoreError::Duplicate(format!(
                "transfer_idempotency_keys.key = {}",
                entry.key
            )));
        }
        self.idempotency.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = this.state.lock().await;
        this.check_constraints(&state)?;

        state.records.extend(this.records.iter().cloned());
        for (channel, envelope) in this.outbox.iter() {
            state.next_outbox_id += 1;
            let id = state.next_outbox_id;
            state.outbox.push(OutboxMessage {
                id,
                channel: channel.clone(),
                envelope: envelope.clone(),
                attempts: 0,
                delivered_at: None,
                last_error: None,
                dead_lettered_at: None,
            });
        }
        for entry in this.idempotency.iter() {
            state.idempotency.insert(entry.key, entry.clone());
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
