//! PostgreSQL store integration tests
//!
//! Require `DATABASE_URL`; run with `cargo test -- --ignored`.
//! They truncate the transfer tables, so run them with `--test-threads=1`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use transfer_service::domain::{EventEnvelope, TransferEvent, TransferRecord, TransferRequest};
use transfer_service::idempotency::{IdempotencyEntry, IdempotencyOutcome};
use transfer_service::orchestrator::TransferOutcome;
use transfer_service::outbox::OutboxRelay;
use transfer_service::publisher::{InMemoryBroker, PublishError};
use transfer_service::store::{OutboxStore, PgTransferStore, StoreError, TransferStore};
use uuid::Uuid;

mod common;

fn request() -> TransferRequest {
    TransferRequest::parse("alice", "bob", "12.34").unwrap()
}

#[tokio::test]
#[ignore]
async fn test_commit_and_rollback() {
    let store = PgTransferStore::new(common::setup_test_db().await);
    let transfer_id = Uuid::new_v4();
    let record = TransferRecord::new(transfer_id, &request());
    let (withdrawal, _) = TransferEvent::pair(transfer_id, &request());
    let envelope = EventEnvelope::new(&withdrawal).unwrap();

    let mut tx = store.begin().await.unwrap();
    tx.save(&record).await.unwrap();
    tx.send("withdraw-money-topic", &envelope).await.unwrap();
    tx.rollback().await.unwrap();

    assert!(store.find(transfer_id).await.unwrap().is_none());
    assert!(store.pending_outbox(10).await.unwrap().is_empty());

    let mut tx = store.begin().await.unwrap();
    tx.save(&record).await.unwrap();
    tx.send("withdraw-money-topic", &envelope).await.unwrap();
    tx.commit().await.unwrap();

    let found = store.find(transfer_id).await.unwrap().unwrap();
    assert_eq!(found.sender_id, "alice");
    assert_eq!(found.amount, record.amount);

    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].envelope.transfer_id, transfer_id);
    assert_eq!(pending[0].envelope.payload, envelope.payload);
}

#[tokio::test]
#[ignore]
async fn test_unique_constraints() {
    let store = PgTransferStore::new(common::setup_test_db().await);
    let transfer_id = Uuid::new_v4();
    let record = TransferRecord::new(transfer_id, &request());
    let (withdrawal, _) = TransferEvent::pair(transfer_id, &request());

    let mut tx = store.begin().await.unwrap();
    tx.save(&record).await.unwrap();
    tx.send("withdraw-money-topic", &EventEnvelope::new(&withdrawal).unwrap())
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx.save(&record).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
    tx.rollback().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let err = tx
        .send("withdraw-money-topic", &EventEnvelope::new(&withdrawal).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, PublishError::Outbox(_)));
}

#[tokio::test]
#[ignore]
async fn test_idempotency_entries() {
    let store = PgTransferStore::new(common::setup_test_db().await);
    let live = IdempotencyEntry::new(
        Uuid::new_v4(),
        &request().fingerprint(),
        Uuid::new_v4(),
        IdempotencyOutcome::FailedCommitted,
    );
    let mut expired = IdempotencyEntry::new(
        Uuid::new_v4(),
        "hash",
        Uuid::new_v4(),
        IdempotencyOutcome::Completed,
    );
    expired.expires_at = Utc::now() - chrono::Duration::minutes(5);

    let mut tx = store.begin().await.unwrap();
    tx.record_idempotency(&live).await.unwrap();
    tx.record_idempotency(&expired).await.unwrap();
    tx.commit().await.unwrap();

    let found = store.find_idempotency(live.key).await.unwrap().unwrap();
    assert_eq!(found.outcome, IdempotencyOutcome::FailedCommitted);
    assert_eq!(found.request_hash, live.request_hash);

    // Expired entries are not honoured even before cleanup
    assert!(store.find_idempotency(expired.key).await.unwrap().is_none());
    assert_eq!(store.delete_expired_idempotency(Utc::now()).await.unwrap(), 1);
}

#[tokio::test]
#[ignore]
async fn test_expired_idempotency_key_can_be_reused() {
    let store = PgTransferStore::new(common::setup_test_db().await);
    let key = Uuid::new_v4();
    let mut expired = IdempotencyEntry::new(key, "old", Uuid::new_v4(), IdempotencyOutcome::Completed);
    expired.expires_at = Utc::now() - chrono::Duration::minutes(5);

    let mut tx = store.begin().await.unwrap();
    tx.record_idempotency(&expired).await.unwrap();
    tx.commit().await.unwrap();

    let fresh = IdempotencyEntry::new(key, "new", Uuid::new_v4(), IdempotencyOutcome::Completed);
    let mut tx = store.begin().await.unwrap();
    tx.record_idempotency(&fresh).await.unwrap();
    tx.commit().await.unwrap();

    let found = store.find_idempotency(key).await.unwrap().unwrap();
    assert_eq!(found.request_hash, "new");
    assert_eq!(found.transfer_id, fresh.transfer_id);

    // A live key is still a duplicate
    let mut tx = store.begin().await.unwrap();
    let err = tx.record_idempotency(&fresh).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));
}

#[tokio::test]
#[ignore]
async fn test_pending_outbox_skips_blocked_and_dead_lettered() {
    let store = PgTransferStore::new(common::setup_test_db().await);
    let mut transfers = Vec::new();
    for _ in 0..2 {
        let transfer_id = Uuid::new_v4();
        let (withdrawal, deposit) = TransferEvent::pair(transfer_id, &request());
        let mut tx = store.begin().await.unwrap();
        tx.send("withdraw-money-topic", &EventEnvelope::new(&withdrawal).unwrap())
            .await
            .unwrap();
        tx.send("deposit-money-topic", &EventEnvelope::new(&deposit).unwrap())
            .await
            .unwrap();
        tx.commit().await.unwrap();
        transfers.push(transfer_id);
    }

    let pending = store.pending_outbox(2).await.unwrap();
    store.mark_attempt_failed(pending[0].id, "rejected").await.unwrap();

    let pending = store.pending_outbox(2).await.unwrap();
    assert_eq!(pending[0].envelope.transfer_id, transfers[0]);
    assert_eq!(pending[1].envelope.transfer_id, transfers[1]);

    store.dead_letter(pending[0].id, "rejected").await.unwrap();
    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|m| m.envelope.transfer_id == transfers[1]));
}

#[tokio::test]
#[ignore]
async fn test_transfer_and_relay_against_postgres() {
    let pool = common::setup_test_db().await;
    let store = Arc::new(PgTransferStore::new(pool));
    let base = common::spawn_verification_server().await;

    let ok = common::orchestrator(store.clone(), format!("{}/response/200", base), Duration::from_secs(2));
    let unavailable =
        common::orchestrator(store.clone(), format!("{}/response/503", base), Duration::from_secs(2));

    let receipt = ok.execute(&request(), None).await.unwrap();
    let err = unavailable.execute(&request(), None).await.unwrap_err();
    assert_eq!(err.outcome, TransferOutcome::Aborted);
    assert!(store.find(err.transfer_id.unwrap()).await.unwrap().is_none());

    let broker = Arc::new(InMemoryBroker::new());
    let relay = OutboxRelay::new(store.clone(), broker.clone());
    let report = relay.relay_once().await.unwrap();
    assert_eq!(report.delivered, 2);

    let history = broker.history().await;
    assert_eq!(history[0].0, "withdraw-money-topic");
    assert_eq!(history[1].0, "deposit-money-topic");
    assert!(history.iter().all(|(_, e)| e.transfer_id == receipt.transfer_id));
    assert!(store.pending_outbox(10).await.unwrap().is_empty());
}
