//! Orchestrator protocol tests against the in-memory store

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use uuid::Uuid;

use crate::domain::{EventEnvelope, TransferRecord, TransferRequest};
use crate::idempotency::IdempotencyEntry;
use crate::publisher::PublishError;
use crate::store::{InMemoryTransferStore, StoreError, StoreTransaction, TransferStore};
use crate::verification::{CallError, UnexpectedStatusPolicy, VerificationClient};

use super::*;

struct StubVerifier {
    result: Mutex<Result<StatusCode, CallError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubVerifier {
    fn returning(result: Result<StatusCode, CallError>) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(result),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Ok(StatusCode::OK)),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
        })
    }

    fn set(&self, result: Result<StatusCode, CallError>) {
        *self.result.lock().unwrap() = result;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationClient for StubVerifier {
    async fn call(&self, _endpoint: &str) -> Result<StatusCode, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self.result.lock().unwrap().clone();
        result
    }
}

/// Store whose transactions fail on selected operations
struct FaultyStore {
    inner: InMemoryTransferStore,
    fail_save: bool,
    fail_send_on: Option<&'static str>,
}

struct FaultyTransaction {
    inner: Box<dyn StoreTransaction>,
    fail_save: bool,
    fail_send_on: Option<&'static str>,
}

#[async_trait]
impl TransferStore for FaultyStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(FaultyTransaction {
            inner: self.inner.begin().await?,
            fail_save: self.fail_save,
            fail_send_on: self.fail_send_on,
        }))
    }

    async fn find(&self, transfer_id: Uuid) -> Result<Option<TransferRecord>, StoreError> {
        self.inner.find(transfer_id).await
    }

    async fn find_idempotency(&self, key: Uuid) -> Result<Option<IdempotencyEntry>, StoreError> {
        self.inner.find_idempotency(key).await
    }

    async fn delete_expired_idempotency(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.delete_expired_idempotency(now).await
    }
}

#[async_trait]
impl StoreTransaction for FaultyTransaction {
    async fn save(&mut self, record: &TransferRecord) -> Result<(), StoreError> {
        if self.fail_save {
            return Err(StoreError::Corrupt("connection reset".into()));
        }
        self.inner.save(record).await
    }

    async fn send(&mut self, channel: &str, envelope: &EventEnvelope) -> Result<(), PublishError> {
        if self.fail_send_on == Some(channel) {
            return Err(PublishError::Outbox("outbox unavailable".into()));
        }
        self.inner.send(channel, envelope).await
    }

    async fn record_idempotency(&mut self, entry: &IdempotencyEntry) -> Result<(), StoreError> {
        self.inner.record_idempotency(entry).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback().await
    }
}

fn request() -> TransferRequest {
    TransferRequest::parse("A", "B", "100").unwrap()
}

fn orchestrator(
    store: Arc<dyn TransferStore>,
    verifier: Arc<StubVerifier>,
    settings: TransferSettings,
) -> TransferOrchestrator {
    TransferOrchestrator::new(store, verifier, settings)
}

fn with_policy(policy: UnexpectedStatusPolicy) -> TransferSettings {
    TransferSettings {
        unexpected_status: policy,
        ..TransferSettings::default()
    }
}

#[tokio::test]
async fn test_happy_path_commits_record_and_both_events() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::OK));
    let service = orchestrator(Arc::new(store.clone()), verifier.clone(), TransferSettings::default());

    assert!(service.transfer(&request()).await.unwrap());

    let records = store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].sender_id, "A");
    assert_eq!(records[0].recipient_id, "B");
    assert_eq!(records[0].amount.to_string(), "100.00000000");

    let outbox = store.outbox_messages().await;
    assert_eq!(outbox.len(), 2);
    assert_eq!(outbox[0].channel, "withdraw-money-topic");
    assert_eq!(outbox[0].envelope.event_type, "WithdrawalRequested");
    assert_eq!(outbox[1].channel, "deposit-money-topic");
    assert_eq!(outbox[1].envelope.event_type, "DepositRequested");
    assert!(outbox[0].id < outbox[1].id);
    for message in &outbox {
        assert_eq!(message.envelope.transfer_id, records[0].transfer_id);
        assert_eq!(message.envelope.payload["amount"], "100.00000000");
    }
    assert_eq!(verifier.calls(), 1);
}

#[tokio::test]
async fn test_unavailable_verification_rolls_back() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::SERVICE_UNAVAILABLE));
    let service = orchestrator(Arc::new(store.clone()), verifier, TransferSettings::default());

    let err = service.transfer(&request()).await.unwrap_err();

    assert_eq!(err.outcome, TransferOutcome::Aborted);
    assert_eq!(err.failed_at, Some(TransferState::WithdrawalSent));
    assert_eq!(err.ended_in, Some(TransferState::Aborted));
    assert!(matches!(err.fault, TransferFault::RemoteUnavailable(StatusCode::SERVICE_UNAVAILABLE)));
    assert!(store.records().await.is_empty());
    assert!(store.outbox_messages().await.is_empty());
}

#[tokio::test]
async fn test_connect_failure_rolls_back() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Err(CallError::Connect("connection refused".into())));
    let service = orchestrator(Arc::new(store.clone()), verifier, TransferSettings::default());

    let err = service.transfer(&request()).await.unwrap_err();

    assert_eq!(err.outcome, TransferOutcome::Aborted);
    assert!(matches!(err.fault, TransferFault::RemoteUnreachable(CallError::Connect(_))));
    assert!(err.fault.is_remote());
    assert!(store.records().await.is_empty());
    assert!(store.outbox_messages().await.is_empty());
}

#[tokio::test]
async fn test_verification_timeout_rolls_back() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::slow(Duration::from_millis(500));
    let settings = TransferSettings {
        verification_timeout: Duration::from_millis(20),
        ..TransferSettings::default()
    };
    let service = orchestrator(Arc::new(store.clone()), verifier, settings);

    let err = service.transfer(&request()).await.unwrap_err();

    assert_eq!(err.outcome, TransferOutcome::Aborted);
    assert!(matches!(err.fault, TransferFault::RemoteUnreachable(CallError::Timeout(20))));
    assert!(store.records().await.is_empty());
}

#[tokio::test]
async fn test_unclassified_fault_commits_partial_effects() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Err(CallError::Protocol("truncated body".into())));
    let service = orchestrator(Arc::new(store.clone()), verifier, TransferSettings::default());

    let err = service.transfer(&request()).await.unwrap_err();

    assert_eq!(err.outcome, TransferOutcome::FailedButCommitted);
    assert!(err.requires_reconciliation());
    assert_eq!(err.failed_at, Some(TransferState::WithdrawalSent));
    assert_eq!(err.ended_in, Some(TransferState::FailedButCommitted));
    assert!(matches!(err.fault, TransferFault::Unclassified(_)));

    let records = store.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(err.transfer_id, Some(records[0].transfer_id));

    let outbox = store.outbox_messages().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].envelope.event_type, "WithdrawalRequested");
}

#[tokio::test]
async fn test_unexpected_status_policies() {
    // Default: fatal
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::INTERNAL_SERVER_ERROR));
    let service = orchestrator(Arc::new(store.clone()), verifier, TransferSettings::default());
    let err = service.transfer(&request()).await.unwrap_err();
    assert_eq!(err.outcome, TransferOutcome::Aborted);
    assert!(store.records().await.is_empty());

    // Proceed as verified
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::ACCEPTED));
    let service = orchestrator(
        Arc::new(store.clone()),
        verifier,
        with_policy(UnexpectedStatusPolicy::Proceed),
    );
    assert!(service.transfer(&request()).await.unwrap());
    assert_eq!(store.outbox_messages().await.len(), 2);

    // Fail but keep what was written
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::NOT_FOUND));
    let service = orchestrator(
        Arc::new(store.clone()),
        verifier,
        with_policy(UnexpectedStatusPolicy::FailWithoutRollback),
    );
    let err = service.transfer(&request()).await.unwrap_err();
    assert_eq!(err.outcome, TransferOutcome::FailedButCommitted);
    assert_eq!(store.records().await.len(), 1);
    assert_eq!(store.outbox_messages().await.len(), 1);
}

#[tokio::test]
async fn test_save_failure_aborts_before_any_effect() {
    let inner = InMemoryTransferStore::new();
    let store = FaultyStore {
        inner: inner.clone(),
        fail_save: true,
        fail_send_on: None,
    };
    let verifier = StubVerifier::returning(Ok(StatusCode::OK));
    let service = orchestrator(Arc::new(store), verifier.clone(), TransferSettings::default());

    let err = service.transfer(&request()).await.unwrap_err();

    assert_eq!(err.outcome, TransferOutcome::Aborted);
    assert_eq!(err.failed_at, Some(TransferState::Start));
    assert!(matches!(err.fault, TransferFault::Persistence(_)));
    assert_eq!(verifier.calls(), 0);
    assert!(inner.outbox_messages().await.is_empty());
}

#[tokio::test]
async fn test_withdrawal_publish_failure_skips_verification_and_deposit() {
    let inner = InMemoryTransferStore::new();
    let store = FaultyStore {
        inner: inner.clone(),
        fail_save: false,
        fail_send_on: Some("withdraw-money-topic"),
    };
    let verifier = StubVerifier::returning(Ok(StatusCode::OK));
    let service = orchestrator(Arc::new(store), verifier.clone(), TransferSettings::default());

    let err = service.transfer(&request()).await.unwrap_err();

    assert_eq!(err.outcome, TransferOutcome::Aborted);
    assert_eq!(err.failed_at, Some(TransferState::RecordSaved));
    match &err.fault {
        TransferFault::Publish { channel, .. } => assert_eq!(channel, "withdraw-money-topic"),
        other => panic!("Expected publish fault, got: {:?}", other),
    }
    assert_eq!(verifier.calls(), 0);
    assert!(inner.records().await.is_empty());
    assert!(inner.outbox_messages().await.is_empty());
}

#[tokio::test]
async fn test_deposit_publish_failure_rolls_back_withdrawal() {
    let inner = InMemoryTransferStore::new();
    let store = FaultyStore {
        inner: inner.clone(),
        fail_save: false,
        fail_send_on: Some("deposit-money-topic"),
    };
    let verifier = StubVerifier::returning(Ok(StatusCode::OK));
    let service = orchestrator(Arc::new(store), verifier, TransferSettings::default());

    let err = service.transfer(&request()).await.unwrap_err();

    assert_eq!(err.outcome, TransferOutcome::Aborted);
    assert_eq!(err.failed_at, Some(TransferState::Verified));
    assert_eq!(err.ended_in, Some(TransferState::Aborted));
    assert!(inner.records().await.is_empty());
    assert!(inner.outbox_messages().await.is_empty());
}

#[tokio::test]
async fn test_identical_requests_get_distinct_ids() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::OK));
    let service = orchestrator(Arc::new(store.clone()), verifier, TransferSettings::default());

    let first = service.execute(&request(), None).await.unwrap();
    let second = service.execute(&request(), None).await.unwrap();

    assert_ne!(first.transfer_id, second.transfer_id);
    assert_eq!(store.records().await.len(), 2);
}

#[tokio::test]
async fn test_idempotent_replay_of_completed_transfer() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::OK));
    let service = orchestrator(Arc::new(store.clone()), verifier.clone(), TransferSettings::default());
    let key = Uuid::new_v4();

    let first = service.execute(&request(), Some(key)).await.unwrap();
    let second = service.execute(&request(), Some(key)).await.unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.transfer_id, second.transfer_id);
    assert_eq!(verifier.calls(), 1);
    assert_eq!(store.records().await.len(), 1);
    assert_eq!(store.outbox_messages().await.len(), 2);
}

#[tokio::test]
async fn test_idempotency_key_reused_for_different_request() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::OK));
    let service = orchestrator(Arc::new(store.clone()), verifier, TransferSettings::default());
    let key = Uuid::new_v4();

    service.execute(&request(), Some(key)).await.unwrap();
    let other = TransferRequest::parse("A", "B", "250").unwrap();
    let err = service.execute(&other, Some(key)).await.unwrap_err();

    assert_eq!(err.outcome, TransferOutcome::Rejected);
    assert!(matches!(err.fault, TransferFault::IdempotencyConflict(k) if k == key));
    assert_eq!(err.ended_in, None);
    assert_eq!(store.records().await.len(), 1);
}

#[tokio::test]
async fn test_replay_of_failed_committed_transfer_has_no_new_effects() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Err(CallError::Protocol("bad body".into())));
    let service = orchestrator(Arc::new(store.clone()), verifier.clone(), TransferSettings::default());
    let key = Uuid::new_v4();

    let first = service.execute(&request(), Some(key)).await.unwrap_err();
    assert_eq!(first.outcome, TransferOutcome::FailedButCommitted);

    // Even with a healthy verifier the retry must not emit a second withdrawal
    verifier.set(Ok(StatusCode::OK));
    let second = service.execute(&request(), Some(key)).await.unwrap_err();

    assert_eq!(second.outcome, TransferOutcome::FailedButCommitted);
    assert_eq!(second.transfer_id, first.transfer_id);
    assert!(matches!(second.fault, TransferFault::PreviouslyFailed(_)));
    assert_eq!(verifier.calls(), 1);
    assert_eq!(store.outbox_messages().await.len(), 1);
}

#[tokio::test]
async fn test_aborted_transfer_can_be_retried_with_same_key() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::SERVICE_UNAVAILABLE));
    let service = orchestrator(Arc::new(store.clone()), verifier.clone(), TransferSettings::default());
    let key = Uuid::new_v4();

    let err = service.execute(&request(), Some(key)).await.unwrap_err();
    assert_eq!(err.outcome, TransferOutcome::Aborted);
    assert!(store.find_idempotency(key).await.unwrap().is_none());

    verifier.set(Ok(StatusCode::OK));
    let receipt = service.execute(&request(), Some(key)).await.unwrap();
    assert!(!receipt.replayed);
    assert_eq!(store.records().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_requests_with_same_key_share_one_transfer() {
    let store = InMemoryTransferStore::new();
    // Both invocations pass the replay check before either commits
    let verifier = StubVerifier::slow(Duration::from_millis(50));
    let service = orchestrator(Arc::new(store.clone()), verifier.clone(), TransferSettings::default());
    let key = Uuid::new_v4();
    let request = request();

    let (first, second) = tokio::join!(
        service.execute(&request, Some(key)),
        service.execute(&request, Some(key)),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first.transfer_id, second.transfer_id);
    assert_eq!(
        [first.replayed, second.replayed].iter().filter(|r| **r).count(),
        1
    );
    assert_eq!(verifier.calls(), 2);
    assert_eq!(store.records().await.len(), 1);
    assert_eq!(store.outbox_messages().await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_same_key_after_failed_commit_reports_that_failure() {
    let store = InMemoryTransferStore::new();
    let verifier = Arc::new(StubVerifier {
        result: Mutex::new(Err(CallError::Protocol("bad body".into()))),
        delay: Some(Duration::from_millis(50)),
        calls: AtomicUsize::new(0),
    });
    let service = orchestrator(Arc::new(store.clone()), verifier, TransferSettings::default());
    let key = Uuid::new_v4();
    let request = request();

    let (first, second) = tokio::join!(
        service.execute(&request, Some(key)),
        service.execute(&request, Some(key)),
    );
    let (first, second) = (first.unwrap_err(), second.unwrap_err());

    assert_eq!(first.outcome, TransferOutcome::FailedButCommitted);
    assert_eq!(second.outcome, TransferOutcome::FailedButCommitted);
    assert_eq!(first.transfer_id, second.transfer_id);
    assert_eq!(store.records().await.len(), 1);
    assert_eq!(store.outbox_messages().await.len(), 1);
}

#[tokio::test]
async fn test_expired_idempotency_key_starts_a_new_transfer() {
    let store = InMemoryTransferStore::new();
    let verifier = StubVerifier::returning(Ok(StatusCode::OK));
    let service = orchestrator(Arc::new(store.clone()), verifier.clone(), TransferSettings::default());
    let key = Uuid::new_v4();

    let mut expired = IdempotencyEntry::new(
        key,
        request().fingerprint(),
        Uuid::new_v4(),
        crate::idempotency::IdempotencyOutcome::Completed,
    );
    expired.expires_at = Utc::now() - chrono::Duration::minutes(1);
    let mut tx = store.begin().await.unwrap();
    tx.record_idempotency(&expired).await.unwrap();
    tx.commit().await.unwrap();

    let receipt = service.execute(&request(), Some(key)).await.unwrap();

    assert!(!receipt.replayed);
    assert_ne!(receipt.transfer_id, expired.transfer_id);
    assert_eq!(verifier.calls(), 1);
    let entry = store.find_idempotency(key).await.unwrap().unwrap();
    assert_eq!(entry.transfer_id, receipt.transfer_id);
}
