//! Transfer Orchestrator
//!
//! Runs one transfer as a single transactional boundary:
//! save record → enqueue withdrawal → verify remotely → enqueue deposit → commit.
//! Withdrawal and deposit are enqueued in the store's outbox, so neither is
//! visible to consumers unless the boundary commits.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::{EventEnvelope, TransferEvent, TransferRecord, TransferRequest};
use crate::idempotency::{IdempotencyEntry, IdempotencyOutcome};
use crate::publisher::{Channels, PublishError};
use crate::store::{StoreError, StoreTransaction, TransferStore};
use crate::verification::{
    classify, CallError, UnexpectedStatusPolicy, Verdict, VerificationClient,
    DEFAULT_VERIFICATION_URL,
};

use super::error::{Disposition, TransferFault, TransferOutcome, TransferServiceError};
use super::state::TransferState;

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub channels: Channels,
    pub verification_url: String,
    pub verification_timeout: Duration,
    pub unexpected_status: UnexpectedStatusPolicy,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            channels: Channels::default(),
            verification_url: DEFAULT_VERIFICATION_URL.to_string(),
            verification_timeout: Duration::from_secs(5),
            unexpected_status: UnexpectedStatusPolicy::default(),
        }
    }
}

/// Result of a successful transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    /// Answered from a previous invocation with the same idempotency key
    pub replayed: bool,
}

pub struct TransferOrchestrator {
    store: Arc<dyn TransferStore>,
    verifier: Arc<dyn VerificationClient>,
    settings: TransferSettings,
}

/// Idempotency key and request fingerprint of one invocation
type IdempotencyScope<'a> = Option<(Uuid, &'a str)>;

impl TransferOrchestrator {
    pub fn new(
        store: Arc<dyn TransferStore>,
        verifier: Arc<dyn VerificationClient>,
        settings: TransferSettings,
    ) -> Self {
        Self {
            store,
            verifier,
            settings,
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Returns `true` on full success; any failure is an error.
    pub async fn transfer(&self, request: &TransferRequest) -> Result<bool, TransferServiceError> {
        self.execute(request, None).await.map(|_| true)
    }

    /// Run a transfer, optionally under a caller-supplied idempotency key.
    pub async fn execute(
        &self,
        request: &TransferRequest,
        idempotency_key: Option<Uuid>,
    ) -> Result<TransferReceipt, TransferServiceError> {
        let request_hash = request.fingerprint();

        if let Some(key) = idempotency_key {
            if let Some(receipt) = self.replay(key, &request_hash).await? {
                return Ok(receipt);
            }
        }
        let scope: IdempotencyScope<'_> = idempotency_key.map(|key| (key, request_hash.as_str()));

        let transfer_id = Uuid::new_v4();
        let (withdrawal, deposit) = TransferEvent::pair(transfer_id, request);
        let record = TransferRecord::new(transfer_id, request);

        tracing::info!(
            transfer_id = %transfer_id,
            sender_id = %record.sender_id,
            recipient_id = %record.recipient_id,
            amount = %record.amount,
            "Starting transfer"
        );

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                return Err(self.terminate(
                    transfer_id,
                    TransferState::Start,
                    TransferOutcome::Aborted,
                    e.into(),
                ))
            }
        };

        let mut state = TransferState::Start;
        let result = self
            .run_steps(tx.as_mut(), &record, &withdrawal, &deposit, &mut state)
            .await;

        match result {
            Ok(()) => self.complete(tx, transfer_id, state, scope).await,
            Err(fault) => self.settle(tx, transfer_id, state, scope, fault).await,
        }
    }

    async fn run_steps(
        &self,
        tx: &mut dyn StoreTransaction,
        record: &TransferRecord,
        withdrawal: &TransferEvent,
        deposit: &TransferEvent,
        state: &mut TransferState,
    ) -> Result<(), TransferFault> {
        let transfer_id = record.transfer_id;

        tx.save(record).await?;
        state.advance(TransferState::RecordSaved);
        tracing::debug!(transfer_id = %transfer_id, "Transfer record saved");

        let channels = &self.settings.channels;
        self.publish(tx, &channels.withdrawal, withdrawal).await?;
        state.advance(TransferState::WithdrawalSent);
        tracing::info!(
            transfer_id = %transfer_id,
            channel = %channels.withdrawal,
            "Sent event to withdrawal topic"
        );

        self.verify(transfer_id).await?;
        state.advance(TransferState::Verified);

        self.publish(tx, &channels.deposit, deposit).await?;
        state.advance(TransferState::DepositSent);
        tracing::info!(
            transfer_id = %transfer_id,
            channel = %channels.deposit,
            "Sent event to deposit topic"
        );

        Ok(())
    }

    async fn publish(
        &self,
        tx: &mut dyn StoreTransaction,
        channel: &str,
        event: &TransferEvent,
    ) -> Result<(), TransferFault> {
        let publish_fault = |source: PublishError| TransferFault::Publish {
            channel: channel.to_string(),
            source,
        };
        let envelope = EventEnvelope::new(event).map_err(|e| publish_fault(e.into()))?;
        tx.send(channel, &envelope).await.map_err(publish_fault)
    }

    async fn verify(&self, transfer_id: Uuid) -> Result<(), TransferFault> {
        let endpoint = &self.settings.verification_url;
        let timeout = self.settings.verification_timeout;

        let status = match tokio::time::timeout(timeout, self.verifier.call(endpoint)).await {
            Ok(result) => result.map_err(TransferFault::from_call_error)?,
            Err(_) => {
                return Err(TransferFault::RemoteUnreachable(CallError::Timeout(
                    timeout.as_millis() as u64,
                )))
            }
        };

        match classify(status) {
            Verdict::Verified => Ok(()),
            Verdict::Unavailable => Err(TransferFault::RemoteUnavailable(status)),
            Verdict::Unexpected(status) => match self.settings.unexpected_status {
                UnexpectedStatusPolicy::Rollback => Err(TransferFault::RemoteUnavailable(status)),
                UnexpectedStatusPolicy::Proceed => {
                    tracing::warn!(
                        transfer_id = %transfer_id,
                        status = %status,
                        "Unexpected verification status, proceeding"
                    );
                    Ok(())
                }
                UnexpectedStatusPolicy::FailWithoutRollback => Err(TransferFault::Unclassified(
                    format!("verification service returned unexpected status {}", status),
                )),
            },
        }
    }

    /// Answer from a previous outcome for `key`, if one was committed.
    async fn replay(
        &self,
        key: Uuid,
        request_hash: &str,
    ) -> Result<Option<TransferReceipt>, TransferServiceError> {
        let entry = self
            .store
            .find_idempotency(key)
            .await
            .map_err(|e| self.fail(None, None, TransferOutcome::Rejected, e.into()))?;

        let Some(entry) = entry else {
            return Ok(None);
        };

        if entry.request_hash != request_hash {
            return Err(self.fail(
                None,
                None,
                TransferOutcome::Rejected,
                TransferFault::IdempotencyConflict(key),
            ));
        }

        match entry.outcome {
            IdempotencyOutcome::Completed => {
                tracing::info!(
                    transfer_id = %entry.transfer_id,
                    idempotency_key = %key,
                    "Replaying completed transfer"
                );
                Ok(Some(TransferReceipt {
                    transfer_id: entry.transfer_id,
                    replayed: true,
                }))
            }
            IdempotencyOutcome::FailedCommitted => Err(self.fail(
                Some(entry.transfer_id),
                None,
                TransferOutcome::FailedButCommitted,
                TransferFault::PreviouslyFailed(entry.transfer_id),
            )),
        }
    }

    async fn complete(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        transfer_id: Uuid,
        mut state: TransferState,
        scope: IdempotencyScope<'_>,
    ) -> Result<TransferReceipt, TransferServiceError> {
        if let Some((key, hash)) = scope {
            let entry = IdempotencyEntry::new(key, hash, transfer_id, IdempotencyOutcome::Completed);
            if let Err(e) = tx.record_idempotency(&entry).await {
                self.roll_back(tx, transfer_id).await;
                return self.answer_duplicate(transfer_id, state, scope, e).await;
            }
        }

        if let Err(e) = tx.commit().await {
            return self.answer_duplicate(transfer_id, state, scope, e).await;
        }

        state.advance(TransferState::Committed);
        tracing::info!(transfer_id = %transfer_id, state = %state, "Transfer committed");
        Ok(TransferReceipt {
            transfer_id,
            replayed: false,
        })
    }

    /// Apply the fault's disposition to the open boundary.
    async fn settle(
        &self,
        mut tx: Box<dyn StoreTransaction>,
        transfer_id: Uuid,
        state: TransferState,
        scope: IdempotencyScope<'_>,
        fault: TransferFault,
    ) -> Result<TransferReceipt, TransferServiceError> {
        if fault.disposition() == Disposition::Rollback {
            self.roll_back(tx, transfer_id).await;
            return Err(self.terminate(transfer_id, state, TransferOutcome::Aborted, fault));
        }

        if let Some((key, hash)) = scope {
            let entry =
                IdempotencyEntry::new(key, hash, transfer_id, IdempotencyOutcome::FailedCommitted);
            if let Err(e) = tx.record_idempotency(&entry).await {
                tracing::error!(
                    transfer_id = %transfer_id,
                    original_fault = %fault,
                    "Could not record idempotency outcome"
                );
                self.roll_back(tx, transfer_id).await;
                return self.answer_duplicate(transfer_id, state, scope, e).await;
            }
        }

        match tx.commit().await {
            Ok(()) => Err(self.terminate(
                transfer_id,
                state,
                TransferOutcome::FailedButCommitted,
                fault,
            )),
            Err(e) => {
                tracing::error!(
                    transfer_id = %transfer_id,
                    original_fault = %fault,
                    "Commit after unclassified fault failed"
                );
                self.answer_duplicate(transfer_id, state, scope, e).await
            }
        }
    }

    /// The boundary was lost to a store error. When the key was claimed by a
    /// concurrent invocation that committed first, answer with its outcome.
    async fn answer_duplicate(
        &self,
        transfer_id: Uuid,
        state: TransferState,
        scope: IdempotencyScope<'_>,
        err: StoreError,
    ) -> Result<TransferReceipt, TransferServiceError> {
        if let (Some((key, hash)), StoreError::Duplicate(_)) = (scope, &err) {
            tracing::info!(
                transfer_id = %transfer_id,
                idempotency_key = %key,
                "Idempotency key committed concurrently, answering from its outcome"
            );
            if let Some(receipt) = self.replay(key, hash).await? {
                return Ok(receipt);
            }
        }
        Err(self.terminate(transfer_id, state, TransferOutcome::Aborted, err.into()))
    }

    async fn roll_back(&self, tx: Box<dyn StoreTransaction>, transfer_id: Uuid) {
        if let Err(e) = tx.rollback().await {
            // The database discards the transaction when the connection drops
            tracing::warn!(transfer_id = %transfer_id, error = %e, "Rollback failed");
        }
    }

    /// Move `failed_at` to the terminal state matching `outcome` and build the error.
    fn terminate(
        &self,
        transfer_id: Uuid,
        failed_at: TransferState,
        outcome: TransferOutcome,
        fault: TransferFault,
    ) -> TransferServiceError {
        let mut state = failed_at;
        state.advance(match outcome {
            TransferOutcome::FailedButCommitted => TransferState::FailedButCommitted,
            TransferOutcome::Aborted | TransferOutcome::Rejected => TransferState::Aborted,
        });

        let mut err = self.fail(Some(transfer_id), Some(failed_at), outcome, fault);
        err.ended_in = Some(state);
        err
    }

    /// Log the failure and wrap it in the unified error.
    fn fail(
        &self,
        transfer_id: Option<Uuid>,
        failed_at: Option<TransferState>,
        outcome: TransferOutcome,
        fault: TransferFault,
    ) -> TransferServiceError {
        let disposition = fault.disposition();
        match outcome {
            TransferOutcome::Rejected => tracing::warn!(
                transfer_id = ?transfer_id,
                error = %fault,
                "Transfer rejected"
            ),
            TransferOutcome::Aborted => tracing::error!(
                transfer_id = ?transfer_id,
                failed_at = ?failed_at,
                disposition = ?disposition,
                error = %fault,
                "Transfer aborted, boundary rolled back"
            ),
            TransferOutcome::FailedButCommitted => tracing::error!(
                transfer_id = ?transfer_id,
                failed_at = ?failed_at,
                disposition = ?disposition,
                error = %fault,
                "Transfer failed with committed side effects, reconciliation required"
            ),
        }

        TransferServiceError {
            outcome,
            transfer_id,
            failed_at,
            ended_in: None,
            fault,
        }
    }
}
