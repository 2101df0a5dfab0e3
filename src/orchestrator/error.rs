//! Transfer fault taxonomy
//!
//! Every fault the orchestrator can observe is a [`TransferFault`], and
//! [`TransferFault::disposition`] decides whether it rolls the boundary back
//! or commits what was already written. Callers only ever see the unified
//! [`TransferServiceError`].

use reqwest::StatusCode;
use uuid::Uuid;

use crate::publisher::PublishError;
use crate::store::StoreError;
use crate::verification::CallError;

use super::state::TransferState;

/// What the boundary does when a fault is raised inside it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Rollback,
    /// Keep partial effects and fail the call anyway
    Commit,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferFault {
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Publish to {channel} failed: {source}")]
    Publish {
        channel: String,
        #[source]
        source: PublishError,
    },

    #[error("Destination service not available (status {0})")]
    RemoteUnavailable(StatusCode),

    #[error("Destination service unreachable: {0}")]
    RemoteUnreachable(#[source] CallError),

    #[error("Idempotency key {0} was used for a different request")]
    IdempotencyConflict(Uuid),

    #[error("Transfer {0} previously failed after commit")]
    PreviouslyFailed(Uuid),

    #[error("Unclassified runtime fault: {0}")]
    Unclassified(String),
}

impl TransferFault {
    pub fn disposition(&self) -> Disposition {
        match self {
            TransferFault::Persistence(_)
            | TransferFault::Publish { .. }
            | TransferFault::RemoteUnavailable(_)
            | TransferFault::RemoteUnreachable(_)
            | TransferFault::IdempotencyConflict(_)
            | TransferFault::PreviouslyFailed(_) => Disposition::Rollback,
            TransferFault::Unclassified(_) => Disposition::Commit,
        }
    }

    /// Connectivity and timeout failures roll back; anything else the
    /// transport reports is unclassified.
    pub fn from_call_error(err: CallError) -> Self {
        match err {
            CallError::Connect(_) | CallError::Timeout(_) => TransferFault::RemoteUnreachable(err),
            CallError::Protocol(msg) => TransferFault::Unclassified(msg),
        }
    }

    /// Faults caused by the verification service rather than by us
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            TransferFault::RemoteUnavailable(_) | TransferFault::RemoteUnreachable(_)
        )
    }
}

/// How a failed transfer ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Refused before any side effect
    Rejected,
    /// Boundary rolled back; nothing persisted or published
    Aborted,
    /// Partial effects committed; needs out-of-band reconciliation
    FailedButCommitted,
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferOutcome::Rejected => write!(f, "rejected"),
            TransferOutcome::Aborted => write!(f, "aborted"),
            TransferOutcome::FailedButCommitted => write!(f, "failed but committed"),
        }
    }
}

/// The single error type returned by the orchestrator
#[derive(Debug, thiserror::Error)]
#[error("Transfer {outcome}: {fault}")]
pub struct TransferServiceError {
    pub outcome: TransferOutcome,
    pub transfer_id: Option<Uuid>,
    /// Last state reached before the fault, when a boundary was opened
    pub failed_at: Option<TransferState>,
    /// Terminal state the transfer moved to; `None` when answered without
    /// running the protocol (idempotency conflict or replay)
    pub ended_in: Option<TransferState>,
    #[source]
    pub fault: TransferFault,
}

impl TransferServiceError {
    pub fn requires_reconciliation(&self) -> bool {
        self.outcome == TransferOutcome::FailedButCommitted
    }
}
