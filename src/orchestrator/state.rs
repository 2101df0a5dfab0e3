//! Transfer state machine
//!
//! `Start → RecordSaved → WithdrawalSent → Verified → DepositSent → Committed`,
//! with `Aborted` and `FailedButCommitted` reachable from any non-terminal state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Start,
    RecordSaved,
    WithdrawalSent,
    Verified,
    DepositSent,
    /// Terminal success
    Committed,
    /// Terminal failure, every effect rolled back
    Aborted,
    /// Terminal failure, partial effects committed; needs reconciliation
    FailedButCommitted,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::Start => "start",
            TransferState::RecordSaved => "record_saved",
            TransferState::WithdrawalSent => "withdrawal_sent",
            TransferState::Verified => "verified",
            TransferState::DepositSent => "deposit_sent",
            TransferState::Committed => "committed",
            TransferState::Aborted => "aborted",
            TransferState::FailedButCommitted => "failed_but_committed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Committed | TransferState::Aborted | TransferState::FailedButCommitted
        )
    }

    /// Whether `self → next` is an edge of the state machine
    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Start, RecordSaved)
            | (RecordSaved, WithdrawalSent)
            | (WithdrawalSent, Verified)
            | (Verified, DepositSent)
            | (DepositSent, Committed) => true,
            (from, Aborted | FailedButCommitted) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Move to `next`. Illegal transitions are a programming error.
    pub(crate) fn advance(&mut self, next: TransferState) {
        debug_assert!(
            self.can_transition_to(next),
            "illegal transfer transition {} -> {}",
            self,
            next
        );
        *self = next;
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
