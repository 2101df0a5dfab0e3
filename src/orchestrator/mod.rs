//! Transfer orchestration
//!
//! Coordinates the record write, the two event emissions and the remote
//! verification call as one unit of work, and decides which failures undo it.

mod error;
mod service;
mod state;

#[cfg(test)]
mod tests;

pub use error::{Disposition, TransferFault, TransferOutcome, TransferServiceError};
pub use service::{TransferOrchestrator, TransferReceipt, TransferSettings};
pub use state::TransferState;
