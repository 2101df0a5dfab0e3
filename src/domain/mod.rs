//! Domain module
//!
//! Transfer requests, records and the events they produce.

pub mod amount;
pub mod events;
pub mod record;
pub mod request;

pub use amount::{Amount, AmountError};
pub use events::{DepositRequestedEvent, EventEnvelope, TransferEvent, WithdrawalRequestedEvent};
pub use record::TransferRecord;
pub use request::{TransferRequest, ValidationError};
