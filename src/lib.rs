//! Transfer Service Library
//!
//! Transactional money-transfer orchestration: a transfer record and its
//! withdrawal/deposit events commit together, gated by a remote verification
//! call. Re-exports modules for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod idempotency;
pub mod jobs;
pub mod orchestrator;
pub mod outbox;
pub mod publisher;
pub mod store;
pub mod verification;

pub use config::Config;
pub use domain::{Amount, AmountError, TransferEvent, TransferRecord, TransferRequest, ValidationError};
pub use error::{AppError, AppResult};
pub use orchestrator::{
    TransferOrchestrator, TransferOutcome, TransferReceipt, TransferServiceError, TransferSettings,
};
