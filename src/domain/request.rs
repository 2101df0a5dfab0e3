//! Transfer request
//!
//! The validated input of a transfer. Construction is the only place where
//! request validation happens; the orchestrator trusts the value it receives.

use sha2::{Digest, Sha256};

use super::amount::{Amount, AmountError};

/// Maximum length of an account identifier
const MAX_ID_LEN: usize = 64;

/// Malformed transfer request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    EmptyIdentifier { field: &'static str },

    #[error("{field} exceeds {MAX_ID_LEN} characters")]
    IdentifierTooLong { field: &'static str },

    #[error("Cannot transfer to the same account")]
    SameAccount,

    #[error(transparent)]
    Amount(#[from] AmountError),
}

/// A request to move `amount` from `sender_id` to `recipient_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    sender_id: String,
    recipient_id: String,
    amount: Amount,
}

impl TransferRequest {
    pub fn new(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        amount: Amount,
    ) -> Result<Self, ValidationError> {
        let sender_id = normalize_id(sender_id.into(), "sender_id")?;
        let recipient_id = normalize_id(recipient_id.into(), "recipient_id")?;

        if sender_id == recipient_id {
            return Err(ValidationError::SameAccount);
        }

        Ok(Self {
            sender_id,
            recipient_id,
            amount,
        })
    }

    /// Build a request from raw inbound fields, parsing the amount.
    pub fn parse(
        sender_id: impl Into<String>,
        recipient_id: impl Into<String>,
        amount: &str,
    ) -> Result<Self, ValidationError> {
        let amount: Amount = amount.parse()?;
        Self::new(sender_id, recipient_id, amount)
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    /// SHA-256 over the canonical request, used to detect an idempotency key
    /// being reused for a different request.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.sender_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.recipient_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.amount.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

fn normalize_id(value: String, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyIdentifier { field });
    }
    if trimmed.chars().count() > MAX_ID_LEN {
        return Err(ValidationError::IdentifierTooLong { field });
    }
    Ok(trimmed.to_string())
}
