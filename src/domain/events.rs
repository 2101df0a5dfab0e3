//! Transfer Events
//!
//! Outbound messages consumed by the withdrawal and deposit processors.
//! Both carry the transfer id so consumers can pair them and deduplicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::amount::Amount;
use super::request::TransferRequest;

/// Asks the withdrawal processor to debit the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequestedEvent {
    pub transfer_id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    pub amount: Amount,
}

/// Asks the deposit processor to credit the recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRequestedEvent {
    pub transfer_id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    pub amount: Amount,
}

/// Transfer-related events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransferEvent {
    WithdrawalRequested(WithdrawalRequestedEvent),
    DepositRequested(DepositRequestedEvent),
}

impl TransferEvent {
    /// Build the withdrawal/deposit pair for one transfer.
    pub fn pair(transfer_id: Uuid, request: &TransferRequest) -> (Self, Self) {
        let withdrawal = WithdrawalRequestedEvent {
            transfer_id,
            sender_id: request.sender_id().to_string(),
            recipient_id: request.recipient_id().to_string(),
            amount: request.amount().clone(),
        };
        let deposit = DepositRequestedEvent {
            transfer_id,
            sender_id: request.sender_id().to_string(),
            recipient_id: request.recipient_id().to_string(),
            amount: request.amount().clone(),
        };
        (
            TransferEvent::WithdrawalRequested(withdrawal),
            TransferEvent::DepositRequested(deposit),
        )
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::WithdrawalRequested(_) => "WithdrawalRequested",
            TransferEvent::DepositRequested(_) => "DepositRequested",
        }
    }

    /// Get the transfer ID this event relates to
    pub fn transfer_id(&self) -> Uuid {
        match self {
            TransferEvent::WithdrawalRequested(e) => e.transfer_id,
            TransferEvent::DepositRequested(e) => e.transfer_id,
        }
    }
}

/// Broker-level message wrapping a serialized [`TransferEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub message_id: Uuid,
    pub transfer_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(event: &TransferEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            message_id: Uuid::new_v4(),
            transfer_id: event.transfer_id(),
            event_type: event.event_type().to_string(),
            payload: serde_json::to_value(event)?,
            occurred_at: Utc::now(),
        })
    }

    /// Key consumers deduplicate redeliveries on.
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.transfer_id, self.event_type)
    }

    /// Decode the payload back into the typed event.
    pub fn event(&self) -> Result<TransferEvent, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
