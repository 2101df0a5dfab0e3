//! Event Publisher
//!
//! Broker-facing delivery of transfer events. Delivery is at-least-once:
//! a successful `send` means the broker accepted the message, nothing more.
//! Inside a transfer, events are enqueued through
//! [`StoreTransaction::send`](crate::store::StoreTransaction::send) and only
//! reach an [`EventPublisher`] through the outbox relay after commit.

mod http;
mod memory;

pub use http::HttpPublisher;
pub use memory::InMemoryBroker;

use async_trait::async_trait;

use crate::domain::EventEnvelope;

/// Default channel for withdrawal events
pub const DEFAULT_WITHDRAW_TOPIC: &str = "withdraw-money-topic";

/// Default channel for deposit events
pub const DEFAULT_DEPOSIT_TOPIC: &str = "deposit-money-topic";

/// Errors raised while publishing
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Broker rejected message with status {0}")]
    Rejected(u16),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Outbox write failed: {0}")]
    Outbox(String),
}

/// Channel names the two transfer events are published on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channels {
    pub withdrawal: String,
    pub deposit: String,
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            withdrawal: DEFAULT_WITHDRAW_TOPIC.to_string(),
            deposit: DEFAULT_DEPOSIT_TOPIC.to_string(),
        }
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publisher name for logging
    fn name(&self) -> &'static str;

    /// Hand one envelope to the messaging layer
    async fn send(&self, channel: &str, envelope: &EventEnvelope) -> Result<(), PublishError>;
}
