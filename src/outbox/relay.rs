//! Outbox Relay
//!
//! Delivers committed outbox messages at-least-once, in commit order.
//! When a message of a transfer fails, the remaining messages of that
//! transfer are held back until it is delivered, so a deposit never overtakes
//! its withdrawal. A message that keeps failing is dead-lettered after
//! `max_attempts` tries and its transfer stays parked for an operator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::publisher::EventPublisher;
use crate::store::{OutboxStore, StoreError};

#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    /// Messages read per pass (default: 100)
    pub batch_size: i64,
    /// Pause between passes (default: 1 second)
    pub interval: Duration,
    /// Failed attempts before a message is dead-lettered (default: 10)
    pub max_attempts: i32,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            interval: Duration::from_millis(1000),
            max_attempts: 10,
        }
    }
}

/// Outcome of one relay pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: u64,
    pub failed: u64,
    /// Held back behind an earlier failure of the same transfer
    pub skipped: u64,
    /// Given up on during this pass
    pub dead_lettered: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Outbox store error: {0}")]
    Store(#[from] StoreError),
}

pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    config: OutboxRelayConfig,
}

impl OutboxRelay {
    pub fn new(store: Arc<dyn OutboxStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self::with_config(store, publisher, OutboxRelayConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        config: OutboxRelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &OutboxRelayConfig {
        &self.config
    }

    /// Deliver one batch of pending messages.
    pub async fn relay_once(&self) -> Result<RelayReport, RelayError> {
        let pending = self.store.pending_outbox(self.config.batch_size).await?;
        let mut report = RelayReport::default();
        let mut blocked: HashSet<Uuid> = HashSet::new();

        for message in pending {
            let transfer_id = message.envelope.transfer_id;
            if blocked.contains(&transfer_id) {
                report.skipped += 1;
                continue;
            }

            match self.publisher.send(&message.channel, &message.envelope).await {
                Ok(()) => {
                    self.store.mark_delivered(message.id).await?;
                    report.delivered += 1;
                    tracing::debug!(
                        outbox_id = message.id,
                        transfer_id = %transfer_id,
                        channel = %message.channel,
                        publisher = self.publisher.name(),
                        "Outbox message delivered"
                    );
                }
                Err(e) => {
                    let attempts = message.attempts + 1;
                    blocked.insert(transfer_id);
                    report.failed += 1;

                    if attempts >= self.config.max_attempts {
                        self.store.dead_letter(message.id, &e.to_string()).await?;
                        report.dead_lettered += 1;
                        tracing::error!(
                            outbox_id = message.id,
                            transfer_id = %transfer_id,
                            channel = %message.channel,
                            attempts,
                            error = %e,
                            "Outbox message dead-lettered, transfer parked"
                        );
                    } else {
                        self.store.mark_attempt_failed(message.id, &e.to_string()).await?;
                        tracing::warn!(
                            outbox_id = message.id,
                            transfer_id = %transfer_id,
                            channel = %message.channel,
                            attempts,
                            error = %e,
                            "Outbox delivery failed, will retry"
                        );
                    }
                }
            }
        }

        if report.delivered > 0 || report.failed > 0 {
            tracing::info!(
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                dead_lettered = report.dead_lettered,
                "Outbox relay pass finished"
            );
        }

        Ok(report)
    }
}
