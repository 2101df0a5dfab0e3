//! In-process broker
//!
//! Keeps a per-channel log of accepted envelopes and fans them out to
//! subscribers. Used when no external broker is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use crate::domain::EventEnvelope;

use super::{EventPublisher, PublishError};

const SUBSCRIBER_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct InMemoryBroker {
    log: Mutex<HashMap<String, Vec<EventEnvelope>>>,
    order: Mutex<Vec<(String, EventEnvelope)>>,
    tx: broadcast::Sender<(String, EventEnvelope)>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            log: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            tx,
        }
    }

    /// Receive every envelope accepted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<(String, EventEnvelope)> {
        self.tx.subscribe()
    }

    /// Envelopes accepted on `channel`, in acceptance order
    pub async fn messages(&self, channel: &str) -> Vec<EventEnvelope> {
        self.log
            .lock()
            .await
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    /// Every accepted `(channel, envelope)` across all channels, in acceptance order
    pub async fn history(&self) -> Vec<(String, EventEnvelope)> {
        self.order.lock().await.clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn send(&self, channel: &str, envelope: &EventEnvelope) -> Result<(), PublishError> {
        self.log
            .lock()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(envelope.clone());
        self.order
            .lock()
            .await
            .push((channel.to_string(), envelope.clone()));

        // No subscribers is not an error
        let _ = self.tx.send((channel.to_string(), envelope.clone()));

        tracing::debug!(
            channel = %channel,
            transfer_id = %envelope.transfer_id,
            event_type = %envelope.event_type,
            "Event accepted by in-memory broker"
        );
        Ok(())
    }
}
