//! Webhook publisher
//!
//! POSTs each envelope as JSON to `{base_url}/{channel}`. The dedupe key is
//! sent as `Idempotency-Key` so the receiving side can drop redeliveries.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::EventEnvelope;

use super::{EventPublisher, PublishError};

#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPublisher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                PublishError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn channel_url(&self, channel: &str) -> String {
        format!("{}/{}", self.base_url, channel)
    }
}

#[async_trait]
impl EventPublisher for HttpPublisher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, channel: &str, envelope: &EventEnvelope) -> Result<(), PublishError> {
        let response = self
            .client
            .post(self.channel_url(channel))
            .header("Idempotency-Key", envelope.dedupe_key())
            .json(envelope)
            .send()
            .await
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(status.as_u16()));
        }
        Ok(())
    }
}
