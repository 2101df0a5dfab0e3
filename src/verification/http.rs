//! HTTP verification client

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{CallError, VerificationClient};

#[derive(Debug, Clone)]
pub struct HttpVerificationClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpVerificationClient {
    pub fn new(timeout: Duration) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CallError::Protocol(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// Classify a failure that happened before a status line was read.
    ///
    /// Unparseable responses are protocol faults. Every other transport
    /// failure (refused, reset, closed before answering) is connectivity.
    fn map_error(&self, err: reqwest::Error) -> CallError {
        if err.is_timeout() {
            return CallError::Timeout(self.timeout.as_millis() as u64);
        }
        if err.is_connect() {
            return CallError::Connect(err.to_string());
        }
        if hyper_source(&err).is_some_and(|e| e.is_parse()) {
            return CallError::Protocol(err.to_string());
        }
        if err.is_request() {
            return CallError::Connect(err.to_string());
        }
        CallError::Protocol(err.to_string())
    }
}

fn hyper_source(err: &reqwest::Error) -> Option<&hyper::Error> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            return Some(hyper_err);
        }
        source = cause.source();
    }
    None
}

#[async_trait]
impl VerificationClient for HttpVerificationClient {
    async fn call(&self, endpoint: &str) -> Result<StatusCode, CallError> {
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        // The status decides the transfer; the body is only logged
        let status = response.status();
        match response.text().await {
            Ok(body) if status == StatusCode::OK => {
                tracing::info!(body = %body, "Received response from verification service");
            }
            Ok(body) => {
                tracing::debug!(status = %status, body = %body, "Verification service answered");
            }
            Err(e) => {
                tracing::warn!(status = %status, error = %e, "Could not read verification response body");
            }
        }

        Ok(status)
    }
}
