//! Remote Verification Client
//!
//! The synchronous check made between the withdrawal and deposit emissions.

mod http;

pub use http::HttpVerificationClient;

use std::str::FromStr;

use async_trait::async_trait;
use reqwest::StatusCode;

/// Default verification endpoint
pub const DEFAULT_VERIFICATION_URL: &str = "http://localhost:8082/response/200";

/// Transport-level failures of a verification call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Endpoint could not be reached, or dropped the connection before
    /// sending a status line (refused, DNS, reset, closed early)
    #[error("Connection to verification service failed: {0}")]
    Connect(String),

    /// No response within the configured timeout
    #[error("Verification call timed out after {0} ms")]
    Timeout(u64),

    /// The peer answered with something that is not HTTP, or the client
    /// itself could not be built
    #[error("Verification protocol error: {0}")]
    Protocol(String),
}

/// What a returned status means for the transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// 200
    Verified,
    /// 503
    Unavailable,
    /// Everything else
    Unexpected(StatusCode),
}

pub fn classify(status: StatusCode) -> Verdict {
    match status {
        StatusCode::OK => Verdict::Verified,
        StatusCode::SERVICE_UNAVAILABLE => Verdict::Unavailable,
        other => Verdict::Unexpected(other),
    }
}

/// How to treat a status that is neither 200 nor 503
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnexpectedStatusPolicy {
    /// Fatal: roll the transfer back
    #[default]
    Rollback,
    /// Log and continue as if verified
    Proceed,
    /// Unclassified fault: fail the transfer but keep what was written
    FailWithoutRollback,
}

impl FromStr for UnexpectedStatusPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rollback" => Ok(Self::Rollback),
            "proceed" => Ok(Self::Proceed),
            "fail_without_rollback" => Ok(Self::FailWithoutRollback),
            other => Err(format!("unknown unexpected-status policy '{}'", other)),
        }
    }
}

#[async_trait]
pub trait VerificationClient: Send + Sync {
    /// Perform the request and return the response status
    async fn call(&self, endpoint: &str) -> Result<StatusCode, CallError>;
}
