//! API Middleware
//!
//! Per-request tracing span and access logging with header redaction.

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use super::routes::IDEMPOTENCY_KEY_HEADER;

/// Header carrying the request id set by `SetRequestIdLayer`
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Headers whose values never reach the logs
const SENSITIVE_HEADERS: &[&str] = &["authorization", "proxy-authorization", "cookie", "set-cookie"];

const REDACTED: &str = "[REDACTED]";

/// Header pairs safe to log; sensitive values are replaced
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let sensitive = SENSITIVE_HEADERS
                .iter()
                .any(|s| name.as_str().eq_ignore_ascii_case(s));
            let shown = match (sensitive, value.to_str()) {
                (true, _) => REDACTED,
                (false, Ok(v)) => v,
                (false, Err(_)) => "[non-ascii]",
            };
            (name.to_string(), shown.to_string())
        })
        .collect()
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Wrap each request in a span carrying its request id and idempotency key,
/// so orchestrator logs for one transfer can be correlated.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = header_value(request.headers(), REQUEST_ID_HEADER).unwrap_or_default();
    let idempotency_key = header_value(request.headers(), IDEMPOTENCY_KEY_HEADER);

    let span = tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
        idempotency_key = ?idempotency_key,
    );

    async move {
        tracing::debug!(headers = ?mask_headers_for_logging(request.headers()), "Request received");
        let started = std::time::Instant::now();

        let response = next.run(request).await;

        let status = response.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), elapsed_ms, "Request failed");
        } else {
            tracing::info!(status = status.as_u16(), elapsed_ms, "Request completed");
        }
        response
    }
    .instrument(span)
    .await
}
