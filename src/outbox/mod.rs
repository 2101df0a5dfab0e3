//! Outbox delivery
//!
//! Messages enqueued inside a committed transfer are handed to the
//! broker-facing [`EventPublisher`](crate::publisher::EventPublisher) here.

mod relay;

pub use relay::{OutboxRelay, OutboxRelayConfig, RelayError, RelayReport};
