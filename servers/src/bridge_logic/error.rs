//! Error taxonomy for the bridge. Broker-side failures are either retried
//! transparently (transport loss) or reported to the immediate caller
//! (publish failures); none of them terminate the process.

use thiserror::Error;

/// Broker transport failures. Recovered by the reconnect loop, never fatal.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker unreachable: {0}")]
    Connect(#[source] redis::RedisError),
    #[error("broker connection lost")]
    Dropped,
}

/// The broker rejected the subscription. Non-fatal: the link stays
/// connected and the subscription is re-issued on the next reconnect cycle.
#[derive(Debug, Error)]
#[error("broker rejected subscription to {filter:?}: {source}")]
pub struct SubscribeError {
    pub filter: String,
    #[source]
    pub source: redis::RedisError,
}

/// A publish attempt failed. Surfaced to the gateway caller, never retried.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker link is not connected")]
    Disconnected,
    #[error("publish queue unavailable")]
    QueueUnavailable,
    #[error("broker rejected publish: {0}")]
    Broker(#[source] redis::RedisError),
}

/// Malformed inbound publish request. Rejected at the boundary; the broker
/// is never contacted.
#[derive(Debug, Error)]
#[error("expected {{ topic, payload }}")]
pub struct BadRequest;

/// A realtime client transport fault. The connection is dropped from the
/// open set; other clients never see it.
#[derive(Debug, Error)]
#[error("realtime client transport fault: {0}")]
pub struct ConnectionError(pub axum::Error);
