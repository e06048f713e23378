use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the messaging bridge.
///
/// Correlation timeouts (`NoResponse`, `NoAck`) are delivered through the
/// caller's awaited future; decode-side errors (`UnregisteredNamespace`,
/// `MalformedEnvelope`, `UnexpectedResponse`) are reported and the offending
/// message dropped without ever taking down a delivery worker.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("no response received before the response timeout")]
    NoResponse,
    #[error("no ack received before the ack timeout")]
    NoAck,
    #[error("no message registration found for namespace: {0}")]
    UnregisteredNamespace(String),
    #[error("namespace already registered: {0}")]
    AlreadyRegistered(String),
    #[error("namespace does not expect a response: {0}")]
    UnexpectedResponse(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("queued publishing is disabled")]
    QueueDisabled,
    #[error("bridge is shutting down")]
    ShuttingDown,
    #[error("correlation channel closed")]
    ChannelClosed,
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::MalformedEnvelope(e.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
