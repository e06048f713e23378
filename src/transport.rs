//! The pub/sub transport seam.
//!
//! The bridge treats its transport as an external collaborator: anything that
//! can connect, publish a string payload to a named channel, and deliver
//! subscribed `(channel, payload)` events works. Connection pooling,
//! credentials, and reconnection policy belong to the implementation, not to
//! this trait.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("transport is not connected")]
    NotConnected,
    #[error("publish to {channel} failed: {reason}")]
    PublishFailed { channel: String, reason: String },
    #[error("subscribe to {channel} failed: {reason}")]
    SubscribeFailed { channel: String, reason: String },
}

/// A raw delivery from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEvent {
    pub channel: String,
    pub payload: String,
}

/// Stream of deliveries for one subscribed channel.
///
/// Dropping the subscription stops delivery for this receiver; the channel
/// itself stays subscribed until [`Transport::unsubscribe`] is called.
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Subscription {
    pub fn new(channel: impl Into<String>, receiver: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Receives the next delivery, or `None` once the transport side closes.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.receiver.recv().await
    }
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Publishes `payload` to `channel`. At-most-once: a successful return
    /// acknowledges the send, not the delivery.
    async fn publish(&self, channel: &str, payload: String) -> Result<(), TransportError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;
}
