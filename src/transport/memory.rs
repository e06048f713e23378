//! In-process transport backed by a shared broker.
//!
//! Connects multiple bridge clients within one process for tests and local
//! development. Delivery is immediate and at-most-once: publishing to a
//! channel with no subscribers silently drops the payload, matching the
//! pub/sub semantics the bridge is specified against.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Subscription, Transport, TransportError, TransportEvent};

type SubscriberList = Vec<(u64, mpsc::UnboundedSender<TransportEvent>)>;

/// Shared hub connecting every [`MemoryTransport`] cloned from it.
#[derive(Default)]
pub struct MemoryBroker {
    channels: DashMap<String, SubscriberList>,
    next_subscriber: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn subscribe(&self, channel: &str) -> (u64, mpsc::UnboundedReceiver<TransportEvent>) {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push((id, tx));
        (id, rx)
    }

    fn unsubscribe(&self, channel: &str, id: u64) {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    fn publish(&self, channel: &str, payload: &str) {
        if let Some(mut subscribers) = self.channels.get_mut(channel) {
            subscribers.retain(|(_, tx)| {
                tx.send(TransportEvent {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                })
                .is_ok()
            });
        }
    }
}

/// One client's connection to a [`MemoryBroker`].
pub struct MemoryTransport {
    broker: Arc<MemoryBroker>,
    connected: AtomicBool,
    subscriptions: DashMap<String, u64>,
}

impl MemoryTransport {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            connected: AtomicBool::new(false),
            subscriptions: DashMap::new(),
        }
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Release);
        for entry in self.subscriptions.iter() {
            self.broker.unsubscribe(entry.key(), *entry.value());
        }
        self.subscriptions.clear();
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.broker.publish(channel, &payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, TransportError> {
        self.ensure_connected()?;
        let (id, rx) = self.broker.subscribe(channel);
        self.subscriptions.insert(channel.to_string(), id);
        debug!(channel, "subscribed");
        Ok(Subscription::new(channel, rx))
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        if let Some((_, id)) = self.subscriptions.remove(channel) {
            self.broker.unsubscribe(channel, id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let broker = MemoryBroker::new();
        let a = MemoryTransport::new(broker.clone());
        let b = MemoryTransport::new(broker.clone());
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let mut sub = b.subscribe("ch").await.unwrap();
        a.publish("ch", "hello".to_string()).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.channel, "ch");
        assert_eq!(event.payload, "hello");
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_dropped() {
        let broker = MemoryBroker::new();
        let a = MemoryTransport::new(broker);
        a.connect().await.unwrap();
        a.publish("nowhere", "lost".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_fails_when_disconnected() {
        let broker = MemoryBroker::new();
        let a = MemoryTransport::new(broker);
        let result = a.publish("ch", "x".to_string()).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        let a = MemoryTransport::new(broker.clone());
        a.connect().await.unwrap();

        let mut sub = a.subscribe("ch").await.unwrap();
        a.unsubscribe("ch").await.unwrap();
        a.publish("ch", "late".to_string()).await.unwrap();

        assert!(sub.recv().await.is_none());
    }
}
