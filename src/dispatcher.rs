//! Inbound dispatcher: consumes this process's target channel and hands each
//! envelope to its registered handler.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::codec::EnvelopeCodec;
use crate::config::BridgeConfig;
use crate::entity::MessageEntity;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::MessageRegistry;
use crate::transport::{Subscription, Transport};

/// Subscribes the process's own target channel and runs registered handlers
/// against everything that arrives there.
///
/// Faults are isolated per message: a payload that fails to decode, or a
/// namespace with no registration, is logged and dropped without touching
/// the worker loop.
pub struct InboundDispatcher {
    transport: Arc<dyn Transport>,
    registry: Arc<MessageRegistry>,
    codec: EnvelopeCodec,
    target_channel: String,
    channel_prefix: String,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl InboundDispatcher {
    pub fn new(
        server_id: &str,
        transport: Arc<dyn Transport>,
        registry: Arc<MessageRegistry>,
        config: &BridgeConfig,
    ) -> Self {
        let target_channel = MessageEntity::target_with_prefix(&config.channel_prefix, server_id)
            .channel()
            .to_string();
        Self {
            transport,
            codec: EnvelopeCodec::new(registry.clone()),
            registry,
            target_channel,
            channel_prefix: config.channel_prefix.clone(),
            worker: Mutex::new(None),
        }
    }

    /// Subscribes the target channel and starts the receive loop.
    pub async fn load(&self) -> BridgeResult<()> {
        let subscription = self
            .transport
            .subscribe(&self.target_channel)
            .await
            .map_err(BridgeError::Transport)?;

        let mut worker = self.worker.lock().await;
        *worker = Some(spawn_receive_worker(
            subscription,
            self.transport.clone(),
            self.registry.clone(),
            self.codec.clone(),
            self.channel_prefix.clone(),
        ));
        Ok(())
    }

    /// Stops the receive loop and drops the subscription. Best-effort.
    pub async fn unload(&self) {
        if let Some(handle) = self.worker.lock().await.take() {
            handle.abort();
        }
        if let Err(e) = self.transport.unsubscribe(&self.target_channel).await {
            warn!(error = %e, "failed to unsubscribe target channel");
        }
    }

    pub fn target_channel(&self) -> &str {
        &self.target_channel
    }
}

fn spawn_receive_worker(
    mut subscription: Subscription,
    transport: Arc<dyn Transport>,
    registry: Arc<MessageRegistry>,
    codec: EnvelopeCodec,
    channel_prefix: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            dispatch_one(&transport, &registry, &codec, &channel_prefix, &event.payload).await;
        }
    })
}

async fn dispatch_one(
    transport: &Arc<dyn Transport>,
    registry: &MessageRegistry,
    codec: &EnvelopeCodec,
    channel_prefix: &str,
    payload: &str,
) {
    let raw = match codec.decode_envelope(payload) {
        Ok(raw) => raw,
        Err(e @ BridgeError::UnregisteredNamespace(_)) => {
            warn!(error = %e, "dropping envelope for unknown namespace");
            return;
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed envelope");
            return;
        }
    };

    // decode_envelope guarantees both the namespace tag and the registration.
    let namespace = match raw.namespace() {
        Some(ns) => ns.to_string(),
        None => return,
    };
    let registration = match registry.get_registration(&namespace) {
        Some(registration) => registration,
        None => return,
    };

    let unique_id = raw.unique_id;
    let sender_id = raw.sender.id.clone();
    let invocation = match registration.receive()(raw) {
        Ok(invocation) => invocation,
        Err(e) => {
            warn!(error = %e, %namespace, "handler decode failed, dropping envelope");
            return;
        }
    };

    // The ack goes out before the handler runs: it acknowledges receipt,
    // not completion.
    if invocation.ack_requested {
        let ack_channel = MessageEntity::ack_with_prefix(channel_prefix, &sender_id);
        let ack = json!({ "uniqueId": unique_id }).to_string();
        if let Err(e) = transport.publish(ack_channel.channel(), ack).await {
            error!(error = %e, %unique_id, "failed to publish ack");
        }
    }

    tokio::spawn(invocation.run);
}
