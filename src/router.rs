//! Message router: outbound envelope construction, publish paths, and the
//! correlation workers for this process's response and ack channels.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::codec::{decode_typed_response, AckPayload, EnvelopeCodec, RawResponse};
use crate::config::BridgeConfig;
use crate::correlation::{CorrelationCache, PendingReceiver};
use crate::entity::MessageEntity;
use crate::error::{BridgeError, BridgeResult};
use crate::message::{BridgeMessage, BridgeResponse, Envelope, MessageResponse, Sender};
use crate::queue::QueuePublisher;
use crate::registry::MessageRegistry;
use crate::transport::{Subscription, Transport};

/// Routes outbound messages and correlates inbound responses and acks.
///
/// `load()` must run before any publish: it subscribes this process's
/// response and ack channels and starts the batch publisher. `unload()` is
/// the global cancellation point: queued envelopes get one forced drain and
/// every still-pending correlation is failed rather than dropped.
pub struct MessageRouter {
    transport: Arc<dyn Transport>,
    registry: Arc<MessageRegistry>,
    codec: EnvelopeCodec,
    sender: Sender,
    response_channel: String,
    ack_channel: String,
    responses: Arc<CorrelationCache<RawResponse>>,
    acks: Arc<CorrelationCache<Uuid>>,
    queue: Option<QueuePublisher>,
    shutdown_grace: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl MessageRouter {
    pub fn new(
        server_id: &str,
        transport: Arc<dyn Transport>,
        registry: Arc<MessageRegistry>,
        config: &BridgeConfig,
    ) -> Self {
        let prefix = &config.channel_prefix;
        let response_channel = MessageEntity::response_with_prefix(prefix, server_id)
            .channel()
            .to_string();
        let ack_channel = MessageEntity::ack_with_prefix(prefix, server_id)
            .channel()
            .to_string();
        let sender = Sender {
            id: server_id.to_string(),
            channel: response_channel.clone(),
        };
        let responses = Arc::new(CorrelationCache::new(config.response_timeout, || {
            BridgeError::NoResponse
        }));
        let acks = Arc::new(CorrelationCache::new(config.ack_timeout, || {
            BridgeError::NoAck
        }));
        let queue = config.queue_enabled.then(|| {
            QueuePublisher::new(transport.clone(), acks.clone(), config.queue_interval)
        });

        Self {
            transport,
            codec: EnvelopeCodec::new(registry.clone()),
            registry,
            sender,
            response_channel,
            ack_channel,
            responses,
            acks,
            queue,
            shutdown_grace: config.shutdown_grace,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Publishes immediately and, when the payload opts into acknowledgement,
    /// waits for the receiver's ack before resolving.
    #[tracing::instrument(skip(self, message, receiver), fields(channel = receiver.channel()))]
    pub async fn publish<M: BridgeMessage>(
        &self,
        message: M,
        receiver: &MessageEntity,
    ) -> BridgeResult<Envelope<M>> {
        let envelope = Envelope::new(self.sender.clone(), message);
        let payload = self.codec.encode_envelope(&envelope)?;

        // Expect the ack before publishing so a fast receiver cannot answer
        // into a not-yet-registered correlation.
        let ack_rx = envelope
            .ack_requested()
            .then(|| self.acks.insert(envelope.unique_id()));

        if let Err(e) = self
            .transport
            .publish(receiver.channel(), payload)
            .await
        {
            if ack_rx.is_some() {
                self.acks.discard(envelope.unique_id());
            }
            return Err(BridgeError::Transport(e));
        }

        if let Some(rx) = ack_rx {
            await_pending(rx).await?;
        }
        Ok(envelope)
    }

    /// Explicit immediate-delivery alias for [`MessageRouter::publish`].
    pub async fn publish_immediate<M: BridgeMessage>(
        &self,
        message: M,
        receiver: &MessageEntity,
    ) -> BridgeResult<Envelope<M>> {
        self.publish(message, receiver).await
    }

    /// Enqueues the envelope for the next batch tick; the returned future
    /// resolves only once the batch publisher flushes it.
    #[tracing::instrument(skip(self, message, receiver), fields(channel = receiver.channel()))]
    pub async fn publish_queued<M: BridgeMessage>(
        &self,
        message: M,
        receiver: &MessageEntity,
    ) -> BridgeResult<Envelope<M>> {
        let queue = self.queue.as_ref().ok_or(BridgeError::QueueDisabled)?;
        let envelope = Envelope::new(self.sender.clone(), message);
        let payload = self.codec.encode_envelope(&envelope)?;

        let flushed = queue
            .enqueue(
                envelope.unique_id(),
                receiver.channel().to_string(),
                payload,
                envelope.ack_requested(),
            )
            .await;

        match flushed.await {
            Err(_) => Err(BridgeError::ChannelClosed),
            Ok(Err(e)) => Err(e),
            Ok(Ok(None)) => Ok(envelope),
            Ok(Ok(Some(ack_rx))) => {
                await_pending(ack_rx).await?;
                Ok(envelope)
            }
        }
    }

    /// Publishes and waits for the typed response correlated by the
    /// envelope's unique id.
    #[tracing::instrument(skip(self, message, receiver), fields(channel = receiver.channel()))]
    pub async fn wait_response<M: BridgeMessage, R: BridgeResponse>(
        &self,
        message: M,
        receiver: &MessageEntity,
    ) -> BridgeResult<MessageResponse<M, R>> {
        let envelope = Envelope::new(self.sender.clone(), message);
        let payload = self.codec.encode_envelope(&envelope)?;

        // Response and ack correlations both registered before the publish.
        let response_rx = self.responses.insert(envelope.unique_id());
        let ack_rx = envelope
            .ack_requested()
            .then(|| self.acks.insert(envelope.unique_id()));

        if let Err(e) = self
            .transport
            .publish(receiver.channel(), payload)
            .await
        {
            self.responses.discard(envelope.unique_id());
            if ack_rx.is_some() {
                self.acks.discard(envelope.unique_id());
            }
            return Err(BridgeError::Transport(e));
        }

        if let Some(rx) = ack_rx {
            if let Err(e) = await_pending(rx).await {
                self.responses.discard(envelope.unique_id());
                return Err(e);
            }
        }

        let raw = await_pending(response_rx).await?;
        decode_typed_response(raw)
    }

    /// Publishes a prebuilt response envelope. Fire-and-forget: no
    /// correlation bookkeeping on the responder's side.
    pub async fn publish_response<M: BridgeMessage, R: BridgeResponse>(
        &self,
        response: &MessageResponse<M, R>,
        receiver: &MessageEntity,
    ) -> BridgeResult<()> {
        let payload = self.codec.encode_response(response)?;
        self.transport
            .publish(receiver.channel(), payload)
            .await
            .map_err(BridgeError::Transport)
    }

    /// Builds and publishes a response to `original`.
    pub async fn publish_response_to<M: BridgeMessage, R: BridgeResponse>(
        &self,
        original: &Envelope<M>,
        response: R,
        receiver: &MessageEntity,
    ) -> BridgeResult<()> {
        let message_response = MessageResponse::new(original.clone(), response);
        self.publish_response(&message_response, receiver).await
    }

    /// Replies to `original`, targeting the sender's response channel.
    pub async fn reply<M: BridgeMessage, R: BridgeResponse>(
        &self,
        original: &Envelope<M>,
        response: R,
    ) -> BridgeResult<()> {
        let receiver = MessageEntity::from_channel(original.sender().channel.clone());
        self.publish_response_to(original, response, &receiver).await
    }

    /// Changes the batch flush interval at runtime.
    pub fn configure_queued_publishing(&self, interval: Duration) -> BridgeResult<()> {
        let queue = self.queue.as_ref().ok_or(BridgeError::QueueDisabled)?;
        queue.set_interval(interval);
        Ok(())
    }

    /// Subscribes the response and ack channels and starts the batch
    /// publisher. A failure here is fatal to startup.
    pub async fn load(&self) -> BridgeResult<()> {
        let response_sub = self
            .transport
            .subscribe(&self.response_channel)
            .await
            .map_err(BridgeError::Transport)?;
        let ack_sub = self
            .transport
            .subscribe(&self.ack_channel)
            .await
            .map_err(BridgeError::Transport)?;

        let mut workers = self.workers.lock().await;
        workers.push(spawn_response_worker(
            response_sub,
            self.codec.clone(),
            self.registry.clone(),
            self.responses.clone(),
        ));
        workers.push(spawn_ack_worker(ack_sub, self.acks.clone()));

        if let Some(queue) = &self.queue {
            queue.start().await;
        }
        Ok(())
    }

    /// Tears the router down. Best-effort: every step runs even if an
    /// earlier one fails, and all pending work is failed, never dropped.
    pub async fn unload(&self) {
        if let Some(queue) = &self.queue {
            queue.stop(self.shutdown_grace).await;
        }

        for handle in self.workers.lock().await.drain(..) {
            handle.abort();
        }

        if let Err(e) = self.transport.unsubscribe(&self.response_channel).await {
            warn!(error = %e, "failed to unsubscribe response channel");
        }
        if let Err(e) = self.transport.unsubscribe(&self.ack_channel).await {
            warn!(error = %e, "failed to unsubscribe ack channel");
        }

        self.responses.fail_all(|| BridgeError::ShuttingDown);
        self.acks.fail_all(|| BridgeError::ShuttingDown);
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }
}

async fn await_pending<T>(rx: PendingReceiver<T>) -> BridgeResult<T> {
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(BridgeError::ChannelClosed),
    }
}

fn spawn_response_worker(
    mut subscription: Subscription,
    codec: EnvelopeCodec,
    registry: Arc<MessageRegistry>,
    responses: Arc<CorrelationCache<RawResponse>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            handle_response(&codec, &registry, &responses, &event.payload).await;
        }
    })
}

/// Handles one inbound response: the registered response hook runs first,
/// then the waiting future is completed. Per-message failures are reported
/// and dropped; the worker never dies on a bad payload.
async fn handle_response(
    codec: &EnvelopeCodec,
    registry: &MessageRegistry,
    responses: &CorrelationCache<RawResponse>,
    payload: &str,
) {
    let raw = match codec.decode_response(payload) {
        Ok(raw) => raw,
        Err(e @ (BridgeError::UnregisteredNamespace(_) | BridgeError::UnexpectedResponse(_))) => {
            // Protocol violation by the peer: surfaced, never swallowed.
            error!(error = %e, "dropping response that violates the registration contract");
            return;
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed response");
            return;
        }
    };

    // decode_response already verified the registration expects a response.
    let namespace = raw.original_message.namespace().unwrap_or_default();
    if let Some(registration) = registry.get_registration(namespace) {
        if let Some(hook) = registration.response_handler() {
            match hook(raw.clone()) {
                Ok(run) => run.await,
                Err(e) => warn!(error = %e, namespace, "response hook decode failed"),
            }
        }
    }

    let id = raw.original_message.unique_id;
    if !responses.complete(id, raw) {
        debug!(%id, "response arrived with no pending correlation");
    }
}

fn spawn_ack_worker(
    mut subscription: Subscription,
    acks: Arc<CorrelationCache<Uuid>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match serde_json::from_str::<AckPayload>(&event.payload) {
                Ok(ack) => {
                    if !acks.complete(ack.unique_id, ack.unique_id) {
                        debug!(id = %ack.unique_id, "ack arrived with no pending correlation");
                    }
                }
                Err(e) => warn!(error = %e, "dropping malformed ack"),
            }
        }
    })
}
