//! Namespace-based handler registry.
//!
//! Each namespace is registered exactly once, during setup, through a fluent
//! builder. Whether a namespace expects a response is a registration-time
//! fact, expressed as two distinct [`Registration`] variants rather than
//! nullable fields. The registry is read concurrently by dispatch workers, so
//! registrations live in a `DashMap` and are append-only: there is no
//! unregister operation.
//!
//! Handlers are stored type-erased. At `build()` time, when the payload type
//! is still known, the builder captures a closure that decodes the raw wire
//! envelope into the typed payload and invokes the user handler. That closure
//! is the indirection table entry dispatched on the namespace tag at decode
//! time.

use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;

use crate::codec::{decode_typed_envelope, decode_typed_response, RawEnvelope, RawResponse};
use crate::error::{BridgeError, BridgeResult};
use crate::message::{BridgeMessage, BridgeResponse, Envelope, MessageResponse};

/// Decodes a raw inbound envelope and prepares its handler invocation.
pub(crate) type ReceiveFn =
    Arc<dyn Fn(RawEnvelope) -> BridgeResult<InboundInvocation> + Send + Sync>;

/// Decodes a raw inbound response and prepares its handler invocation.
pub(crate) type ResponseFn =
    Arc<dyn Fn(RawResponse) -> BridgeResult<BoxFuture<'static, ()>> + Send + Sync>;

/// A decoded inbound message, ready to run its handler.
pub(crate) struct InboundInvocation {
    /// Whether the payload type asked for an ack notification.
    pub ack_requested: bool,
    /// The handler call, boxed for execution on a worker task.
    pub run: BoxFuture<'static, ()>,
}

/// One committed registration: a namespace bound to its payload type's decode
/// path and handlers.
pub enum Registration {
    WithoutResponse {
        namespace: String,
        receive: ReceiveFn,
    },
    WithResponse {
        namespace: String,
        receive: ReceiveFn,
        on_response: Option<ResponseFn>,
    },
}

impl Registration {
    pub fn namespace(&self) -> &str {
        match self {
            Registration::WithoutResponse { namespace, .. } => namespace,
            Registration::WithResponse { namespace, .. } => namespace,
        }
    }

    pub fn expects_response(&self) -> bool {
        matches!(self, Registration::WithResponse { .. })
    }

    pub(crate) fn receive(&self) -> &ReceiveFn {
        match self {
            Registration::WithoutResponse { receive, .. } => receive,
            Registration::WithResponse { receive, .. } => receive,
        }
    }

    pub(crate) fn response_handler(&self) -> Option<&ResponseFn> {
        match self {
            Registration::WithoutResponse { .. } => None,
            Registration::WithResponse { on_response, .. } => on_response.as_ref(),
        }
    }
}

/// Registry mapping namespace strings to registrations.
#[derive(Default)]
pub struct MessageRegistry {
    registrations: DashMap<String, Arc<Registration>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts registering a namespace whose messages expect no response.
    pub fn register<M: BridgeMessage>(&self, namespace: &str) -> RegistrationBuilder<'_, M> {
        RegistrationBuilder {
            registry: self,
            namespace: namespace.to_string(),
            handler: None,
            _marker: PhantomData,
        }
    }

    /// Starts registering a namespace whose messages expect a typed response.
    pub fn register_with_response<M: BridgeMessage, R: BridgeResponse>(
        &self,
        namespace: &str,
    ) -> RegistrationBuilderWithResponse<'_, M, R> {
        RegistrationBuilderWithResponse {
            registry: self,
            namespace: namespace.to_string(),
            handler: None,
            response_handler: None,
            _marker: PhantomData,
        }
    }

    pub fn get_registration(&self, namespace: &str) -> Option<Arc<Registration>> {
        self.registrations.get(namespace).map(|r| r.clone())
    }

    pub fn is_registered(&self, namespace: &str) -> bool {
        self.registrations.contains_key(namespace)
    }

    fn commit(&self, namespace: String, registration: Registration) -> BridgeResult<()> {
        match self.registrations.entry(namespace) {
            Entry::Occupied(entry) => Err(BridgeError::AlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(registration));
                Ok(())
            }
        }
    }
}

/// Builder for a namespace without response.
pub struct RegistrationBuilder<'a, M> {
    registry: &'a MessageRegistry,
    namespace: String,
    handler: Option<ReceiveFn>,
    _marker: PhantomData<M>,
}

impl<'a, M: BridgeMessage> RegistrationBuilder<'a, M> {
    /// Sets the handler invoked for each received message.
    pub fn on_receive<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Envelope<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handler = Some(erase_receive(handler));
        self
    }

    /// Commits the registration. Fails if the namespace is already taken.
    pub fn build(self) -> BridgeResult<()> {
        let receive = self
            .handler
            .unwrap_or_else(|| erase_receive(|_: Envelope<M>| async {}));
        self.registry.commit(
            self.namespace.clone(),
            Registration::WithoutResponse {
                namespace: self.namespace,
                receive,
            },
        )
    }
}

/// Builder for a namespace with a typed response.
pub struct RegistrationBuilderWithResponse<'a, M, R> {
    registry: &'a MessageRegistry,
    namespace: String,
    handler: Option<ReceiveFn>,
    response_handler: Option<ResponseFn>,
    _marker: PhantomData<(M, R)>,
}

impl<'a, M: BridgeMessage, R: BridgeResponse> RegistrationBuilderWithResponse<'a, M, R> {
    /// Sets the handler invoked for each received message. The handler is
    /// expected to answer via `Router::reply`.
    pub fn on_receive<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Envelope<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handler = Some(erase_receive(handler));
        self
    }

    /// Sets a hook invoked for every inbound response to this namespace,
    /// before any waiting future is completed.
    pub fn on_response<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(MessageResponse<M, R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.response_handler = Some(erase_response(handler));
        self
    }

    /// Commits the registration. Fails if the namespace is already taken.
    pub fn build(self) -> BridgeResult<()> {
        let receive = self
            .handler
            .unwrap_or_else(|| erase_receive(|_: Envelope<M>| async {}));
        self.registry.commit(
            self.namespace.clone(),
            Registration::WithResponse {
                namespace: self.namespace,
                receive,
                on_response: self.response_handler,
            },
        )
    }
}

fn erase_receive<M, F, Fut>(handler: F) -> ReceiveFn
where
    M: BridgeMessage,
    F: Fn(Envelope<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |raw: RawEnvelope| {
        let envelope: Envelope<M> = decode_typed_envelope(raw)?;
        let ack_requested = envelope.ack_requested();
        let handler = handler.clone();
        Ok(InboundInvocation {
            ack_requested,
            run: async move { handler(envelope).await }.boxed(),
        })
    })
}

fn erase_response<M, R, F, Fut>(handler: F) -> ResponseFn
where
    M: BridgeMessage,
    R: BridgeResponse,
    F: Fn(MessageResponse<M, R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |raw: RawResponse| {
        let response: MessageResponse<M, R> = decode_typed_response(raw)?;
        let handler = handler.clone();
        Ok(async move { handler(response).await }.boxed())
    })
}
