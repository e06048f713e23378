//! Top-level client facade tying the registry, router, and dispatcher to a
//! transport under one lifecycle.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::dispatcher::InboundDispatcher;
use crate::entity::MessageEntity;
use crate::error::{BridgeError, BridgeResult};
use crate::registry::MessageRegistry;
use crate::router::MessageRouter;
use crate::transport::Transport;

/// One process's connection to the bridge.
///
/// Construction wires everything up but touches nothing: registrations go in
/// first, then `load()` connects the transport and brings the router and
/// dispatcher online in that order. `unload()` reverses it best-effort.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use serde::{Deserialize, Serialize};
/// # use redisbridge::{BridgeClient, BridgeConfig, BridgeMessage, MemoryBroker, MemoryTransport};
/// # #[derive(Debug, Clone, Serialize, Deserialize)]
/// # struct Ping { text: String }
/// # impl BridgeMessage for Ping {
/// #     fn namespace(&self) -> &str { "demo:ping" }
/// # }
/// # async fn run() -> redisbridge::BridgeResult<()> {
/// let broker = MemoryBroker::new();
/// let transport = Arc::new(MemoryTransport::new(broker));
/// let client = BridgeClient::new("server-a", transport, BridgeConfig::default());
///
/// client
///     .registry()
///     .register::<Ping>("demo:ping")
///     .on_receive(|envelope| async move {
///         println!("got {}", envelope.message().text);
///     })
///     .build()?;
///
/// client.load().await?;
/// # Ok(())
/// # }
/// ```
pub struct BridgeClient {
    server_id: String,
    transport: Arc<dyn Transport>,
    registry: Arc<MessageRegistry>,
    router: MessageRouter,
    dispatcher: InboundDispatcher,
    entity: MessageEntity,
}

impl BridgeClient {
    pub fn new(server_id: &str, transport: Arc<dyn Transport>, config: BridgeConfig) -> Self {
        let registry = Arc::new(MessageRegistry::new());
        let router = MessageRouter::new(server_id, transport.clone(), registry.clone(), &config);
        let dispatcher =
            InboundDispatcher::new(server_id, transport.clone(), registry.clone(), &config);
        let entity = MessageEntity::target_with_prefix(&config.channel_prefix, server_id);
        Self {
            server_id: server_id.to_string(),
            transport,
            registry,
            router,
            dispatcher,
            entity,
        }
    }

    /// Connects the transport and brings the router and dispatcher online.
    /// Any failure aborts startup; nothing is rolled back automatically.
    pub async fn load(&self) -> BridgeResult<()> {
        self.transport
            .connect()
            .await
            .map_err(BridgeError::Transport)?;
        self.router.load().await?;
        self.dispatcher.load().await?;
        info!(server_id = %self.server_id, "bridge client online");
        Ok(())
    }

    /// Takes the client offline. Every step runs even if one fails.
    pub async fn unload(&self) {
        self.dispatcher.unload().await;
        self.router.unload().await;
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "transport disconnect failed");
        }
        info!(server_id = %self.server_id, "bridge client offline");
    }

    /// The registry to commit message registrations into. Registrations must
    /// land before the first matching envelope arrives.
    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    /// The router, for all publish and request/response operations.
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// This process's own target address.
    pub fn entity(&self) -> &MessageEntity {
        &self.entity
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}
