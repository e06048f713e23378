//! # redisbridge: typed request/response messaging over pub/sub
//!
//! redisbridge turns a raw publish/subscribe transport into a typed,
//! addressable messaging layer between named processes.
//!
//! ## Core Concepts
//!
//! ### 1. Addressing
//! Every process owns three channels derived from its id ([`entity`]):
//! a target channel for inbound messages, a response channel, and an ack
//! channel. A reserved broadcast address fans a message out to every
//! subscribed process.
//!
//! ### 2. Typed Registrations
//! Message payloads are plain serde types tagged with a namespace
//! ([`message`], [`registry`]). A registration binds the namespace to its
//! payload type, its async receive handler, and optionally a response type.
//!
//! ### 3. Request/Response Correlation
//! Each envelope carries a unique id. Responses and acks are matched back
//! to their originating publish through per-id correlations with a TTL
//! ([`router`]); an expired correlation fails the waiting caller instead of
//! leaving it hanging.
//!
//! ### 4. Delivery Modes
//! Publishes go out immediately, or through a batch queue flushed on a
//! configurable interval ([`config`]). Payload types may opt into receipt
//! acknowledgement.
//!
//! ## Message Flow
//!
//! ```text
//! publish → wire envelope → target channel → dispatcher → handler
//!                                              │
//!                 ack channel  ◀── ack ────────┤
//!                 response channel ◀── reply ──┘
//! ```
//!
//! The transport itself is abstract ([`transport`]); an in-process
//! implementation backs the test suite and embedded use.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod message;
pub mod registry;
pub mod router;
pub mod transport;

mod correlation;
mod queue;

// Re-exports
pub use bridge::BridgeClient;
pub use codec::{AckPayload, EnvelopeCodec, RawEnvelope, RawResponse};
pub use config::BridgeConfig;
pub use dispatcher::InboundDispatcher;
pub use entity::MessageEntity;
pub use error::{BridgeError, BridgeResult};
pub use message::{BridgeMessage, BridgeResponse, Envelope, MessageResponse, Sender};
pub use registry::{MessageRegistry, Registration};
pub use router::MessageRouter;
pub use transport::memory::{MemoryBroker, MemoryTransport};
pub use transport::{Subscription, Transport, TransportError, TransportEvent};
