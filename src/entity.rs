//! Channel naming for logical targets.
//!
//! Every addressable process owns three channels derived from its server id:
//! a target channel for inbound messages, a response channel for replies to
//! messages it sent, and an ack channel for delivery acknowledgements. The
//! mapping is a pure function of `(prefix, server id)`; server ids are
//! lowercased so addressing is case-insensitive.

/// Default channel prefix when no override is configured.
pub const DEFAULT_PREFIX: &str = "redisbridge";

/// Environment variable overriding the channel prefix.
pub const PREFIX_ENV: &str = "REDISBRIDGE_CHANNEL_PREFIX";

/// Logical server id addressed by [`MessageEntity::broadcast`].
pub const BROADCAST_ID: &str = "broadcast";

/// Resolves the channel prefix from the environment, falling back to
/// [`DEFAULT_PREFIX`].
pub fn channel_prefix() -> String {
    std::env::var(PREFIX_ENV).unwrap_or_else(|_| DEFAULT_PREFIX.to_string())
}

/// A routing target: the transport channel a message is published to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageEntity {
    channel: String,
}

impl MessageEntity {
    /// Target channel of a specific server: `<prefix>:target:<id>`.
    pub fn of(server_id: &str) -> Self {
        Self::target_with_prefix(&channel_prefix(), server_id)
    }

    /// Response channel of a specific server: `<prefix>:response:<id>`.
    pub fn response(server_id: &str) -> Self {
        Self::response_with_prefix(&channel_prefix(), server_id)
    }

    /// Ack channel of a specific server: `<prefix>:ack:<id>`.
    pub fn ack(server_id: &str) -> Self {
        Self::ack_with_prefix(&channel_prefix(), server_id)
    }

    /// Target channel shared by every process: `<prefix>:target:broadcast`.
    pub fn broadcast() -> Self {
        Self::of(BROADCAST_ID)
    }

    pub fn target_with_prefix(prefix: &str, server_id: &str) -> Self {
        Self {
            channel: format!("{}:target:{}", prefix, server_id.to_lowercase()),
        }
    }

    pub fn response_with_prefix(prefix: &str, server_id: &str) -> Self {
        Self {
            channel: format!("{}:response:{}", prefix, server_id.to_lowercase()),
        }
    }

    pub fn ack_with_prefix(prefix: &str, server_id: &str) -> Self {
        Self {
            channel: format!("{}:ack:{}", prefix, server_id.to_lowercase()),
        }
    }

    pub fn broadcast_with_prefix(prefix: &str) -> Self {
        Self::target_with_prefix(prefix, BROADCAST_ID)
    }

    /// Wraps an already-resolved channel name, e.g. the response channel
    /// carried in an envelope's sender descriptor.
    pub(crate) fn from_channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    /// The transport channel name for this entity.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}
