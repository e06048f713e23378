//! Bridge configuration.
//!
//! All knobs have deployment-friendly defaults; the channel prefix and ack
//! timeout can additionally be overridden through the environment
//! (`REDISBRIDGE_CHANNEL_PREFIX`, `REDISBRIDGE_ACK_TIMEOUT_SECONDS`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::entity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Prefix shared by every channel name this bridge uses.
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,

    /// Whether the queued batch publisher runs. When disabled,
    /// `publish_queued` fails instead of accumulating forever.
    #[serde(default = "default_true")]
    pub queue_enabled: bool,

    /// Interval between batch publisher ticks.
    #[serde(default = "default_queue_interval", with = "duration_ms")]
    pub queue_interval: Duration,

    /// How long a published message waits for its ack before failing.
    #[serde(default = "default_ack_timeout", with = "duration_secs")]
    pub ack_timeout: Duration,

    /// How long a waited-for response may take before failing.
    #[serde(default = "default_response_timeout", with = "duration_secs")]
    pub response_timeout: Duration,

    /// Grace period for the forced final queue drain during unload.
    #[serde(default = "default_shutdown_grace", with = "duration_ms")]
    pub shutdown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_prefix: default_channel_prefix(),
            queue_enabled: default_true(),
            queue_interval: default_queue_interval(),
            ack_timeout: default_ack_timeout(),
            response_timeout: default_response_timeout(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

fn default_channel_prefix() -> String {
    entity::channel_prefix()
}

fn default_true() -> bool {
    true
}

fn default_queue_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_ack_timeout() -> Duration {
    let seconds = std::env::var("REDISBRIDGE_ACK_TIMEOUT_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);
    Duration::from_secs(seconds)
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
