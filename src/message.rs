//! Message model: payload traits, the wire envelope, and typed responses.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A payload that can travel through the bridge.
///
/// The namespace string keys the type at registration and decode time; a
/// payload that opts into acknowledgement makes every publish of it await the
/// receiver's ack notification.
pub trait BridgeMessage:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Namespace tag used for registration and decode-time type resolution.
    fn namespace(&self) -> &str;

    /// Whether the receiver must acknowledge delivery of this payload.
    fn ack_enabled(&self) -> bool {
        false
    }
}

/// Marker for payloads that may be sent back as a typed response.
pub trait BridgeResponse:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
}

/// Identifies the process a message originated from and where replies to it
/// should be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Server id of the originating process.
    pub id: String,
    /// The originating process's response channel.
    pub channel: String,
}

/// The wire unit of a message send: a payload wrapped with its unique id and
/// sender descriptor.
///
/// The unique id is assigned exactly once at construction; an envelope is
/// immutable once built.
#[derive(Debug, Clone)]
pub struct Envelope<M> {
    unique_id: Uuid,
    sender: Sender,
    message: M,
}

impl<M: BridgeMessage> Envelope<M> {
    pub(crate) fn new(sender: Sender, message: M) -> Self {
        Self {
            unique_id: Uuid::new_v4(),
            sender,
            message,
        }
    }

    pub(crate) fn from_parts(unique_id: Uuid, sender: Sender, message: M) -> Self {
        Self {
            unique_id,
            sender,
            message,
        }
    }

    pub fn unique_id(&self) -> Uuid {
        self.unique_id
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    /// True iff the payload type declares it needs acknowledgement.
    pub fn ack_requested(&self) -> bool {
        self.message.ack_enabled()
    }
}

/// A typed reply paired with the full original envelope it answers.
#[derive(Debug, Clone)]
pub struct MessageResponse<M, R> {
    original_message: Envelope<M>,
    response: R,
}

impl<M: BridgeMessage, R: BridgeResponse> MessageResponse<M, R> {
    pub fn new(original_message: Envelope<M>, response: R) -> Self {
        Self {
            original_message,
            response,
        }
    }

    pub fn original_message(&self) -> &Envelope<M> {
        &self.original_message
    }

    pub fn response(&self) -> &R {
        &self.response
    }
}
