//! Wire envelope codec.
//!
//! The codec owns no state of its own: it is constructed over the registry so
//! decode can resolve a namespace tag to a concrete payload type. Wire field
//! names are fixed for interoperability:
//!
//! ```text
//! { "uniqueId": "<uuid>",
//!   "sender": { "id": "<string>", "channel": "<string>" },
//!   "message": { "namespace": "<string>", ...payload fields... } }
//! ```
//!
//! A response wraps the full original envelope:
//!
//! ```text
//! { "originalMessage": <envelope>, "response": { ...payload fields... } }
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{BridgeError, BridgeResult};
use crate::message::{BridgeMessage, BridgeResponse, Envelope, MessageResponse, Sender};
use crate::registry::MessageRegistry;

/// An envelope as it appears on the wire, payload still undecoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "uniqueId")]
    pub unique_id: Uuid,
    pub sender: Sender,
    pub message: Value,
}

impl RawEnvelope {
    /// The namespace tag carried inside the message body, if present.
    pub fn namespace(&self) -> Option<&str> {
        self.message.get("namespace")?.as_str()
    }
}

/// A response envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    #[serde(rename = "originalMessage")]
    pub original_message: RawEnvelope,
    pub response: Value,
}

/// The minimal ack notification published on the sender's ack channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    #[serde(rename = "uniqueId")]
    pub unique_id: Uuid,
}

/// Serializes and deserializes wire envelopes, resolving payload types
/// through the registry.
#[derive(Clone)]
pub struct EnvelopeCodec {
    registry: Arc<MessageRegistry>,
}

impl EnvelopeCodec {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self { registry }
    }

    pub fn encode_envelope<M: BridgeMessage>(&self, envelope: &Envelope<M>) -> BridgeResult<String> {
        let raw = RawEnvelope {
            unique_id: envelope.unique_id(),
            sender: envelope.sender().clone(),
            message: tagged_payload(envelope.message())?,
        };
        Ok(serde_json::to_string(&raw)?)
    }

    /// Decodes an inbound envelope far enough to route it: the payload stays
    /// raw, but the namespace must resolve to a live registration.
    pub fn decode_envelope(&self, payload: &str) -> BridgeResult<RawEnvelope> {
        let raw: RawEnvelope = serde_json::from_str(payload)?;
        let namespace = raw
            .namespace()
            .ok_or_else(|| BridgeError::MalformedEnvelope("missing namespace tag".to_string()))?;
        if !self.registry.is_registered(namespace) {
            return Err(BridgeError::UnregisteredNamespace(namespace.to_string()));
        }
        Ok(raw)
    }

    pub fn encode_response<M: BridgeMessage, R: BridgeResponse>(
        &self,
        response: &MessageResponse<M, R>,
    ) -> BridgeResult<String> {
        let original = response.original_message();
        let raw = RawResponse {
            original_message: RawEnvelope {
                unique_id: original.unique_id(),
                sender: original.sender().clone(),
                message: tagged_payload(original.message())?,
            },
            response: serde_json::to_value(response.response())?,
        };
        Ok(serde_json::to_string(&raw)?)
    }

    /// Decodes an inbound response envelope. Only namespaces registered with
    /// a response type may be decoded; anything else is a protocol violation
    /// surfaced to the caller.
    pub fn decode_response(&self, payload: &str) -> BridgeResult<RawResponse> {
        let raw: RawResponse = serde_json::from_str(payload)?;
        let namespace = raw
            .original_message
            .namespace()
            .ok_or_else(|| BridgeError::MalformedEnvelope("missing namespace tag".to_string()))?;
        match self.registry.get_registration(namespace) {
            None => Err(BridgeError::UnregisteredNamespace(namespace.to_string())),
            Some(registration) if !registration.expects_response() => {
                Err(BridgeError::UnexpectedResponse(namespace.to_string()))
            }
            Some(_) => Ok(raw),
        }
    }
}

/// Serializes a payload and stamps its namespace tag into the JSON object.
fn tagged_payload<M: BridgeMessage>(message: &M) -> BridgeResult<Value> {
    let namespace = message.namespace().to_string();
    let mut value = serde_json::to_value(message)?;
    match &mut value {
        Value::Object(map) => {
            map.insert("namespace".to_string(), Value::String(namespace));
            Ok(value)
        }
        _ => Err(BridgeError::MalformedEnvelope(
            "message payload must serialize to a JSON object".to_string(),
        )),
    }
}

/// Decodes a raw envelope into its registered payload type.
pub(crate) fn decode_typed_envelope<M: BridgeMessage>(raw: RawEnvelope) -> BridgeResult<Envelope<M>> {
    let message: M = serde_json::from_value(raw.message)?;
    Ok(Envelope::from_parts(raw.unique_id, raw.sender, message))
}

/// Decodes a raw response into its registered payload and response types.
pub(crate) fn decode_typed_response<M: BridgeMessage, R: BridgeResponse>(
    raw: RawResponse,
) -> BridgeResult<MessageResponse<M, R>> {
    let original = decode_typed_envelope(raw.original_message)?;
    let response: R = serde_json::from_value(raw.response)?;
    Ok(MessageResponse::new(original, response))
}
