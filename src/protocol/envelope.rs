//! Envelope variants exchanged with the Nym client.
//!
//! Every frame is a JSON object whose `type` field names the variant; the other
//! fields are the variant's payload, flattened next to it:
//!
//! ```text
//! { "type": "send", "message": "hi", "recipient": "<nym address>" }
//! { "type": "received", "message": "hi", "senderTag": "<tag>" }
//! { "type": "reply", "message": "hi", "senderTag": "<tag>" }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use super::registry::Registry;
use crate::error::{Result, SocketError};

pub const ERROR_TYPE: &str = "error";
/// Shared by `SelfAddressRequest` and `SelfAddressReply`.
pub const SELF_ADDRESS_TYPE: &str = "selfAddress";
pub const SEND_TYPE: &str = "send";
pub const SEND_ANONYMOUS_TYPE: &str = "sendAnonymous";
pub const RECEIVED_TYPE: &str = "received";
pub const REPLY_TYPE: &str = "reply";

/// Error reported by the Nym client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}

/// Ask the Nym client for its own address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfAddressRequest {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfAddressReply {
    pub address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub message: String,
    pub recipient: String,
}

/// Send that hides the sender, attaching `reply_surbs` single-use reply blocks
/// so the recipient can answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAnonymous {
    pub message: String,
    pub recipient: String,
    #[serde(rename = "replySurbs")]
    pub reply_surbs: u32,
}

/// Message delivered to us through the mixnet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Received {
    pub message: String,
    /// Empty when the sender did not attach reply blocks.
    #[serde(default)]
    pub sender_tag: String,
}

impl Received {
    /// Answer this message. The reply carries our sender tag so the Nym client
    /// can route it back; nothing else is correlated here.
    pub fn reply(&self, message: impl Into<String>) -> Reply {
        Reply::new(self.sender_tag.clone(), message)
    }

    /// Whether the sender can be replied to.
    pub fn has_sender_tag(&self) -> bool {
        !self.sender_tag.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reply {
    pub message: String,
    pub sender_tag: String,
}

impl Reply {
    pub fn new(sender_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sender_tag: sender_tag.into(),
        }
    }
}

/// A message exchanged with the Nym client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Error(ErrorMessage),
    SelfAddressRequest(SelfAddressRequest),
    SelfAddressReply(SelfAddressReply),
    Send(SendRequest),
    SendAnonymous(SendAnonymous),
    Received(Received),
    Reply(Reply),
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct Discriminant {
    #[serde(rename = "type")]
    kind: String,
}

impl Envelope {
    pub fn send(message: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self::Send(SendRequest {
            message: message.into(),
            recipient: recipient.into(),
        })
    }

    pub fn send_anonymous(
        message: impl Into<String>,
        recipient: impl Into<String>,
        reply_surbs: u32,
    ) -> Self {
        Self::SendAnonymous(SendAnonymous {
            message: message.into(),
            recipient: recipient.into(),
            reply_surbs,
        })
    }

    pub fn reply(sender_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reply(Reply::new(sender_tag, message))
    }

    pub fn self_address_request() -> Self {
        Self::SelfAddressRequest(SelfAddressRequest {})
    }

    /// Wire tag emitted in the `type` field.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Error(_) => ERROR_TYPE,
            Self::SelfAddressRequest(_) | Self::SelfAddressReply(_) => SELF_ADDRESS_TYPE,
            Self::Send(_) => SEND_TYPE,
            Self::SendAnonymous(_) => SEND_ANONYMOUS_TYPE,
            Self::Received(_) => RECEIVED_TYPE,
            Self::Reply(_) => REPLY_TYPE,
        }
    }

    /// Variant name, which unlike the tag is unique.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Error(_) => "NymError",
            Self::SelfAddressRequest(_) => "NymSelfAddressRequest",
            Self::SelfAddressReply(_) => "NymSelfAddressReply",
            Self::Send(_) => "NymSend",
            Self::SendAnonymous(_) => "NymSendAnonymous",
            Self::Received(_) => "NymReceived",
            Self::Reply(_) => "NymReply",
        }
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let kind = self.tag();
        let encoded = match self {
            Self::Error(body) => serde_json::to_vec(&Tagged { kind, body }),
            Self::SelfAddressRequest(body) => serde_json::to_vec(&Tagged { kind, body }),
            Self::SelfAddressReply(body) => serde_json::to_vec(&Tagged { kind, body }),
            Self::Send(body) => serde_json::to_vec(&Tagged { kind, body }),
            Self::SendAnonymous(body) => serde_json::to_vec(&Tagged { kind, body }),
            Self::Received(body) => serde_json::to_vec(&Tagged { kind, body }),
            Self::Reply(body) => serde_json::to_vec(&Tagged { kind, body }),
        };
        encoded.map_err(|e| SocketError::MalformedPayload(e.to_string()))
    }

    /// Decode a frame using `registry` to pick the variant from its `type` field.
    pub fn decode_with(registry: &Registry, frame: &[u8]) -> Result<Self> {
        let tag = read_tag(frame)?;
        let decoder = registry
            .get(&tag)
            .ok_or(SocketError::UnknownMessageType(tag))?;
        decoder(frame)
    }

    /// Decode a frame received from the Nym client.
    pub fn decode_inbound(frame: &[u8]) -> Result<Self> {
        Self::decode_with(Registry::inbound(), frame)
    }

    /// Decode a frame headed to the Nym client.
    pub fn decode_outbound(frame: &[u8]) -> Result<Self> {
        Self::decode_with(Registry::outbound(), frame)
    }
}

/// Read only the `type` field of a frame.
pub fn read_tag(frame: &[u8]) -> Result<String> {
    serde_json::from_slice::<Discriminant>(frame)
        .map(|d| d.kind)
        .map_err(|e| SocketError::MalformedPayload(format!("missing or invalid type: {}", e)))
}

/// Decode `frame` as a `T` payload. Used as the registry's decoder bodies.
pub(crate) fn decode_payload<T>(frame: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_slice(frame).map_err(|e| SocketError::MalformedPayload(e.to_string()))
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => write!(f, "NymError: {}", e.message),
            Self::SelfAddressRequest(_) => write!(f, "NymSelfAddressRequest"),
            Self::SelfAddressReply(r) => write!(f, "NymSelfAddressReply: {}", r.address),
            Self::Send(s) => write!(f, "NymSend to {}: {}", s.recipient, s.message),
            Self::SendAnonymous(s) => write!(
                f,
                "NymSendAnonymous to {}: {} with {} replySurbs",
                s.recipient, s.message, s.reply_surbs
            ),
            Self::Received(r) => {
                write!(f, "NymReceivedMessage from {}: \"{}\"", r.sender_tag, r.message)
            }
            Self::Reply(r) => write!(f, "NymReply for {}: \"{}\"", r.sender_tag, r.message),
        }
    }
}

impl From<Reply> for Envelope {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

impl From<SendRequest> for Envelope {
    fn from(send: SendRequest) -> Self {
        Self::Send(send)
    }
}

impl From<SendAnonymous> for Envelope {
    fn from(send: SendAnonymous) -> Self {
        Self::SendAnonymous(send)
    }
}
