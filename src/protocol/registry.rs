//! Tag to decoder lookup used by `Envelope::decode_with`.
//!
//! The wire tag alone does not always identify a variant: `selfAddress` is both
//! the request we send and the reply the Nym client sends back. Which one a
//! frame holds depends on the direction it travels, so there is one registry
//! per direction and the caller picks the one matching its context.

use std::collections::HashMap;
use std::sync::OnceLock;

use super::envelope::{
    decode_payload, Envelope, ERROR_TYPE, RECEIVED_TYPE, REPLY_TYPE, SELF_ADDRESS_TYPE,
    SEND_ANONYMOUS_TYPE, SEND_TYPE,
};
use crate::error::Result;

/// Decodes a full frame whose tag is already known.
pub type Decoder = fn(&[u8]) -> Result<Envelope>;

/// Read-only map from wire tag to decoder.
#[derive(Clone, Default)]
pub struct Registry {
    decoders: HashMap<&'static str, Decoder>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

/// Builder for a custom `Registry`. Later registrations replace earlier ones.
#[derive(Default)]
pub struct RegistryBuilder {
    decoders: HashMap<&'static str, Decoder>,
}

impl RegistryBuilder {
    pub fn register(mut self, tag: &'static str, decoder: Decoder) -> Self {
        self.decoders.insert(tag, decoder);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            decoders: self.decoders,
        }
    }
}

fn decode_error(frame: &[u8]) -> Result<Envelope> {
    decode_payload(frame).map(Envelope::Error)
}

fn decode_self_address_request(frame: &[u8]) -> Result<Envelope> {
    decode_payload(frame).map(Envelope::SelfAddressRequest)
}

fn decode_self_address_reply(frame: &[u8]) -> Result<Envelope> {
    decode_payload(frame).map(Envelope::SelfAddressReply)
}

fn decode_send(frame: &[u8]) -> Result<Envelope> {
    decode_payload(frame).map(Envelope::Send)
}

fn decode_send_anonymous(frame: &[u8]) -> Result<Envelope> {
    decode_payload(frame).map(Envelope::SendAnonymous)
}

fn decode_received(frame: &[u8]) -> Result<Envelope> {
    decode_payload(frame).map(Envelope::Received)
}

fn decode_reply(frame: &[u8]) -> Result<Envelope> {
    decode_payload(frame).map(Envelope::Reply)
}

/// Tags whose meaning does not depend on direction.
fn common() -> RegistryBuilder {
    Registry::builder()
        .register(ERROR_TYPE, decode_error)
        .register(SEND_TYPE, decode_send)
        .register(SEND_ANONYMOUS_TYPE, decode_send_anonymous)
        .register(RECEIVED_TYPE, decode_received)
        .register(REPLY_TYPE, decode_reply)
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Frames coming from the Nym client: `selfAddress` is a reply.
    pub fn inbound() -> &'static Registry {
        static INBOUND: OnceLock<Registry> = OnceLock::new();
        INBOUND.get_or_init(|| {
            common()
                .register(SELF_ADDRESS_TYPE, decode_self_address_reply)
                .build()
        })
    }

    /// Frames going to the Nym client: `selfAddress` is a request.
    pub fn outbound() -> &'static Registry {
        static OUTBOUND: OnceLock<Registry> = OnceLock::new();
        OUTBOUND.get_or_init(|| {
            common()
                .register(SELF_ADDRESS_TYPE, decode_self_address_request)
                .build()
        })
    }

    pub fn get(&self, tag: &str) -> Option<Decoder> {
        self.decoders.get(tag).copied()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SocketError;

    #[test]
    fn test_builtin_registries_cover_every_tag() {
        for registry in [Registry::inbound(), Registry::outbound()] {
            let mut tags: Vec<_> = registry.tags().collect();
            tags.sort_unstable();
            assert_eq!(
                tags,
                vec!["error", "received", "reply", "selfAddress", "send", "sendAnonymous"]
            );
        }
    }

    #[test]
    fn test_self_address_depends_on_direction() {
        let frame = br#"{"type":"selfAddress","address":"abc.def@gw"}"#;

        let inbound = Envelope::decode_with(Registry::inbound(), frame).unwrap();
        assert!(matches!(inbound, Envelope::SelfAddressReply(ref r) if r.address == "abc.def@gw"));

        let outbound = Envelope::decode_with(Registry::outbound(), frame).unwrap();
        assert!(matches!(outbound, Envelope::SelfAddressRequest(_)));
    }

    #[test]
    fn test_custom_registry() {
        let registry = Registry::builder()
            .register(RECEIVED_TYPE, decode_received)
            .build();
        assert!(registry.contains("received"));
        assert!(!registry.contains("send"));

        let err = Envelope::decode_with(&registry, br#"{"type":"send","message":"a","recipient":"b"}"#)
            .unwrap_err();
        assert!(matches!(err, SocketError::UnknownMessageType(_)));
    }

    #[test]
    fn test_empty_registry_knows_nothing() {
        let err = Envelope::decode_with(&Registry::default(), br#"{"type":"error","message":"x"}"#)
            .unwrap_err();
        assert!(matches!(err, SocketError::UnknownMessageType(t) if t == "error"));
    }
}
