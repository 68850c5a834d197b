//! Nym Client Wire Protocol
//!
//! Single responsibility: Encode and decode the JSON envelopes spoken by the
//! Nym client's WebSocket interface.
//!
//! Decoding reads the `type` field first, looks up its decoder in a `Registry`
//! and only then parses the full payload. Encoding always writes the `type`
//! field that matches the variant.

pub mod envelope;
pub mod registry;

pub use envelope::{
    read_tag, Envelope, ErrorMessage, Received, Reply, SelfAddressReply, SelfAddressRequest,
    SendAnonymous, SendRequest,
};
pub use registry::{Decoder, Registry, RegistryBuilder};
