//! nym-socket - Managed WebSocket connection to a local Nym client
//!
//! The Nym client exposes a WebSocket on localhost (`ws://127.0.0.1:1977` by
//! default) that speaks JSON envelopes. This crate keeps that connection:
//!
//! - `socket` dials it, reads frames on a background task, dispatches each one
//!   to a handler task and serializes writes. `stop()` performs a bounded close
//!   handshake, and a peer-side close tears the manager down through the same path.
//! - `protocol` defines the envelope variants and their tag-dispatched codec.
//! - `client` glues the two together: the application receives decoded
//!   `Received` messages and sends envelopes back.
//!
//! ## Layers
//!
//! ```text
//!   application handler (Received, EnvelopeSender)
//!                │
//!            NymClient ── protocol (Envelope, Registry)
//!                │
//!          SocketManager ── Listener ── transport (tokio-tungstenite)
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod socket;

// Re-exports
pub use client::{EnvelopeSender, MessageHandler, NymClient};
pub use config::ManagerConfig;
pub use error::{Result, SocketError};
pub use protocol::{Envelope, Received, Registry, Reply};
pub use socket::{DispatchMode, FrameHandler, FrameSender, SocketManager, StopSignal};
