//! Managed WebSocket Connection
//!
//! | Module      | Responsibility                                        |
//! |-------------|-------------------------------------------------------|
//! | `transport` | WebSocket dial, frame read/write, close frame         |
//! | `listener`  | Read loop, per-frame dispatch onto tasks              |
//! | `manager`   | Connection lifecycle, write serialization, teardown   |
//!
//! # Usage
//!
//! ```ignore
//! use nym_socket::{FrameSender, ManagerConfig, SocketManager};
//!
//! let manager = SocketManager::new(
//!     ManagerConfig::new("ws://127.0.0.1:1977"),
//!     |frame: Vec<u8>, sender: FrameSender| async move {
//!         let _ = sender.send(frame).await;
//!     },
//!     &tracing::Span::current(),
//! )?;
//!
//! if let Some(mut stopped) = manager.start().await? {
//!     stopped.stopped().await;
//! }
//! ```

mod transport;

pub mod listener;
pub mod manager;

pub use listener::{Dispatch, DispatchMode, Listener, ListenerBuilder, OnClose};
pub use manager::{FrameHandler, FrameSender, SocketManager, StopSignal};
pub use transport::{WsSink, WsStream};
