//! Error types for nym-socket

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocketError {
    /// A required constructor argument is missing or invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Dialing the WebSocket endpoint failed.
    #[error("Failed to open connection to \"{uri}\": {reason}")]
    Connection { uri: String, reason: String },

    #[error("Connection is closed, cannot send to {0}")]
    NotConnected(String),

    #[error("Failed to send message: {0}")]
    Send(String),

    /// The frame's `type` field is not present in the registry used to decode it.
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SocketError>;
