//! Configuration for nym-socket

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SocketError};

/// Configuration shared by `SocketManager` and `NymClient`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// WebSocket URI of the local Nym client (e.g. `ws://127.0.0.1:1977`)
    pub connection_uri: String,

    /// How long `stop()` waits for the listener to acknowledge the close frame
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Maximum number of inbound frames handled concurrently.
    /// `None` spawns one task per frame with no limit.
    #[serde(default)]
    pub max_in_flight_handlers: Option<usize>,

    /// How long `NymClient::start()` waits for the self address reply
    #[serde(default = "default_self_address_timeout_ms")]
    pub self_address_timeout_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

fn default_self_address_timeout_ms() -> u64 {
    5000
}

impl ManagerConfig {
    /// Config for `uri` with every other field at its default.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            connection_uri: uri.into(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            max_in_flight_handlers: None,
            self_address_timeout_ms: default_self_address_timeout_ms(),
        }
    }

    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse config from a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SocketError::InvalidConfiguration(e.to_string()))
    }

    /// Reject values the manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.connection_uri.trim().is_empty() {
            return Err(SocketError::InvalidConfiguration(
                "connection URI cannot be empty".into(),
            ));
        }
        if self.max_in_flight_handlers == Some(0) {
            return Err(SocketError::InvalidConfiguration(
                "max_in_flight_handlers must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn self_address_timeout(&self) -> Duration {
        Duration::from_millis(self.self_address_timeout_ms)
    }
}
