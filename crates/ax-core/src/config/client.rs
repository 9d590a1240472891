//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::api::DEFAULT_ADDRESS;

/// Settings for the exec client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Control-plane address (`host:port`)
    pub address: String,

    /// How long to wait for the TCP connect
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How often the client sends heartbeats on an exec session
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Silence on the session longer than this means the transport is dead
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// How long cancellation waits for the remote before tearing down locally
    #[serde(with = "duration_secs")]
    pub cancel_grace: Duration,

    /// Escape character for detaching TTY sessions; `None` disables it
    pub escape_char: Option<char>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            cancel_grace: Duration::from_secs(2),
            escape_char: Some('~'),
        }
    }
}

impl ClientConfig {
    /// Apply address overrides: explicit flag first, then the environment
    pub fn with_address_override(mut self, flag: Option<&str>) -> Self {
        if let Some(addr) = flag {
            self.address = addr.to_string();
        } else if let Ok(addr) = std::env::var(crate::api::ADDRESS_ENV) {
            if !addr.is_empty() {
                self.address = addr;
            }
        }
        self.address = normalize_address(&self.address);
        self
    }
}

/// Strip a URL scheme and trailing slash so `http://host:4646/` dials `host:4646`
pub fn normalize_address(address: &str) -> String {
    let trimmed = address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("https://"))
        .or_else(|| address.strip_prefix("tcp://"))
        .unwrap_or(address);
    trimmed.trim_end_matches('/').to_string()
}
