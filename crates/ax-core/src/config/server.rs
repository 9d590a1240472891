//! Development control-plane configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Settings for `allocx serve`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the API listener binds to
    pub bind_address: String,

    /// Heartbeat period on exec sessions
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Inbound silence after which a client is treated as gone
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// Node name; defaults to the hostname
    pub node_name: Option<String>,

    /// Maximum concurrent exec sessions
    pub max_sessions: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: crate::api::DEFAULT_ADDRESS.to_string(),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(30),
            node_name: None,
            max_sessions: None,
        }
    }
}
