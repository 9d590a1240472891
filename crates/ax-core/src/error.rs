//! Core error types for allocx

use ax_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

use crate::api::ApiError;
use crate::types::AllocationStub;

/// Top-level error type for the allocx crates
#[derive(Error, Debug)]
pub enum AxError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Allocation did not start: {0}")]
    Poll(#[from] crate::poll::PollError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the control plane
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// TCP connect failed (DNS, refused, unreachable)
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect did not finish within the configured timeout
    #[error("Timed out connecting to {0}")]
    Timeout(String),

    /// The connection dropped while a request was in flight
    #[error("Connection lost: {0}")]
    Lost(String),

    /// The control plane answered with something we cannot use
    #[error("Invalid response from control plane: {0}")]
    InvalidResponse(String),

    /// The control plane answered with a structured error
    #[error("{0}")]
    Api(ApiError),
}

/// Failures resolving an allocation identifier
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Alloc ID must contain at least two characters (got \"{0}\")")]
    TooShort(String),

    #[error("Error querying allocation: {0}")]
    Query(#[source] ConnectionError),

    #[error("No allocation(s) with prefix or id \"{0}\" found")]
    NotFound(String),

    #[error("Prefix matched multiple allocations ({} candidates for \"{prefix}\")", .candidates.len())]
    Ambiguous {
        prefix: String,
        candidates: Vec<AllocationStub>,
    },
}

/// Failures establishing an exec session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A command is required")]
    MissingCommand,

    #[error("Please specify the task with --task; allocation {alloc_id} runs: {}", .tasks.join(", "))]
    TaskRequired { alloc_id: String, tasks: Vec<String> },

    #[error("Allocation {0} has no tasks")]
    NoTasks(String),

    #[error("Allocation \"{alloc_id}\" is not running (status: {status})")]
    AllocationNotRunning { alloc_id: String, status: String },

    #[error("Failed to open exec session: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Exec session rejected: {0}")]
    Rejected(ApiError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_messages() {
        assert!(ResolveError::NotFound("2647".into())
            .to_string()
            .contains("No allocation(s) with prefix or id"));
        assert!(ResolveError::TooShort("2".into())
            .to_string()
            .contains("Alloc ID must contain at least two characters"));
    }

    #[test]
    fn test_query_error_keeps_cause() {
        let err = ResolveError::Query(ConnectionError::Timeout("nope:4646".into()));
        let text = err.to_string();
        assert!(text.starts_with("Error querying allocation"));
        assert!(text.contains("nope:4646"));
    }

    #[test]
    fn test_task_required_lists_tasks() {
        let err = SessionError::TaskRequired {
            alloc_id: "abcd".into(),
            tasks: vec!["web".into(), "sidecar".into()],
        };
        assert!(err.to_string().contains("web, sidecar"));
    }
}
