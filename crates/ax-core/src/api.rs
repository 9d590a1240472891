//! Control-plane API messages
//!
//! Requests and responses are newline-delimited JSON over a TCP
//! connection. An `Exec` request that the control plane accepts is
//! answered with `ExecStarted`, after which the same connection carries
//! binary `ax_protocol` frames in both directions.

use serde::{Deserialize, Serialize};
use std::fmt;

use ax_protocol::{SessionId, TerminalSize};

use crate::types::{AllocationStub, NodeStub};

/// Default control-plane address
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:4646";

/// Environment variable that overrides the configured address
pub const ADDRESS_ENV: &str = "ALLOCX_ADDR";

/// Request from the client to the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiRequest {
    /// Liveness check
    Ping,

    /// List allocations, optionally filtered by id prefix
    ListAllocations { prefix: Option<String> },

    /// Fetch one allocation by full id
    GetAllocation { alloc_id: String },

    /// List client nodes
    ListNodes,

    /// Open an exec session; upgrades the connection on success
    Exec(ExecSpec),
}

/// Exec handshake parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecSpec {
    pub alloc_id: String,
    pub task: String,
    pub command: Vec<String>,
    pub tty: bool,
    pub size: TerminalSize,
    /// Frame protocol version the client speaks
    pub version: String,
}

/// Response from the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiResponse {
    Pong,

    Allocations { allocations: Vec<AllocationStub> },

    Allocation { allocation: AllocationStub },

    Nodes { nodes: Vec<NodeStub> },

    /// Exec accepted; binary frames follow on this connection
    ExecStarted { session_id: SessionId },

    Error(ApiError),
}

/// Structured error returned by the control plane
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl std::error::Error for ApiError {}

/// Error classes the exec and listing endpoints distinguish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    NotFound,
    Ambiguous,
    Unauthorized,
    InvalidRequest,
    Internal,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiErrorKind::NotFound => "not found",
            ApiErrorKind::Ambiguous => "ambiguous",
            ApiErrorKind::Unauthorized => "unauthorized",
            ApiErrorKind::InvalidRequest => "invalid request",
            ApiErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Serialize a message as one JSON line, newline included
pub fn to_line<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let json = serde_json::to_string(&ApiRequest::ListAllocations {
            prefix: Some("2647".into()),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"list_allocations","prefix":"2647"}"#);
    }

    #[test]
    fn test_exec_request_roundtrip() {
        let request = ApiRequest::Exec(ExecSpec {
            alloc_id: "26470238-5cf2-438f-8772-dc67cfb0705c".into(),
            task: "web".into(),
            command: vec!["/bin/sh".into(), "-c".into(), "echo hi".into()],
            tty: true,
            size: TerminalSize::new(40, 120),
            version: ax_protocol::PROTOCOL_VERSION.into(),
        });
        let line = to_line(&request).unwrap();
        assert!(line.ends_with('\n'));
        let parsed: ApiRequest = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn test_error_response_shape() {
        let response = ApiResponse::Error(ApiError::new(ApiErrorKind::NotFound, "unknown allocation"));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains(r#""kind":"not_found""#));
        assert_eq!(serde_json::from_str::<ApiResponse>(&json).unwrap(), response);
    }
}
