//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use ax_protocol::TerminalSize;

use crate::error::SessionError;

/// Shortest allocation prefix the resolver accepts
pub const MIN_PREFIX_LEN: usize = 2;

/// Exit code reported for every client-side or transport failure
pub const SENTINEL_EXIT_CODE: i32 = 1;

/// Number of characters shown for abbreviated ids
pub const SHORT_ID_LEN: usize = 8;

/// Client-reported status of an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Lost,
}

impl ClientStatus {
    /// Whether the allocation can never run again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClientStatus::Complete | ClientStatus::Failed | ClientStatus::Lost
        )
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientStatus::Pending => "pending",
            ClientStatus::Running => "running",
            ClientStatus::Complete => "complete",
            ClientStatus::Failed => "failed",
            ClientStatus::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// One row of the allocation listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationStub {
    /// Full allocation id (UUID)
    pub id: String,
    /// Allocation name, e.g. `web.frontend[0]`
    pub name: String,
    /// Node the allocation is placed on
    pub node_id: String,
    /// Task group name
    pub task_group: String,
    /// Names of the tasks running in the allocation
    pub tasks: Vec<String>,
    /// Current client status
    pub client_status: ClientStatus,
}

impl AllocationStub {
    /// Create a pending allocation with a freshly generated id
    pub fn new(
        name: impl Into<String>,
        node_id: impl Into<String>,
        task_group: impl Into<String>,
        tasks: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            node_id: node_id.into(),
            task_group: task_group.into(),
            tasks,
            client_status: ClientStatus::Pending,
        }
    }

    /// Abbreviated id for display
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// Whether `prefix` selects this allocation (case-insensitive)
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.id.len() >= prefix.len()
            && self.id[..prefix.len()].eq_ignore_ascii_case(prefix)
    }
}

/// Truncate an id for display
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Node status as reported by the listing endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Initializing,
    Ready,
    Down,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Initializing => write!(f, "initializing"),
            NodeStatus::Ready => write!(f, "ready"),
            NodeStatus::Down => write!(f, "down"),
        }
    }
}

/// One row of the node listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStub {
    pub id: String,
    pub name: String,
    pub status: NodeStatus,
    /// Task drivers the node can run
    pub drivers: Vec<String>,
}

/// Everything needed to open an exec session
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    /// Full allocation id (already resolved)
    pub alloc_id: String,
    /// Task to exec into; `None` selects the allocation's sole task
    pub task: Option<String>,
    /// Command line, never empty once validated
    pub command: Vec<String>,
    /// Allocate a pseudo-terminal on the remote side
    pub tty: bool,
    /// Terminal size at session start
    pub size: TerminalSize,
}

impl ExecRequest {
    pub fn new(alloc_id: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            alloc_id: alloc_id.into(),
            task: None,
            command,
            tty: false,
            size: TerminalSize::default(),
        }
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_tty(mut self, tty: bool, size: TerminalSize) -> Self {
        self.tty = tty;
        self.size = size;
        self
    }

    /// Reject requests that can never succeed, before touching the network
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(SessionError::MissingCommand);
        }
        Ok(())
    }
}

/// Why an exec session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The remote process exited on its own
    Normal,
    /// The transport died or went silent
    TransportClosed,
    /// The remote could not start the requested executable
    CommandNotFound,
    /// Any other remote-reported failure
    RemoteError,
    /// The local user detached or interrupted the client
    UserCancelled,
    /// Remote output could not be written to a local sink
    LocalOutputFailed,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::Normal => "normal",
            ExitReason::TransportClosed => "transport closed",
            ExitReason::CommandNotFound => "command not found",
            ExitReason::RemoteError => "remote error",
            ExitReason::UserCancelled => "cancelled",
            ExitReason::LocalOutputFailed => "local output failed",
        };
        f.write_str(s)
    }
}

/// Final outcome of an exec session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitResult {
    /// Exit code the client process should return
    pub code: i32,
    pub reason: ExitReason,
    /// Message for the user when the session did not end normally
    pub message: Option<String>,
}

impl ExitResult {
    /// The remote process exited with `code`
    pub fn normal(code: i32) -> Self {
        Self {
            code,
            reason: ExitReason::Normal,
            message: None,
        }
    }

    /// A non-normal ending; always carries [`SENTINEL_EXIT_CODE`]
    pub fn failure(reason: ExitReason, message: impl Into<String>) -> Self {
        debug_assert_ne!(reason, ExitReason::Normal);
        Self {
            code: SENTINEL_EXIT_CODE,
            reason,
            message: Some(message.into()),
        }
    }

    pub fn is_normal(&self) -> bool {
        self.reason == ExitReason::Normal
    }
}
