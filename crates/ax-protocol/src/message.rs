//! Message types for the allocx exec protocol
//!
//! Once the control plane accepts an exec handshake the connection carries
//! nothing but frames holding these messages.
//!
//! # Message Flow
//!
//! 1. Client streams `Stdin` chunks and finishes input with one `StdinClose`
//! 2. Remote streams `Stdout` / `Stderr` chunks as the process writes them
//! 3. `Resize` (client → remote) is applied to the pseudo-terminal out of band
//! 4. Both sides send `Heartbeat` periodically; silence means a dead transport
//! 5. `Signal` forwards a local interrupt, `Cancel` asks the remote to tear down
//! 6. The remote ends the session with exactly one `ExitStatus` or `Error`,
//!    and it is the last frame it sends

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Exec protocol version, sent in the negotiation handshake.
///
/// Format: "MAJOR.MINOR"; peers refuse a different MAJOR.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl TerminalSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

/// Message type tag carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Bytes for the remote process's stdin
    Stdin = 0x01,
    /// Local input reached end-of-file
    StdinClose = 0x02,
    /// Bytes the remote process wrote to stdout
    Stdout = 0x03,
    /// Bytes the remote process wrote to stderr
    Stderr = 0x04,
    /// Terminal resize event
    Resize = 0x05,
    /// Liveness ping
    Heartbeat = 0x06,
    /// Remote process exited
    ExitStatus = 0x07,
    /// Forwarded signal
    Signal = 0x08,
    /// Client is tearing the session down
    Cancel = 0x09,
    /// Remote-side failure
    Error = 0xFF,
}

impl MessageType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Stdin),
            0x02 => Some(Self::StdinClose),
            0x03 => Some(Self::Stdout),
            0x04 => Some(Self::Stderr),
            0x05 => Some(Self::Resize),
            0x06 => Some(Self::Heartbeat),
            0x07 => Some(Self::ExitStatus),
            0x08 => Some(Self::Signal),
            0x09 => Some(Self::Cancel),
            0xFF => Some(Self::Error),
            _ => None,
        }
    }
}

/// Reason codes carried by `Message::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    /// Unclassified failure
    Unknown = 0,
    /// Target allocation does not exist (any more)
    AllocationNotFound = 1,
    /// Target task does not exist in the allocation
    TaskNotFound = 2,
    /// The requested executable could not be resolved or started
    CommandNotFound = 3,
    /// Caller is not allowed to exec into the task
    Unauthorized = 4,
    /// Peer sent a frame that makes no sense in the current state
    InvalidMessage = 5,
    /// Control plane or driver failure
    Internal = 6,
}

/// Signals a client may forward to the remote process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Interrupt,
    Terminate,
    Quit,
}

impl SignalKind {
    /// Conventional POSIX signal number
    pub fn number(&self) -> i32 {
        match self {
            SignalKind::Interrupt => 2,
            SignalKind::Quit => 3,
            SignalKind::Terminate => 15,
        }
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Stdin bytes, in the order the client read them
    Stdin(Bytes),

    /// Local input is exhausted; the remote decides whether to close stdin
    StdinClose,

    /// Stdout bytes
    Stdout(Bytes),

    /// Stderr bytes
    Stderr(Bytes),

    /// New terminal dimensions
    Resize(TerminalSize),

    /// Liveness ping
    Heartbeat {
        /// Sender clock in milliseconds, for latency logging
        timestamp: u64,
    },

    /// Remote process exited with `code`
    ExitStatus { code: i32 },

    /// Deliver a signal to the remote process
    Signal(SignalKind),

    /// Client is going away; the remote should stop the process
    Cancel,

    /// Remote-side failure; terminates the session like `ExitStatus`
    Error {
        code: ErrorCode,
        /// Human-readable message shown to the user
        message: String,
    },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Stdin(_) => MessageType::Stdin,
            Message::StdinClose => MessageType::StdinClose,
            Message::Stdout(_) => MessageType::Stdout,
            Message::Stderr(_) => MessageType::Stderr,
            Message::Resize(_) => MessageType::Resize,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::ExitStatus { .. } => MessageType::ExitStatus,
            Message::Signal(_) => MessageType::Signal,
            Message::Cancel => MessageType::Cancel,
            Message::Error { .. } => MessageType::Error,
        }
    }

    /// Whether this message ends the session when received from the remote
    pub fn is_terminal(&self) -> bool {
        matches!(self, Message::ExitStatus { .. } | Message::Error { .. })
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Message::Error {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_tags_are_stable() {
        for msg_type in [
            MessageType::Stdin,
            MessageType::StdinClose,
            MessageType::Stdout,
            MessageType::Stderr,
            MessageType::Resize,
            MessageType::Heartbeat,
            MessageType::ExitStatus,
            MessageType::Signal,
            MessageType::Cancel,
            MessageType::Error,
        ] {
            assert_eq!(MessageType::from_u8(msg_type.as_u8()), Some(msg_type));
        }
        assert_eq!(MessageType::from_u8(0x42), None);
    }

    #[test]
    fn test_terminal_messages() {
        assert!(Message::ExitStatus { code: 0 }.is_terminal());
        assert!(Message::error(ErrorCode::CommandNotFound, "nope").is_terminal());
        assert!(!Message::Stdout(Bytes::from_static(b"x")).is_terminal());
        assert!(!Message::Heartbeat { timestamp: 1 }.is_terminal());
    }

    #[test]
    fn test_signal_numbers() {
        assert_eq!(SignalKind::Interrupt.number(), 2);
        assert_eq!(SignalKind::Terminate.number(), 15);
    }
}
