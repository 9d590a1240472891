//! ax-protocol: Wire protocol for allocx exec sessions
//!
//! This crate defines the binary framing used once an exec session has
//! been negotiated with the control plane. Every frame carries a session
//! id, a message type tag and a bincode-encoded payload.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod session;

pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{ErrorCode, Message, MessageType, SignalKind, TerminalSize, PROTOCOL_VERSION};
pub use session::SessionId;
