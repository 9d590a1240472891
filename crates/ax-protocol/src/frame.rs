//! Frame header encoding/decoding
//!
//! Every exec frame starts with an 8-byte header:
//! - session_id: 4 bytes (u32, big-endian)
//! - message_type: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::MessageType;
use crate::session::SessionId;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Largest payload the 24-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Routing and length information preceding every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Exec session the frame belongs to
    pub session_id: SessionId,
    /// Kind of message carried in the payload
    pub message_type: MessageType,
    /// Payload length in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    pub fn new(session_id: SessionId, message_type: MessageType, payload_length: u32) -> Self {
        Self {
            session_id,
            message_type,
            payload_length,
        }
    }

    /// Total on-wire size of the frame this header describes
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_length as usize
    }

    /// Append the encoded header to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.session_id.as_u32());
        dst.put_u8(self.message_type.as_u8());
        dst.put_u8((self.payload_length >> 16) as u8);
        dst.put_u16(self.payload_length as u16);
    }

    /// Consume a header from the front of `src`
    ///
    /// Returns `Ok(None)` while fewer than [`HEADER_SIZE`] bytes are buffered.
    /// The type byte is validated before anything is consumed, so an unknown
    /// tag leaves the buffer untouched.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let tag = src[4];
        let message_type =
            MessageType::from_u8(tag).ok_or(ProtocolError::UnknownMessageType(tag))?;

        let session_id = SessionId::new(src.get_u32());
        src.advance(1);
        let high = src.get_u8() as u32;
        let low = src.get_u16() as u32;

        Ok(Some(Self {
            session_id,
            message_type,
            payload_length: (high << 16) | low,
        }))
    }
}
