//! Frame codec for the intercom TCP protocol
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | type   | flags  | length (u16 LE) | payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! `length` counts payload bytes only. Reading whole frames off a socket is
//! the connection's job; this module only converts between bytes and values.

use crate::error::{IntercomError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed frame header
pub const HEADER_SIZE: usize = 4;

/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Flags byte value; no flags are defined yet
pub const FLAG_NONE: u8 = 0x00;

/// Protocol message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Opaque audio payload
    Audio,
    /// Begin streaming
    Start,
    /// End streaming
    Stop,
    /// Liveness probe
    Ping,
    /// Liveness reply
    Pong,
    /// Device error, optional 1-byte code payload
    Error,
    /// Type byte this implementation does not know about
    Unknown(u8),
}

impl MessageType {
    /// Wire representation of this type
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::Audio => 0x00,
            MessageType::Start => 0x01,
            MessageType::Stop => 0x02,
            MessageType::Ping => 0x03,
            MessageType::Pong => 0x04,
            MessageType::Error => 0x05,
            MessageType::Unknown(code) => code,
        }
    }
}

impl From<u8> for MessageType {
    fn from(code: u8) -> Self {
        match code {
            0x00 => MessageType::Audio,
            0x01 => MessageType::Start,
            0x02 => MessageType::Stop,
            0x03 => MessageType::Ping,
            0x04 => MessageType::Pong,
            0x05 => MessageType::Error,
            other => MessageType::Unknown(other),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(msg_type: MessageType) -> Self {
        msg_type.as_u8()
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: MessageType,
    pub flags: u8,
    pub length: u16,
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame with no flags set
    pub fn new(msg_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            flags: FLAG_NONE,
            payload: payload.into(),
        }
    }

    /// Create a frame with an empty payload
    pub fn control(msg_type: MessageType) -> Self {
        Self::new(msg_type, Bytes::new())
    }

    /// Set the flags byte
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Payload length as carried in the header
    pub fn length(&self) -> usize {
        self.payload.len()
    }

    /// Serialize header and payload
    pub fn encode(&self) -> Result<Bytes> {
        encode(self.msg_type, self.flags, &self.payload)
    }
}

/// Serialize a frame into its wire representation
pub fn encode(msg_type: MessageType, flags: u8, payload: &[u8]) -> Result<Bytes> {
    let length = u16::try_from(payload.len())
        .map_err(|_| IntercomError::PayloadTooLarge { size: payload.len() })?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(msg_type.as_u8());
    buf.put_u8(flags);
    buf.put_u16_le(length);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode the fixed 4-byte header
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> FrameHeader {
    FrameHeader {
        msg_type: MessageType::from(header[0]),
        flags: header[1],
        length: u16::from_le_bytes([header[2], header[3]]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(encoded: &[u8]) -> (FrameHeader, &[u8]) {
        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&encoded[..HEADER_SIZE]);
        (decode_header(&header), &encoded[HEADER_SIZE..])
    }

    #[test]
    fn start_frame_is_header_only() {
        let encoded = encode(MessageType::Start, FLAG_NONE, &[]).unwrap();
        assert_eq!(&encoded[..], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn length_is_little_endian() {
        let payload = vec![0xAB; 0x0102];
        let encoded = encode(MessageType::Audio, FLAG_NONE, &payload).unwrap();
        assert_eq!(&encoded[..HEADER_SIZE], &[0x00, 0x00, 0x02, 0x01]);
        assert_eq!(encoded.len(), HEADER_SIZE + payload.len());
    }

    #[test]
    fn frame_round_trip_preserves_fields() {
        let frame = Frame::new(MessageType::Error, vec![7u8]).with_flags(0x80);
        let encoded = frame.encode().unwrap();
        let (header, payload) = split(&encoded);

        assert_eq!(header.msg_type, MessageType::Error);
        assert_eq!(header.flags, 0x80);
        assert_eq!(header.length as usize, frame.length());
        assert_eq!(payload, &[7u8]);
    }

    #[test]
    fn maximum_payload_fits() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE];
        let encoded = encode(MessageType::Audio, FLAG_NONE, &payload).unwrap();
        let (header, body) = split(&encoded);
        assert_eq!(header.length, u16::MAX);
        assert_eq!(body.len(), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        match encode(MessageType::Audio, FLAG_NONE, &payload) {
            Err(IntercomError::PayloadTooLarge { size }) => assert_eq!(size, 65536),
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn unknown_types_survive_decoding() {
        let header = decode_header(&[0x7F, 0x00, 0x03, 0x00]);
        assert_eq!(header.msg_type, MessageType::Unknown(0x7F));
        assert_eq!(header.length, 3);
        assert_eq!(u8::from(header.msg_type), 0x7F);
    }

    #[test]
    fn known_codes_map_both_ways() {
        for code in 0x00..=0x05u8 {
            let msg_type = MessageType::from(code);
            assert!(!matches!(msg_type, MessageType::Unknown(_)));
            assert_eq!(msg_type.as_u8(), code);
        }
    }
}
