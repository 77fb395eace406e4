//! Wire format encoding and decoding.
//!
//! Every envelope is sent as one frame with a 5-byte header:
//! ```text
//! ┌───────┬──────────┬─────────────────────┐
//! │ Kind  │ Length   │ Payload (UTF-8 JSON)│
//! │ 1 byte│ 4 bytes  │ Length bytes        │
//! │       │ uint32 BE│                     │
//! └───────┴──────────┴─────────────────────┘
//! ```
//!
//! The length prefix means a document never depends on how the transport
//! splits reads, so Unix domain sockets and named pipes behave the same.

use crate::error::{PipeRpcError, Result};

/// Header size in bytes (fixed, exactly 5).
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Frame kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client to server.
    Request = 0x01,
    /// Server to client.
    Response = 0x02,
}

impl FrameKind {
    /// Parse a kind byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Request),
            0x02 => Some(Self::Response),
            _ => None,
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Request or response.
    pub kind: FrameKind,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(kind: FrameKind, payload_length: u32) -> Self {
        Self {
            kind,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use pipe_rpc::protocol::{FrameKind, Header};
    ///
    /// let bytes = Header::new(FrameKind::Response, 100).encode();
    /// assert_eq!(bytes, [0x02, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.kind as u8;
        buf[1..5].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `Ok(None)` if the buffer is too short and a protocol error if
    /// the kind byte is unknown.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        let kind = FrameKind::from_byte(buf[0]).ok_or_else(|| {
            PipeRpcError::Protocol(format!("Unknown frame kind 0x{:02x}", buf[0]))
        })?;
        Ok(Some(Self {
            kind,
            payload_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        }))
    }

    /// Check the payload length against a limit.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(PipeRpcError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode() {
        let header = Header::new(FrameKind::Request, 0xDEAD_BEEF);
        let bytes = header.encode();
        assert_eq!(bytes, [0x01, 0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(Header::decode(&bytes).unwrap(), Some(header));
    }

    #[test]
    fn test_decode_short_buffer() {
        assert_eq!(Header::decode(&[0x01, 0, 0]).unwrap(), None);
    }

    #[test]
    fn test_decode_unknown_kind() {
        let err = Header::decode(&[0x7F, 0, 0, 0, 1]).unwrap_err();
        assert!(err.to_string().contains("0x7f"));
    }

    #[test]
    fn test_validate_max_payload() {
        let header = Header::new(FrameKind::Response, 1000);
        assert!(header.validate(1000).is_ok());
        let err = header.validate(999).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }
}
