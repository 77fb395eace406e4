//! Frame struct.
//!
//! A complete header + payload pair. Uses `bytes::Bytes` so the payload can
//! be handed to the decoder without another copy.

use bytes::Bytes;

use super::wire_format::{FrameKind, Header, HEADER_SIZE};
use crate::error::{PipeRpcError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Frame kind.
    #[inline]
    pub fn kind(&self) -> FrameKind {
        self.header.kind
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Build a complete frame as a single byte vector.
///
/// # Example
///
/// ```
/// use pipe_rpc::protocol::{build_frame, FrameKind};
///
/// let bytes = build_frame(FrameKind::Request, b"{}").unwrap();
/// assert_eq!(bytes, [0x01, 0, 0, 0, 2, b'{', b'}']);
/// ```
pub fn build_frame(kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        PipeRpcError::Protocol(format!("Payload size {} does not fit a frame", payload.len()))
    })?;
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&Header::new(kind, length).encode());
    buf.extend_from_slice(payload);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_frame_layout() {
        let bytes = build_frame(FrameKind::Response, b"hello").unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        assert_eq!(bytes[0], FrameKind::Response as u8);
        assert_eq!(&bytes[1..5], &5u32.to_be_bytes());
        assert_eq!(&bytes[5..], b"hello");
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::new(
            Header::new(FrameKind::Request, 2),
            Bytes::from_static(b"{}"),
        );
        assert_eq!(frame.kind(), FrameKind::Request);
        assert_eq!(frame.payload(), b"{}");
    }
}
