//! Async helpers that move exactly one frame across a stream.
//!
//! Each connection carries one request frame and one response frame, so the
//! helpers take the per-connection scratch buffer and frame buffer from the
//! caller instead of owning a read loop.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{build_frame, Frame, FrameBuffer, FrameKind};
use crate::error::{PipeRpcError, Result};

/// Scratch buffer size for a single read call.
pub const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Read one frame of the expected kind.
///
/// Returns `Ok(None)` if the peer closed the stream before sending a single
/// byte. A stream that closes mid-frame is `ConnectionClosed`.
pub async fn read_frame<R>(
    reader: &mut R,
    scratch: &mut [u8],
    frames: &mut FrameBuffer,
    expected: FrameKind,
) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let n = reader.read(scratch).await?;
        if n == 0 {
            if frames.has_partial_frame() {
                return Err(PipeRpcError::ConnectionClosed);
            }
            return Ok(None);
        }

        if let Some(frame) = frames.push(&scratch[..n])?.into_iter().next() {
            if frame.kind() != expected {
                return Err(PipeRpcError::Protocol(format!(
                    "Expected {:?} frame, got {:?}",
                    expected,
                    frame.kind()
                )));
            }
            return Ok(Some(frame));
        }
    }
}

/// Write one frame and flush it.
///
/// Returns once the whole frame has been handed to the transport.
pub async fn write_frame<W>(writer: &mut W, kind: FrameKind, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = build_frame(kind, payload)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// Wait until everything written so far has left the local buffers.
pub async fn drain<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.flush().await?;
    Ok(())
}
