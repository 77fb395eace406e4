//! Protocol module - wire format and framing.
//!
//! - 5-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Async single-frame read/write helpers

mod frame;
mod frame_buffer;
mod io;
mod wire_format;

pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use io::{drain, read_frame, write_frame, READ_CHUNK_SIZE};
pub use wire_format::{FrameKind, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
