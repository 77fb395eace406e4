//! Transport module - platform-specific channel handling.
//!
//! Provides abstraction over:
//! - Unix Domain Sockets (Linux/macOS)
//! - Named Pipes (Windows)

mod pipe;

pub use pipe::{
    channel_path, connect, generate_channel_name, is_retryable, ClientStream, PipeListener,
    ServerStream,
};
