//! Error types for pipe-rpc.

use std::time::Duration;

use thiserror::Error;

/// Main error type for all pipe-rpc operations.
#[derive(Debug, Error)]
pub enum PipeRpcError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (bad frame kind, oversized payload, truncated frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No server accepted the connection within the timeout.
    #[error("Timed out after {0:?} waiting for the server")]
    ConnectTimeout(Duration),

    /// The operation was cancelled through its cancellation token.
    #[error("Operation was cancelled")]
    Cancelled,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// `send_message` was called on a client that is not connected.
    #[error("Unable to send message, no connection established.")]
    NotConnected,

    /// `start` was called on a client that is already connected.
    #[error("Client is already connected")]
    AlreadyConnected,

    /// `start` was called on a server that is already running.
    #[error("Server is already running")]
    AlreadyStarted,

    /// A method with this name is already registered.
    #[error("Method already registered: {0}")]
    DuplicateMethod(String),
}

impl PipeRpcError {
    /// Whether this error indicates a wiring bug rather than a runtime condition.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::AlreadyConnected
                | Self::AlreadyStarted
                | Self::DuplicateMethod(_)
        )
    }
}

/// Result type alias using PipeRpcError.
pub type Result<T> = std::result::Result<T, PipeRpcError>;
