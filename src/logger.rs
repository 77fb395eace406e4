//! Logging capability used by sessions, the listener and the client.
//!
//! The crate never writes to a sink directly; it calls a [`Logger`]. The
//! default [`TracingLogger`] forwards to `tracing`, so applications that
//! already install a subscriber get the output for free.

use std::sync::Arc;

/// Sink for diagnostic messages.
///
/// Implementations must not panic.
pub trait Logger: Send + Sync + 'static {
    /// Report a failure.
    fn error(&self, message: &str);
    /// Report a lifecycle event.
    fn info(&self, message: &str);
    /// Report fine-grained progress (state transitions).
    fn debug(&self, message: &str);
}

/// Logger that forwards to the `tracing` macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "pipe_rpc", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "pipe_rpc", "{}", message);
    }

    fn debug(&self, message: &str) {
        tracing::debug!(target: "pipe_rpc", "{}", message);
    }
}

/// Shared logger handle.
pub type SharedLogger = Arc<dyn Logger>;

/// The logger used when none is configured.
pub fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger)
}
