//! Server module - session pool and per-connection sessions.
//!
//! Provides:
//! - [`PipeServer`] - binds a channel and keeps a session waiting for the
//!   next client at all times
//! - [`ServerBuilder`] / [`ServerConfig`] - configuration and method
//!   registration
//! - [`SessionState`] / [`SessionEvent`] - the per-connection state machine
//!   and the notifications sessions send to the pool

mod config;
mod listener;
mod session;

pub use config::{ServerBuilder, ServerConfig, DEFAULT_ACCEPT_RETRY_DELAY, DEFAULT_MAX_INSTANCES};
pub use listener::PipeServer;
pub use session::{SessionEvent, SessionId, SessionState};
