//! # pipe-rpc
//!
//! Local request/response RPC between processes on one machine.
//!
//! A [`PipeServer`] listens on a named channel (a Named Pipe on Windows, a
//! Unix domain socket elsewhere) and dispatches each request to a method
//! registered by name. A [`PipeClient`] connects, sends one request and
//! reads one response.
//!
//! ## Architecture
//!
//! - **Envelopes** (JSON): `{"name", "parameter"}` requests and
//!   `{"success", "errorMessage", "data"}` responses
//! - **Framing**: `[kind: u8][length: u32 BE][payload]`, one frame each way
//! - **Sessions**: the server keeps one session waiting for the next client
//!   and serves up to `max_instances` clients at once
//!
//! ## Example
//!
//! ```no_run
//! use std::convert::Infallible;
//! use std::time::Duration;
//! use pipe_rpc::{CancellationToken, PipeClient, PipeServer, Request};
//!
//! #[tokio::main]
//! async fn main() -> pipe_rpc::Result<()> {
//!     let cancel = CancellationToken::new();
//!
//!     let server = PipeServer::builder("listener")
//!         .method_fn("Double", |x: i64| Ok::<_, Infallible>(x * 2))
//!         .build()?;
//!     server.start(&cancel)?;
//!
//!     let mut client = PipeClient::new("listener");
//!     client.start(Duration::from_secs(6), &cancel).await?;
//!     let request = Request::new("Double", 5);
//!     let response = client.send_message::<i64, _>(&request, &cancel).await?;
//!     assert_eq!(response.data, Some(10));
//!
//!     server.stop();
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod codec;
pub mod envelope;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;

mod client;

pub use cancel::CancellationToken;
pub use client::{
    ClientConfig, ClientState, PipeClient, DEFAULT_CONNECT_RETRY_INTERVAL, DEFAULT_CONNECT_TIMEOUT,
    EMPTY_RESPONSE_MESSAGE,
};
pub use envelope::{Request, Response};
pub use error::{PipeRpcError, Result};
pub use logger::{Logger, TracingLogger};
pub use registry::MethodRegistry;
pub use server::{PipeServer, ServerBuilder, ServerConfig, SessionId, SessionState};
