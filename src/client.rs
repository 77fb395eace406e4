//! Client stub: connect once, send one request, read one response.
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected ─► Sending ─► AwaitingDrain ─► Receiving ─► Decoding ─► Done
//! ```
//!
//! Runtime failures during an exchange (broken pipe, a server that closed
//! without answering, an undecodable reply) come back as a failed
//! [`Response`] rather than an `Err`, so callers always get an envelope.
//! `Err` is reserved for calling the client in the wrong state.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use pipe_rpc::{CancellationToken, PipeClient, Request};
//!
//! # async fn run() -> pipe_rpc::Result<()> {
//! let cancel = CancellationToken::new();
//! let mut client = PipeClient::new("listener");
//! client.start(Duration::from_secs(6), &cancel).await?;
//!
//! let response = client
//!     .send_message::<i64, _>(&Request::new("Double", 21), &cancel)
//!     .await?;
//! assert_eq!(response.data, Some(42));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::codec::JsonCodec;
use crate::envelope::{Request, Response};
use crate::error::{PipeRpcError, Result};
use crate::logger::{default_logger, Logger, SharedLogger};
use crate::protocol::{
    drain, read_frame, write_frame, FrameBuffer, FrameKind, DEFAULT_MAX_PAYLOAD_SIZE,
    READ_CHUNK_SIZE,
};
use crate::transport::{channel_path, connect, is_retryable, ClientStream};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(6);

/// Default pause between connect attempts while the server is unavailable.
pub const DEFAULT_CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Message used when the server closes without sending a response.
pub const EMPTY_RESPONSE_MESSAGE: &str = "Response from server is empty.";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Largest accepted response payload.
    pub max_payload_size: u32,
    /// Pause between connect attempts.
    pub connect_retry_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            connect_retry_interval: DEFAULT_CONNECT_RETRY_INTERVAL,
        }
    }
}

/// Where the client is in its single exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected.
    Disconnected,
    /// Waiting for the server to accept.
    Connecting,
    /// Connected, ready to send.
    Connected,
    /// Writing the request frame.
    Sending,
    /// Waiting for the request to be flushed.
    AwaitingDrain,
    /// Waiting for the response frame.
    Receiving,
    /// Decoding the response.
    Decoding,
    /// The exchange is over; the connection is closed.
    Done,
}

/// Client for one request/response exchange with a [`PipeServer`].
///
/// [`PipeServer`]: crate::PipeServer
pub struct PipeClient {
    path: String,
    config: ClientConfig,
    logger: SharedLogger,
    stream: Option<ClientStream>,
    state: ClientState,
}

impl PipeClient {
    /// Client for `channel_name` with default configuration.
    pub fn new(channel_name: &str) -> Self {
        Self::with_config(channel_name, ClientConfig::default())
    }

    /// Client for `channel_name` with custom configuration.
    pub fn with_config(channel_name: &str, config: ClientConfig) -> Self {
        Self {
            path: channel_path(channel_name),
            config,
            logger: default_logger(),
            stream: None,
            state: ClientState::Disconnected,
        }
    }

    /// Use a custom logger.
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Endpoint path this client connects to.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Connect to the server, retrying until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if a connection is open
    /// - `ConnectTimeout` if no server accepted in time
    /// - `Cancelled` if `cancel` fired first
    /// - `Io` for connect errors that retrying cannot fix
    pub async fn start(&mut self, timeout: Duration, cancel: &CancellationToken) -> Result<()> {
        if self.stream.is_some() {
            return Err(PipeRpcError::AlreadyConnected);
        }
        cancel.check()?;

        self.transition(ClientState::Connecting);
        self.logger
            .info(&format!("Connecting to {} (timeout {:?}).", self.path, timeout));

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipeRpcError::Cancelled),
            connected = tokio::time::timeout(timeout, self.connect_with_retry()) => {
                connected.unwrap_or(Err(PipeRpcError::ConnectTimeout(timeout)))
            }
        };

        match attempt {
            Ok(stream) => {
                self.stream = Some(stream);
                self.transition(ClientState::Connected);
                self.logger.info(&format!("Connected to {}.", self.path));
                Ok(())
            }
            Err(e) => {
                self.transition(ClientState::Disconnected);
                match &e {
                    PipeRpcError::Cancelled => self
                        .logger
                        .debug(&format!("Connecting to {} was cancelled.", self.path)),
                    _ => self
                        .logger
                        .error(&format!("Failed to connect to {}: {}", self.path, e)),
                }
                Err(e)
            }
        }
    }

    async fn connect_with_retry(&self) -> Result<ClientStream> {
        loop {
            match connect(&self.path).await {
                Ok(stream) => return Ok(stream),
                Err(e) if is_retryable(&e) => {
                    tokio::time::sleep(self.config.connect_retry_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send one request and wait for its response.
    ///
    /// The connection is consumed; the client ends in [`ClientState::Done`].
    ///
    /// # Errors
    ///
    /// `NotConnected` if [`PipeClient::start`] has not succeeded. Every
    /// other failure is reported as `Ok(Response::failure(..))`.
    pub async fn send_message<R, P>(
        &mut self,
        request: &Request<P>,
        cancel: &CancellationToken,
    ) -> Result<Response<R>>
    where
        R: DeserializeOwned,
        P: Serialize,
    {
        let Some(mut stream) = self.stream.take() else {
            self.logger.error(&PipeRpcError::NotConnected.to_string());
            return Err(PipeRpcError::NotConnected);
        };

        let name = request.name.as_str();
        let response = match self.exchange(&mut stream, request, cancel).await {
            Ok(response) => response,
            Err(PipeRpcError::Cancelled) => {
                self.logger
                    .debug(&format!("Request {} was cancelled.", name));
                Response::failure(PipeRpcError::Cancelled.to_string())
            }
            Err(e) => {
                self.logger
                    .error(&format!("Request {} failed: {}", name, e));
                Response::failure(e.to_string())
            }
        };

        drop(stream);
        self.transition(ClientState::Done);
        Ok(response)
    }

    async fn exchange<R, P>(
        &mut self,
        stream: &mut ClientStream,
        request: &Request<P>,
        cancel: &CancellationToken,
    ) -> Result<Response<R>>
    where
        R: DeserializeOwned,
        P: Serialize,
    {
        self.transition(ClientState::Sending);
        cancel.check()?;
        let payload = JsonCodec::encode(request)?;
        write_frame(stream, FrameKind::Request, &payload).await?;

        self.transition(ClientState::AwaitingDrain);
        drain(stream).await?;

        self.transition(ClientState::Receiving);
        let mut scratch = vec![0u8; READ_CHUNK_SIZE];
        let mut frames = FrameBuffer::with_max_payload(self.config.max_payload_size);
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipeRpcError::Cancelled),
            frame = read_frame(stream, &mut scratch, &mut frames, FrameKind::Response) => frame?,
        };

        self.transition(ClientState::Decoding);
        match frame {
            Some(frame) if !frame.payload().is_empty() => JsonCodec::decode(frame.payload()),
            _ => Ok(Response::failure(EMPTY_RESPONSE_MESSAGE)),
        }
    }

    /// Close the connection. Idempotent.
    pub fn stop(&mut self) {
        if self.stream.take().is_some() {
            self.logger
                .info(&format!("Disconnected from {}.", self.path));
            self.transition(ClientState::Disconnected);
        }
    }

    fn transition(&mut self, next: ClientState) {
        self.logger
            .debug(&format!("client {}: {:?} -> {:?}", self.path, self.state, next));
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{generate_channel_name, PipeListener};

    #[tokio::test]
    async fn test_send_before_start_is_misuse() {
        let mut client = PipeClient::new(&generate_channel_name());
        let result = client
            .send_message::<i64, _>(&Request::new("Double", 5), &CancellationToken::new())
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, PipeRpcError::NotConnected));
        assert_eq!(err.to_string(), "Unable to send message, no connection established.");
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_times_out_without_server() {
        let mut client = PipeClient::new(&generate_channel_name());
        let started = std::time::Instant::now();
        let result = client
            .start(Duration::from_millis(200), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PipeRpcError::ConnectTimeout(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(client.state(), ClientState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_cancelled() {
        let mut client = PipeClient::new(&generate_channel_name());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = client.start(Duration::from_secs(30), &cancel).await;
        assert!(matches!(result, Err(PipeRpcError::Cancelled)));
    }

    #[tokio::test]
    async fn test_server_closing_without_reply_is_empty_response() {
        let channel = generate_channel_name();
        let listener = PipeListener::bind(&channel_path(&channel), 1).unwrap();
        let server = tokio::spawn(async move {
            let stream = listener.accept().await.unwrap();
            drop(stream);
            listener
        });

        let cancel = CancellationToken::new();
        let mut client = PipeClient::new(&channel);
        client.start(Duration::from_secs(2), &cancel).await.unwrap();
        assert!(matches!(
            client.start(Duration::from_secs(2), &cancel).await,
            Err(PipeRpcError::AlreadyConnected)
        ));

        let _listener = server.await.unwrap();
        let response = client
            .send_message::<i64, _>(&Request::new("Double", 5), &cancel)
            .await
            .unwrap();

        assert!(!response.success);
        assert!(response.data.is_none());
        assert_eq!(client.state(), ClientState::Done);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let mut client = PipeClient::new(&generate_channel_name());
        client.stop();
        client.stop();
        assert_eq!(client.state(), ClientState::Disconnected);
    }
}
