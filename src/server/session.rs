//! One server session: wait for a client, serve one exchange, close.
//!
//! ```text
//! Idle ─► Connecting ─► Connected ─► Reading ─► Dispatching ─► Writing ─► Draining ─► Closed
//!   │          │                        │                         │
//!   └──────────┴─ cancelled ────────────┴─────────────────────────┴──────────────────► Closed
//! ```
//!
//! A session reports its lifecycle to the owning server over an mpsc
//! channel. `Connected` and `Disconnected` are each sent at most once, from
//! [`Session::run`], which consumes the session. A session cancelled before
//! a client connects sends nothing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Semaphore};

use crate::cancel::CancellationToken;
use crate::codec::JsonCodec;
use crate::envelope::Response;
use crate::error::{PipeRpcError, Result};
use crate::logger::SharedLogger;
use crate::protocol::{
    drain, read_frame, write_frame, Frame, FrameBuffer, FrameKind, READ_CHUNK_SIZE,
};
use crate::registry::{InvokeError, MethodRegistry};
use crate::transport::{PipeListener, ServerStream};

/// Opaque session identifier, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Where a session is in its single exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, waiting for listener capacity.
    Idle,
    /// Waiting for a client to connect.
    Connecting,
    /// A client is connected.
    Connected,
    /// Reading the request frame.
    Reading,
    /// Resolving and running the handler.
    Dispatching,
    /// Writing the response frame.
    Writing,
    /// Waiting for the response to be flushed.
    Draining,
    /// Finished; the endpoint is released.
    Closed,
}

/// Lifecycle notification sent from a session to its server.
#[derive(Debug)]
pub enum SessionEvent {
    /// A client connected; the server should start the next session under
    /// `cancel`.
    Connected {
        /// Session that accepted the client.
        id: SessionId,
        /// Cancellation context the replacement session derives from.
        cancel: CancellationToken,
    },
    /// The session finished its exchange and released its endpoint.
    Disconnected {
        /// Session that finished.
        id: SessionId,
    },
    /// Waiting for a client failed with a transport error.
    AcceptFailed {
        /// Session that failed.
        id: SessionId,
        /// Error description.
        error: String,
    },
}

/// Everything a session shares with its server.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub listener: Arc<PipeListener>,
    pub registry: Arc<MethodRegistry>,
    pub logger: SharedLogger,
    pub events: mpsc::UnboundedSender<SessionEvent>,
    pub capacity: Arc<Semaphore>,
    pub max_payload_size: u32,
}

pub(crate) struct Session {
    id: SessionId,
    ctx: SessionContext,
    /// Token for this session only.
    cancel: CancellationToken,
    /// Token this session was derived from, handed on to the replacement.
    parent: CancellationToken,
    state: SessionState,
}

impl Session {
    pub fn new(
        id: SessionId,
        ctx: SessionContext,
        cancel: CancellationToken,
        parent: CancellationToken,
    ) -> Self {
        Self {
            id,
            ctx,
            cancel,
            parent,
            state: SessionState::Idle,
        }
    }

    fn transition(&mut self, next: SessionState) {
        self.ctx
            .logger
            .debug(&format!("{}: {:?} -> {:?}", self.id, self.state, next));
        self.state = next;
    }

    /// Run the session to completion.
    pub async fn run(mut self) {
        let cancel = self.cancel.clone();
        let capacity = self.ctx.capacity.clone();
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.close_unconnected(),
            permit = capacity.acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return self.close_unconnected(),
            },
        };

        self.transition(SessionState::Connecting);
        self.ctx.logger.info(&format!(
            "{} waiting for a client on {}.",
            self.id,
            self.ctx.listener.path()
        ));

        let listener = self.ctx.listener.clone();
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.close_unconnected(),
            accepted = listener.accept() => accepted,
        };

        let mut stream = match accepted {
            Ok(stream) => stream,
            Err(e) => {
                self.ctx
                    .logger
                    .error(&format!("{} failed to accept a client: {}", self.id, e));
                self.transition(SessionState::Closed);
                let _ = self.ctx.events.send(SessionEvent::AcceptFailed {
                    id: self.id,
                    error: e.to_string(),
                });
                return;
            }
        };

        self.transition(SessionState::Connected);
        self.ctx
            .logger
            .info(&format!("Client {} connected.", self.id));
        let _ = self.ctx.events.send(SessionEvent::Connected {
            id: self.id,
            cancel: self.parent.clone(),
        });

        self.exchange(&mut stream).await;

        let _ = stream.shutdown().await;
        drop(stream);
        drop(permit);

        self.transition(SessionState::Closed);
        self.ctx
            .logger
            .info(&format!("Client {} disconnected.", self.id));
        let _ = self.ctx.events.send(SessionEvent::Disconnected { id: self.id });
    }

    fn close_unconnected(mut self) {
        self.ctx.logger.debug(&format!(
            "{} cancelled while waiting for a client.",
            self.id
        ));
        self.transition(SessionState::Closed);
    }

    /// Read one request, dispatch it and write the response.
    ///
    /// Errors are logged here and never escape.
    async fn exchange(&mut self, stream: &mut ServerStream) {
        let response = match self.receive(stream).await {
            Ok(Some(frame)) => self.dispatch(frame.payload()).await,
            Ok(None) => {
                self.ctx
                    .logger
                    .error(&format!("{}: client sent an empty message.", self.id));
                InvokeError::Empty.into_response()
            }
            Err(PipeRpcError::Cancelled) => {
                self.ctx
                    .logger
                    .debug(&format!("{} cancelled before reading.", self.id));
                return;
            }
            Err(e) => {
                self.ctx
                    .logger
                    .error(&format!("{}: reading request failed: {}", self.id, e));
                Response::failure(e.to_string())
            }
        };

        match self.respond(stream, &response).await {
            Ok(()) => {}
            Err(PipeRpcError::Cancelled) => self
                .ctx
                .logger
                .debug(&format!("{} cancelled before writing.", self.id)),
            Err(e) => self
                .ctx
                .logger
                .error(&format!("{}: writing response failed: {}", self.id, e)),
        }
    }

    async fn receive(&mut self, stream: &mut ServerStream) -> Result<Option<Frame>> {
        self.transition(SessionState::Reading);
        self.cancel.check()?;

        // Per-session scratch space, freed with the session.
        let mut scratch = vec![0u8; READ_CHUNK_SIZE];
        let mut frames = FrameBuffer::with_max_payload(self.ctx.max_payload_size);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipeRpcError::Cancelled),
            frame = read_frame(stream, &mut scratch, &mut frames, FrameKind::Request) => frame,
        }
    }

    async fn dispatch(&mut self, request: &[u8]) -> Response<Value> {
        self.transition(SessionState::Dispatching);

        match self.ctx.registry.dispatch(request).await {
            Ok(data) => Response::ok(data),
            Err(e) => {
                self.ctx.logger.error(&format!("{}: {}", self.id, e));
                e.into_response()
            }
        }
    }

    async fn respond(
        &mut self,
        stream: &mut ServerStream,
        response: &Response<Value>,
    ) -> Result<()> {
        self.transition(SessionState::Writing);
        self.cancel.check()?;

        let payload = JsonCodec::encode(response)?;
        write_frame(stream, FrameKind::Response, &payload).await?;

        self.transition(SessionState::Draining);
        drain(stream).await
    }
}
