//! The server: a pool of sessions that always keeps one waiting.
//!
//! ```text
//!                    ┌───────────── SessionEvent (mpsc) ─────────────┐
//!                    ▼                                               │
//! start() ─► pool task ─► spawn session ─► waiting ─► Connected ──────┤
//!                 ▲                                   │               │
//!                 └── spawn replacement ◄─────────────┘   Disconnected┘
//! ```
//!
//! The pool task is the only consumer of session events, so every event is
//! handled exactly once and in order. The id → session map is behind a
//! mutex so `stop()` can drain it from any thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, Semaphore};

use super::session::{Session, SessionContext, SessionEvent, SessionId};
use super::{ServerBuilder, ServerConfig};
use crate::cancel::CancellationToken;
use crate::error::{PipeRpcError, Result};
use crate::logger::SharedLogger;
use crate::registry::MethodRegistry;
use crate::transport::{channel_path, PipeListener};

/// Handle the pool keeps for each live session.
struct SessionHandle {
    cancel: CancellationToken,
}

/// Live sessions keyed by id.
#[derive(Default)]
struct SessionPool {
    sessions: Mutex<HashMap<SessionId, SessionHandle>>,
    stopping: AtomicBool,
}

impl SessionPool {
    fn insert(&self, id: SessionId, handle: SessionHandle) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
    }

    fn remove(&self, id: SessionId) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Mark the pool as stopping, cancel every session and clear the map.
    ///
    /// Returns `false` if the pool was already stopping.
    fn stop_all(&self) -> bool {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return false;
        }
        let sessions = std::mem::take(
            &mut *self
                .sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in sessions.values() {
            handle.cancel.cancel();
        }
        true
    }
}

/// State shared by the pool task and the sessions it spawns.
#[derive(Clone)]
struct PoolContext {
    session: SessionContext,
    pool: Arc<SessionPool>,
    config: ServerConfig,
}

impl PoolContext {
    fn spawn_session(&self, parent: &CancellationToken) -> Option<SessionId> {
        if self.pool.is_stopping() || parent.is_cancelled() {
            return None;
        }

        let id = SessionId::next();
        let cancel = parent.child_token();
        self.pool.insert(
            id,
            SessionHandle {
                cancel: cancel.clone(),
            },
        );

        let session = Session::new(id, self.session.clone(), cancel, parent.clone());
        tokio::spawn(session.run());
        Some(id)
    }

    fn handle_event(&self, event: SessionEvent, shutdown: &CancellationToken) {
        if self.pool.is_stopping() {
            return;
        }

        match event {
            SessionEvent::Connected { id, cancel } => {
                self.session
                    .logger
                    .debug(&format!("{} connected, starting the next session.", id));
                self.spawn_session(&cancel);
            }
            SessionEvent::Disconnected { id } => {
                self.pool.remove(id);
            }
            SessionEvent::AcceptFailed { id, error } => {
                self.pool.remove(id);
                self.session.logger.info(&format!(
                    "Replacing {} after accept failure ({}) in {:?}.",
                    id, error, self.config.accept_retry_delay
                ));

                let ctx = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(ctx.config.accept_retry_delay) => {
                            ctx.spawn_session(&shutdown);
                        }
                    }
                });
            }
        }
    }
}

/// Consume session events until shutdown.
async fn run_pool(
    ctx: PoolContext,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    shutdown: CancellationToken,
) {
    ctx.spawn_session(&shutdown);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => ctx.handle_event(event, &shutdown),
                None => break,
            },
        }
    }

    ctx.pool.stop_all();
    ctx.session.logger.info(&format!(
        "Server on {} stopped.",
        ctx.session.listener.path()
    ));
}

struct Running {
    shutdown: CancellationToken,
    pool: Arc<SessionPool>,
}

/// Local RPC server.
///
/// Call [`PipeServer::start`] from inside a Tokio runtime; it binds the
/// channel and returns while sessions run in the background.
pub struct PipeServer {
    config: ServerConfig,
    registry: Arc<MethodRegistry>,
    logger: SharedLogger,
    running: Mutex<Option<Running>>,
}

impl PipeServer {
    /// Create a new server builder.
    pub fn builder(channel_name: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(channel_name)
    }

    pub(crate) fn new(
        config: ServerConfig,
        registry: Arc<MethodRegistry>,
        logger: SharedLogger,
    ) -> Self {
        Self {
            config,
            registry,
            logger,
            running: Mutex::new(None),
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Registry the sessions dispatch to.
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Bind the channel and start accepting clients.
    ///
    /// Returns as soon as the first session is spawned. Cancelling `cancel`
    /// stops the server just like [`PipeServer::stop`].
    ///
    /// # Errors
    ///
    /// `AlreadyStarted` if the server is running, or the bind error.
    pub fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|r| !r.shutdown.is_cancelled()) {
            return Err(PipeRpcError::AlreadyStarted);
        }

        let path = channel_path(&self.config.channel_name);
        let listener = Arc::new(PipeListener::bind(&path, self.config.max_instances)?);
        self.logger.info(&format!(
            "Starting server on {} with up to {} sessions.",
            path, self.config.max_instances
        ));

        let shutdown = cancel.child_token();
        let pool = Arc::new(SessionPool::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let ctx = PoolContext {
            session: SessionContext {
                listener,
                registry: self.registry.clone(),
                logger: self.logger.clone(),
                events: events_tx,
                capacity: Arc::new(Semaphore::new(self.config.max_instances)),
                max_payload_size: self.config.max_payload_size,
            },
            pool: pool.clone(),
            config: self.config.clone(),
        };

        tokio::spawn(run_pool(ctx, events_rx, shutdown.clone()));

        *running = Some(Running { shutdown, pool });
        Ok(())
    }

    /// Stop accepting clients and close every session.
    ///
    /// Idempotent. Sessions in the middle of an exchange close at their next
    /// phase boundary.
    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(running) = running else {
            return;
        };

        if running.pool.stop_all() {
            self.logger.info(&format!(
                "Stopping server on {}.",
                channel_path(&self.config.channel_name)
            ));
        }
        running.shutdown.cancel();
    }

    /// Whether the server has been started and not stopped.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.shutdown.is_cancelled())
    }

    /// Number of live sessions, including the one waiting for a client.
    pub fn session_count(&self) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |r| r.pool.len())
    }
}

impl Drop for PipeServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stop_all_is_idempotent() {
        let pool = SessionPool::default();
        let parent = CancellationToken::new();
        let cancels: Vec<_> = (0..3)
            .map(|_| {
                let cancel = parent.child_token();
                pool.insert(
                    SessionId::next(),
                    SessionHandle {
                        cancel: cancel.clone(),
                    },
                );
                cancel
            })
            .collect();

        assert_eq!(pool.len(), 3);
        assert!(pool.stop_all());
        assert!(!pool.stop_all());

        assert_eq!(pool.len(), 0);
        assert!(pool.is_stopping());
        assert!(cancels.iter().all(CancellationToken::is_cancelled));
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_pool_remove_unknown() {
        let pool = SessionPool::default();
        let id = SessionId::next();
        pool.insert(
            id,
            SessionHandle {
                cancel: CancellationToken::new(),
            },
        );

        assert!(pool.remove(id));
        assert!(!pool.remove(id));
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let server = PipeServer::builder("never-started").build().unwrap();
        server.stop();
        server.stop();
        assert!(!server.is_running());
        assert_eq!(server.session_count(), 0);
    }
}
