//! Server configuration and builder.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::PipeServer;
use crate::error::{PipeRpcError, Result};
use crate::logger::{default_logger, Logger, SharedLogger};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::registry::MethodRegistry;

/// Default bound on sessions per channel name.
pub const DEFAULT_MAX_INSTANCES: usize = 10;

/// Default pause before replacing a session whose accept failed.
pub const DEFAULT_ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Channel name clients connect to.
    pub channel_name: String,
    /// Maximum sessions alive at once, including the one waiting for the
    /// next client.
    pub max_instances: usize,
    /// Largest accepted request payload.
    pub max_payload_size: u32,
    /// Pause before replacing a session whose accept failed.
    pub accept_retry_delay: Duration,
}

impl ServerConfig {
    /// Configuration with defaults for `channel_name`.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            max_instances: DEFAULT_MAX_INSTANCES,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            accept_retry_delay: DEFAULT_ACCEPT_RETRY_DELAY,
        }
    }
}

/// Builder for configuring a [`PipeServer`] and registering its methods.
///
/// ```
/// use std::convert::Infallible;
/// use pipe_rpc::PipeServer;
///
/// let server = PipeServer::builder("listener")
///     .max_instances(4)
///     .method_fn("Double", |x: i64| Ok::<_, Infallible>(x * 2))
///     .build()
///     .unwrap();
/// assert!(server.registry().contains("Double"));
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    registry: Arc<MethodRegistry>,
    logger: SharedLogger,
    duplicates: Vec<String>,
}

impl ServerBuilder {
    /// Create a new builder for `channel_name`.
    pub fn new(channel_name: impl Into<String>) -> Self {
        Self {
            config: ServerConfig::new(channel_name),
            registry: Arc::new(MethodRegistry::new()),
            logger: default_logger(),
            duplicates: Vec::new(),
        }
    }

    /// Set the maximum number of live sessions.
    ///
    /// Values below 1 are raised to 1.
    /// Default: 10
    pub fn max_instances(mut self, limit: usize) -> Self {
        self.config.max_instances = limit.max(1);
        self
    }

    /// Set the largest accepted request payload.
    ///
    /// Default: 64 MiB
    pub fn max_payload_size(mut self, bytes: u32) -> Self {
        self.config.max_payload_size = bytes;
        self
    }

    /// Set the pause before replacing a session whose accept failed.
    ///
    /// Default: 100 ms
    pub fn accept_retry_delay(mut self, delay: Duration) -> Self {
        self.config.accept_retry_delay = delay;
        self
    }

    /// Use a custom logger.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Use an existing registry instead of a fresh one.
    pub fn registry(mut self, registry: Arc<MethodRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Register an async handler.
    pub fn method<F, T, R, E, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        if !self.registry.register(name, handler) {
            self.duplicates.push(name.to_string());
        }
        self
    }

    /// Register a synchronous handler.
    pub fn method_fn<F, T, R, E>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(T) -> std::result::Result<R, E> + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        if !self.registry.register_fn(name, handler) {
            self.duplicates.push(name.to_string());
        }
        self
    }

    /// Build the server.
    ///
    /// # Errors
    ///
    /// `DuplicateMethod` if any name was registered twice.
    pub fn build(self) -> Result<PipeServer> {
        if let Some(name) = self.duplicates.into_iter().next() {
            return Err(PipeRpcError::DuplicateMethod(name));
        }
        Ok(PipeServer::new(self.config, self.registry, self.logger))
    }
}
