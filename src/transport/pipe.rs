//! Platform-specific channel implementation.
//!
//! - Unix: Unix Domain Socket at `<tmpdir>/<channel>.sock`
//! - Windows: Named Pipe at `\\.\pipe\<channel>`
//!
//! On Windows every accepted client consumes one pipe instance, so each
//! [`PipeListener::accept`] call creates a fresh instance. On Unix all
//! sessions share one listening socket and the kernel queues pending
//! connections in its backlog.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Result;

/// Map a channel name to the OS endpoint path.
///
/// Names that already look like an endpoint path are returned unchanged.
pub fn channel_path(channel_name: &str) -> String {
    #[cfg(unix)]
    {
        if channel_name.starts_with('/') {
            return channel_name.to_string();
        }
        std::env::temp_dir()
            .join(format!("{}.sock", channel_name))
            .to_string_lossy()
            .into_owned()
    }

    #[cfg(windows)]
    {
        if channel_name.starts_with(r"\\") {
            return channel_name.to_string();
        }
        format!(r"\\.\pipe\{}", channel_name)
    }
}

/// Generate a channel name unique to this process and call.
///
/// Format: `pipe-rpc-{pid}-{random}`
pub fn generate_channel_name() -> String {
    format!("pipe-rpc-{}-{:x}", std::process::id(), rand_u64())
}

/// Random-ish u64 from the clock, process ID and a call counter.
fn rand_u64() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = std::process::id() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    nanos.wrapping_mul(0x517cc1b727220a95) ^ pid ^ count.rotate_left(32)
}

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::os::unix::fs::{FileTypeExt, MetadataExt};
    use tokio::net::{UnixListener, UnixStream};

    /// Server end of an accepted connection.
    pub type ServerStream = UnixStream;

    /// Client end of a connection.
    pub type ClientStream = UnixStream;

    /// Unix Domain Socket listener shared by all sessions of a server.
    pub struct PipeListener {
        listener: UnixListener,
        path: String,
        max_instances: usize,
        /// `(dev, ino)` of the socket file this listener created.
        identity: Option<(u64, u64)>,
    }

    impl PipeListener {
        /// Bind to a Unix socket path.
        ///
        /// A socket file left behind by a dead server is removed first. A
        /// socket that still accepts connections is `AddrInUse`.
        pub fn bind(path: &str, max_instances: usize) -> Result<Self> {
            remove_stale_socket(path)?;

            let listener = UnixListener::bind(path)?;
            let identity = file_identity(path);

            Ok(Self {
                listener,
                path: path.to_string(),
                max_instances,
                identity,
            })
        }

        /// Wait for one client to connect.
        pub async fn accept(&self) -> Result<ServerStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(stream)
        }

        /// Get the socket path.
        pub fn path(&self) -> &str {
            &self.path
        }

        /// Configured instance bound.
        pub fn max_instances(&self) -> usize {
            self.max_instances
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            // A newer listener may have rebound the same path.
            if self.identity.is_some() && file_identity(&self.path) == self.identity {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    fn remove_stale_socket(path: &str) -> io::Result<()> {
        let is_socket = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta.file_type().is_socket(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if !is_socket {
            // Let bind report the conflict instead of deleting a regular file.
            return Ok(());
        }

        match std::os::unix::net::UnixStream::connect(path) {
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is served by a running listener", path),
            )),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                std::fs::remove_file(path).or_else(|e| match e.kind() {
                    io::ErrorKind::NotFound => Ok(()),
                    _ => Err(e),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn file_identity(path: &str) -> Option<(u64, u64)> {
        std::fs::metadata(path).ok().map(|m| (m.dev(), m.ino()))
    }

    /// Open one connection attempt to the server.
    pub async fn connect(path: &str) -> io::Result<ClientStream> {
        UnixStream::connect(path).await
    }

    /// Whether a failed connect attempt may succeed later.
    pub fn is_retryable(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
        )
    }
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::sync::{Mutex, PoisonError};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };

    /// ERROR_PIPE_BUSY: every instance is connected to a client.
    const ERROR_PIPE_BUSY: i32 = 231;

    /// Upper bound accepted by `CreateNamedPipe`.
    const PIPE_UNLIMITED_INSTANCES: usize = 254;

    /// Server end of an accepted connection.
    pub type ServerStream = NamedPipeServer;

    /// Client end of a connection.
    pub type ClientStream = NamedPipeClient;

    /// Named Pipe listener; creates one pipe instance per accept.
    pub struct PipeListener {
        path: String,
        max_instances: usize,
        /// Instance created at bind time, handed to the first accept.
        first: Mutex<Option<NamedPipeServer>>,
    }

    impl PipeListener {
        /// Create the first pipe instance so clients can find the pipe.
        pub fn bind(path: &str, max_instances: usize) -> Result<Self> {
            let max_instances = max_instances.clamp(1, PIPE_UNLIMITED_INSTANCES);
            let first = ServerOptions::new()
                .first_pipe_instance(true)
                .max_instances(max_instances)
                .create(path)?;

            Ok(Self {
                path: path.to_string(),
                max_instances,
                first: Mutex::new(Some(first)),
            })
        }

        /// Create (or reuse the first) pipe instance and wait for a client.
        pub async fn accept(&self) -> Result<ServerStream> {
            let reserved = self
                .first
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();

            let server = match reserved {
                Some(server) => server,
                None => ServerOptions::new()
                    .max_instances(self.max_instances)
                    .create(&self.path)?,
            };

            server.connect().await?;
            Ok(server)
        }

        /// Get the pipe path.
        pub fn path(&self) -> &str {
            &self.path
        }

        /// Configured instance bound.
        pub fn max_instances(&self) -> usize {
            self.max_instances
        }
    }

    /// Open one connection attempt to the server.
    pub async fn connect(path: &str) -> io::Result<ClientStream> {
        ClientOptions::new().open(path)
    }

    /// Whether a failed connect attempt may succeed later.
    pub fn is_retryable(err: &io::Error) -> bool {
        err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(ERROR_PIPE_BUSY)
    }
}

// ============================================================================
// Platform-independent re-exports
// ============================================================================

#[cfg(unix)]
pub use unix_impl::{connect, is_retryable, ClientStream, PipeListener, ServerStream};

#[cfg(windows)]
pub use windows_impl::{connect, is_retryable, ClientStream, PipeListener, ServerStream};
