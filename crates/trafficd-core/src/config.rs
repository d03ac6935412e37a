//! Centralized configuration for trafficd.
//!
//! Wire constants and defaults live on unit structs as associated consts;
//! the runtime settings for one server instance live in [`ServerConfig`].

use crate::{DispatchError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Fixed frame schema (version 1).
pub struct WireConfig;

impl WireConfig {
    pub const WIRE_VERSION: u8 = 1;
    pub const ID_LEN: usize = 2;
    pub const KIND_LEN: usize = 1;
    pub const ARG1_CAPACITY: usize = 255;
    pub const ARG2_CAPACITY: usize = 15;
    /// 2 + 1 + (1 + 255) + (1 + 15)
    pub const FRAME_LEN: usize =
        Self::ID_LEN + Self::KIND_LEN + 1 + Self::ARG1_CAPACITY + 1 + Self::ARG2_CAPACITY;
}

/// Server defaults.
pub struct ServerDefaults;

impl ServerDefaults {
    pub const SOCKET_PATH_ENV: &'static str = "SOCKET_PATH";
    pub const WORKERS: usize = 4;
    pub const QUEUE_CAPACITY: usize = 64;
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
}

/// Bus and blob store defaults.
pub struct PublishConfig;

impl PublishConfig {
    pub const DEFAULT_TOPIC: &'static str = "traffic-results";
    pub const DEFAULT_STORAGE_URL: &'static str = "https://storage.googleapis.com";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const RETRY_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
    pub const USER_AGENT: &'static str = "trafficd/0.1";
}

/// Runtime configuration for one dispatch server.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trafficd_core::ServerConfig;
///
/// let config = ServerConfig::new("/tmp/trafficd.sock")
///     .with_workers(2)
///     .with_queue_capacity(8)
///     .with_shutdown_grace(Duration::from_secs(1));
/// assert!(config.validate().is_ok());
/// assert!(config.with_workers(0).validate().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Filesystem path of the datagram socket.
    pub socket_path: PathBuf,
    /// Number of frames processed concurrently.
    pub workers: usize,
    /// Frames buffered between the listener and the workers.
    pub queue_capacity: usize,
    /// How long `shutdown` waits for queued frames to finish.
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    /// Config for `socket_path` with the default pool and queue sizes.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            workers: ServerDefaults::WORKERS,
            queue_capacity: ServerDefaults::QUEUE_CAPACITY,
            shutdown_grace: ServerDefaults::SHUTDOWN_GRACE,
        }
    }

    /// Read the socket path from `SOCKET_PATH`.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(ServerDefaults::SOCKET_PATH_ENV).ok_or_else(|| {
            DispatchError::Config {
                message: format!("{} is not set", ServerDefaults::SOCKET_PATH_ENV),
            }
        })?;
        Ok(Self::new(path))
    }

    /// Number of frames handled at once.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Decoded frames held ahead of the workers.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// How long shutdown waits for queued frames to finish.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Reject zero workers, a zero queue or an empty socket path.
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            return Err(DispatchError::Config {
                message: "socket path is empty".to_string(),
            });
        }
        if self.workers == 0 {
            return Err(DispatchError::Config {
                message: "at least one worker is required".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(DispatchError::Config {
                message: "queue capacity must be positive".to_string(),
            });
        }
        Ok(())
    }
}
