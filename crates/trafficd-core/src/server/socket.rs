//! Ownership of the bound socket path.

use crate::{DispatchError, Result};
use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tokio::net::UnixDatagram;
use tracing::{debug, warn};

/// A bound datagram socket whose path is unlinked on drop.
///
/// Dropping happens on every exit from the server task: normal shutdown,
/// a fatal error, a panic unwinding through it, or the task being aborted.
#[derive(Debug)]
pub struct SocketGuard {
    socket: UnixDatagram,
    path: PathBuf,
}

impl SocketGuard {
    /// Bind at `path`, clearing a stale socket file left by a dead process.
    ///
    /// Fails if another process is still serving on `path` or if the path
    /// exists and is not a socket.
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        clear_stale_socket(&path)?;

        let socket =
            UnixDatagram::bind(&path).map_err(|e| DispatchError::io_with_path(e, &path))?;
        Ok(Self { socket, path })
    }

    pub fn socket(&self) -> &UnixDatagram {
        &self.socket
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed socket {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove socket {}: {}", self.path.display(), e),
        }
    }
}

fn clear_stale_socket(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(DispatchError::io_with_path(e, path)),
    };

    if !meta.file_type().is_socket() {
        return Err(DispatchError::Config {
            message: format!("{} exists and is not a socket", path.display()),
        });
    }

    // Connecting a datagram socket only succeeds while someone is bound there.
    let client = std::os::unix::net::UnixDatagram::unbound()?;
    if client.connect(path).is_ok() {
        return Err(DispatchError::Config {
            message: format!("{} is in use by another server", path.display()),
        });
    }

    warn!("Removing stale socket {}", path.display());
    std::fs::remove_file(path).map_err(|e| DispatchError::io_with_path(e, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_drop_removes_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.sock");

        let guard = SocketGuard::bind(&path).unwrap();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.sock");

        // Bind with std and forget to clean up, like a crashed process would.
        let stale = std::os::unix::net::UnixDatagram::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let guard = SocketGuard::bind(&path).unwrap();
        assert_eq!(guard.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_live_socket_is_not_stolen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.sock");

        let _first = SocketGuard::bind(&path).unwrap();
        let second = SocketGuard::bind(&path);
        assert!(matches!(second, Err(DispatchError::Config { .. })));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_regular_file_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-a-socket");
        std::fs::write(&path, b"data").unwrap();

        assert!(SocketGuard::bind(&path).is_err());
        assert!(path.exists());
    }
}
