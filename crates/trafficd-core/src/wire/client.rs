//! Datagram client for sending frames to a running server.
//!
//! The server discards datagrams from unnamed senders, so the client binds
//! its own socket path before sending. That path is removed when the client
//! is dropped.

use super::frame::RequestFrame;
use crate::{DispatchError, Result};
use std::path::{Path, PathBuf};
use tokio::net::UnixDatagram;
use tracing::debug;

/// Client bound to a local socket path, addressing one server.
#[derive(Debug)]
pub struct DispatchClient {
    socket: UnixDatagram,
    local_path: PathBuf,
    server_path: PathBuf,
}

impl DispatchClient {
    /// Bind at `local_path` and address the server at `server_path`.
    pub fn bind(local_path: impl Into<PathBuf>, server_path: impl Into<PathBuf>) -> Result<Self> {
        let local_path = local_path.into();
        let socket = UnixDatagram::bind(&local_path)
            .map_err(|e| DispatchError::io_with_path(e, &local_path))?;

        debug!("Dispatch client bound to {}", local_path.display());

        Ok(Self {
            socket,
            local_path,
            server_path: server_path.into(),
        })
    }

    /// Bind at a unique path under the system temp directory.
    pub fn bind_ephemeral(server_path: impl Into<PathBuf>) -> Result<Self> {
        let local_path =
            std::env::temp_dir().join(format!("trafficd-client-{}.sock", uuid::Uuid::new_v4()));
        Self::bind(local_path, server_path)
    }

    /// Encode and send one frame.
    pub async fn send(&self, frame: &RequestFrame) -> Result<()> {
        let bytes = frame.encode()?;
        self.send_raw(&bytes).await
    }

    /// Send arbitrary bytes as one datagram.
    pub async fn send_raw(&self, payload: &[u8]) -> Result<()> {
        let sent = self
            .socket
            .send_to(payload, &self.server_path)
            .await
            .map_err(|e| DispatchError::io_with_path(e, &self.server_path))?;

        if sent != payload.len() {
            return Err(DispatchError::Other(format!(
                "short datagram write: {} of {} bytes",
                sent,
                payload.len()
            )));
        }
        Ok(())
    }

    /// Path this client is bound to.
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Path frames are sent to.
    pub fn server_path(&self) -> &Path {
        &self.server_path
    }
}

impl Drop for DispatchClient {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local_path);
    }
}
