//! Datagram dispatch server.
//!
//! One listener task owns the bound socket, decodes each datagram and pushes
//! accepted frames into a bounded queue. A fixed pool of workers takes frames
//! off the queue; each worker fully processes and publishes one frame before
//! taking the next, so with a single worker requests are handled strictly in
//! arrival order.
//!
//! # Shutdown
//!
//! When the shutdown future resolves the listener stops receiving and closes
//! the queue. Workers finish what is already queued (bounded by the
//! configured grace period) and the socket path is removed. The path is also
//! removed if the listener fails or the server task is aborted.

mod dispatcher;
mod socket;
mod stats;

pub use dispatcher::Dispatcher;
pub use socket::SocketGuard;
pub use stats::{ServerStats, StatsSnapshot};

use crate::config::{ServerConfig, WireConfig};
use crate::inference::Classifier;
use crate::publish::ResultPublisher;
use crate::wire::{decode, RequestFrame};
use crate::{DispatchError, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::unix::SocketAddr;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

type FrameQueue = Arc<Mutex<mpsc::Receiver<RequestFrame>>>;

/// Handle to a server running in the background. Dropping it stops the
/// server and removes the socket path.
pub struct DispatchServerHandle {
    socket_path: PathBuf,
    stats: Arc<ServerStats>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<Result<()>>>,
}

impl DispatchServerHandle {
    /// Path the server is bound to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Counters at the time of the call.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask the server to stop receiving. Queued frames are still processed.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Shut down and wait for the server task to finish.
    pub async fn stop(mut self) -> Result<()> {
        self.shutdown();
        match self.task_handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| DispatchError::Other(format!("server task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for DispatchServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// The dispatch server and its injected collaborators.
pub struct DispatchServer {
    config: ServerConfig,
    dispatcher: Dispatcher,
    stats: Arc<ServerStats>,
}

impl DispatchServer {
    pub fn new(
        config: ServerConfig,
        classifier: Arc<dyn Classifier>,
        publisher: ResultPublisher,
    ) -> Self {
        let stats = Arc::new(ServerStats::new());
        let dispatcher = Dispatcher::new(classifier, publisher, stats.clone());
        Self {
            config,
            dispatcher,
            stats,
        }
    }

    /// Shared counters, live for the lifetime of the server.
    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Bind the socket and serve in a background task.
    ///
    /// The socket is bound before this returns, so callers can send
    /// immediately.
    pub async fn start(self) -> Result<DispatchServerHandle> {
        self.config.validate()?;
        let guard = SocketGuard::bind(&self.config.socket_path)?;
        info!("Bound to {}", guard.path().display());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let socket_path = guard.path().to_path_buf();
        let stats = self.stats.clone();

        let task_handle = tokio::spawn(async move {
            self.serve(guard, async move {
                let _ = shutdown_rx.await;
            })
            .await
        });

        Ok(DispatchServerHandle {
            socket_path,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    /// Bind the socket and serve until `shutdown` resolves or the listener
    /// fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        self.config.validate()?;
        let guard = SocketGuard::bind(&self.config.socket_path)?;
        info!("Bound to {}", guard.path().display());
        self.serve(guard, shutdown).await
    }

    async fn serve<F>(self, guard: SocketGuard, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let (tx, rx) = mpsc::channel::<RequestFrame>(self.config.queue_capacity);
        let queue: FrameQueue = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers {
            workers.spawn(Self::worker_loop(
                worker,
                queue.clone(),
                self.dispatcher.clone(),
            ));
        }
        info!(
            workers = self.config.workers,
            queue = self.config.queue_capacity,
            wire_version = WireConfig::WIRE_VERSION,
            "Dispatch server started"
        );

        // `tx` moves into the listener; the queue closes when it returns.
        let result = Self::listen(&guard, tx, &self.stats, shutdown).await;
        if let Err(e) = &result {
            error!("Listener stopped: {}", e);
        }

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Workers still busy after {:?}, abandoning queued frames",
                self.config.shutdown_grace
            );
            workers.abort_all();
        }

        info!("Dispatch server stopped");
        drop(guard);
        result
    }

    async fn listen<F>(
        guard: &SocketGuard,
        tx: mpsc::Sender<RequestFrame>,
        stats: &ServerStats,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        // One spare byte so oversized datagrams show up as a length mismatch
        // instead of being silently truncated to a valid size.
        let mut buf = vec![0u8; WireConfig::FRAME_LEN + 1];

        loop {
            let (len, addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                received = guard.socket().recv_from(&mut buf) => {
                    received.map_err(|e| DispatchError::io_with_path(e, guard.path()))?
                }
            };
            stats.record_received();

            let frame = match accept_datagram(&addr, &buf[..len]) {
                Ok(frame) => frame,
                Err(e) if e.is_recoverable() => {
                    stats.record_dropped(&e);
                    warn!("Dropped datagram: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            info!(
                id = frame.id,
                kind = %frame.kind,
                arg1 = %frame.image_path().display(),
                arg2 = %frame.format_tag(),
                "Received message"
            );

            // A full queue must not hide the shutdown request.
            let id = frame.id;
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, message {} was not queued", id);
                    return Ok(());
                }
                sent = tx.send(frame) => {
                    if sent.is_err() {
                        return Err(DispatchError::Other("all workers have stopped".to_string()));
                    }
                }
            }
        }
    }

    async fn worker_loop(worker: usize, queue: FrameQueue, dispatcher: Dispatcher) {
        debug!("Worker {} started", worker);
        loop {
            let next = queue.lock().await.recv().await;
            let Some(frame) = next else {
                break;
            };

            let id = frame.id;
            if let Err(e) = dispatcher.handle(frame).await {
                error!(id, worker, "Result for message {} was not published: {}", id, e);
            }
        }
        debug!("Worker {} stopped", worker);
    }
}

/// Accept a datagram from a named sender that decodes to a frame.
fn accept_datagram(addr: &SocketAddr, datagram: &[u8]) -> Result<RequestFrame> {
    if addr.as_pathname().is_none() {
        return Err(DispatchError::UnboundSender);
    }
    Ok(decode(datagram)?)
}
