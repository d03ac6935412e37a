//! End-to-end tests: real datagram sockets, in-memory bus.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use trafficd_core::{
    Backoff, Classification, Classifier, DispatchClient, DispatchServer, DispatchServerHandle,
    InferenceError, MemoryBus, MessageKind, PublishEnvelope, RequestFrame, ResultPublisher,
    ServerConfig, SimulatedClassifier, WireConfig,
};

const WAIT: Duration = Duration::from_secs(5);

/// Classifier returning a fixed answer for png/jpg and counting calls.
struct StubClassifier {
    calls: AtomicUsize,
}

impl Classifier for StubClassifier {
    fn classify(&self, _image: &[u8], format: &str) -> Result<Classification, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match format {
            "png" | "jpg" => Ok(Classification {
                count: 12,
                confidence: 0.81,
            }),
            other => Err(InferenceError::InvalidFormat {
                format: other.to_string(),
            }),
        }
    }
}

struct Harness {
    dir: TempDir,
    bus: Arc<MemoryBus>,
    classifier: Arc<StubClassifier>,
    handle: DispatchServerHandle,
    client: DispatchClient,
}

impl Harness {
    async fn start(workers: usize) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let socket_path = dir.path().join("trafficd.sock");

        let bus = Arc::new(MemoryBus::new());
        let classifier = Arc::new(StubClassifier {
            calls: AtomicUsize::new(0),
        });
        let publisher = ResultPublisher::new(bus.clone(), "traffic-results")
            .with_backoff(Backoff::none());

        let server = DispatchServer::new(
            ServerConfig::new(&socket_path).with_workers(workers),
            classifier.clone(),
            publisher,
        );
        let handle = server.start().await.expect("Failed to start server");
        let client = DispatchClient::bind(dir.path().join("client.sock"), &socket_path)
            .expect("Failed to bind client");

        Self {
            dir,
            bus,
            classifier,
            handle,
            client,
        }
    }

    fn image(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"fake image bytes").unwrap();
        path
    }

    fn socket_path(&self) -> &Path {
        self.handle.socket_path()
    }
}

#[tokio::test]
async fn test_infer_request_publishes_result() {
    let h = Harness::start(1).await;
    let image = h.image("a.png");

    h.client
        .send(&RequestFrame::infer(7, &image, "png"))
        .await
        .unwrap();

    let envelopes = h.bus.wait_for(1, WAIT).await;
    assert_eq!(
        envelopes,
        vec![PublishEnvelope::Result {
            id: 7,
            count: 12,
            confidence: 0.81
        }]
    );
}

#[tokio::test]
async fn test_unsupported_format_publishes_inference_failed() {
    let h = Harness::start(1).await;
    let image = h.image("a.gif");

    h.client
        .send(&RequestFrame::infer(21, &image, "gif"))
        .await
        .unwrap();

    let envelopes = h.bus.wait_for(1, WAIT).await;
    assert_eq!(
        envelopes,
        vec![PublishEnvelope::Error {
            id: 21,
            message: "Inference failed".to_string()
        }]
    );
}

#[tokio::test]
async fn test_unknown_kind_publishes_invalid_message_without_classifying() {
    let h = Harness::start(1).await;
    let image = h.image("a.png");

    let mut frame = RequestFrame::infer(33, &image, "png");
    frame.kind = MessageKind::from(99);
    h.client.send(&frame).await.unwrap();

    let envelopes = h.bus.wait_for(1, WAIT).await;
    assert_eq!(
        envelopes,
        vec![PublishEnvelope::Error {
            id: 33,
            message: "Invalid message".to_string()
        }]
    );
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_short_datagram_is_dropped_and_loop_continues() {
    let h = Harness::start(1).await;
    let image = h.image("a.png");

    h.client.send_raw(&[0u8; 10]).await.unwrap();
    h.client
        .send_raw(&vec![0u8; WireConfig::FRAME_LEN + 40])
        .await
        .unwrap();
    h.client
        .send(&RequestFrame::infer(8, &image, "jpg"))
        .await
        .unwrap();

    let envelopes = h.bus.wait_for(1, WAIT).await;
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].id(), 8);

    let stats = h.handle.stats();
    assert_eq!(stats.decode_errors, 2);
    assert_eq!(stats.received, 3);
}

#[tokio::test]
async fn test_overlong_prefix_is_dropped() {
    let h = Harness::start(1).await;

    let mut bytes = RequestFrame::infer(4, "/x.png", "png").encode().unwrap().to_vec();
    bytes[3 + 1 + WireConfig::ARG1_CAPACITY] = 200;
    h.client.send_raw(&bytes).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.bus.is_empty());
    assert_eq!(h.handle.stats().decode_errors, 1);
}

#[tokio::test]
async fn test_worker_pool_publishes_every_request_once() {
    let h = Harness::start(4).await;
    let image = h.image("a.png");

    for id in 0..20u16 {
        let format = if id % 3 == 0 { "gif" } else { "png" };
        h.client
            .send(&RequestFrame::infer(id, &image, format))
            .await
            .unwrap();
    }

    let envelopes = h.bus.wait_for(20, WAIT).await;
    assert_eq!(envelopes.len(), 20);

    let mut ids: Vec<u16> = envelopes.iter().map(|e| e.id()).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..20).collect::<Vec<_>>());

    for envelope in &envelopes {
        let expected = if envelope.id() % 3 == 0 { "error" } else { "result" };
        assert_eq!(envelope.kind(), expected);
    }
}

#[tokio::test]
async fn test_stop_removes_socket_path() {
    let h = Harness::start(2).await;
    let path = h.socket_path().to_path_buf();
    assert!(path.exists());

    let Harness { handle, .. } = h;
    handle.stop().await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_run_until_removes_socket_after_shutdown() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.sock");
    let bus = Arc::new(MemoryBus::new());

    let server = DispatchServer::new(
        ServerConfig::new(&path),
        Arc::new(SimulatedClassifier::new().with_delay(Duration::ZERO, Duration::ZERO)),
        ResultPublisher::new(bus.clone(), "traffic-results"),
    );

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server_task = tokio::spawn(server.run_until(async move {
        let _ = rx.await;
    }));

    for _ in 0..50 {
        if path.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(path.exists());

    let image = dir.path().join("a.jpg");
    std::fs::write(&image, b"jpeg").unwrap();
    let client = DispatchClient::bind(dir.path().join("c.sock"), &path).unwrap();
    client
        .send(&RequestFrame::infer(1, &image, "jpg"))
        .await
        .unwrap();
    let envelopes = bus.wait_for(1, WAIT).await;
    assert_eq!(envelopes[0].kind(), "result");

    tx.send(()).unwrap();
    server_task.await.unwrap().unwrap();
    assert!(!path.exists());
}
