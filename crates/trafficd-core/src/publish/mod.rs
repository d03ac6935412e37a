//! Result delivery to the message bus and artifact uploads.
//!
//! Every processed frame produces exactly one [`Outcome`]. The
//! [`ResultPublisher`] turns it into a [`PublishEnvelope`], hands the JSON
//! form to a [`MessageBus`], and waits for the acknowledgment before
//! returning. Transient bus failures are retried with [`Backoff`].
//!
//! The bus and blob store are traits so the server can be built against
//! HTTP endpoints in production and in-memory fakes in tests.

mod http;
mod memory;
pub mod retry;

pub use http::{HttpBlobStore, HttpMessageBus};
pub use memory::{LogBus, MemoryBlobStore, MemoryBus};
pub use retry::{with_backoff, AttemptReport, Backoff};

use crate::inference::Classification;
use crate::{DispatchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Why a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureReason {
    /// The image could not be read or the classifier rejected it.
    InferenceFailed,
    /// The frame kind is not an inference request.
    InvalidMessage,
}

impl FailureReason {
    /// Text published to the bus for this reason.
    pub fn message(self) -> &'static str {
        match self {
            FailureReason::InferenceFailed => "Inference failed",
            FailureReason::InvalidMessage => "Invalid message",
        }
    }
}

/// The result of processing one request frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        id: u16,
        count: u32,
        confidence: f64,
    },
    Failure {
        id: u16,
        reason: FailureReason,
        detail: String,
    },
}

impl Outcome {
    pub fn success(id: u16, classification: Classification) -> Self {
        Outcome::Success {
            id,
            count: classification.count,
            confidence: classification.confidence,
        }
    }

    pub fn failure(id: u16, reason: FailureReason) -> Self {
        Outcome::Failure {
            id,
            reason,
            detail: reason.message().to_string(),
        }
    }

    pub fn id(&self) -> u16 {
        match self {
            Outcome::Success { id, .. } | Outcome::Failure { id, .. } => *id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Serialized form of an [`Outcome`] on the bus.
///
/// ```text
/// {"kind":"result","id":7,"count":12,"confidence":0.81}
/// {"kind":"error","id":7,"message":"Inference failed"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PublishEnvelope {
    Result { id: u16, count: u32, confidence: f64 },
    Error { id: u16, message: String },
}

impl PublishEnvelope {
    pub fn id(&self) -> u16 {
        match self {
            PublishEnvelope::Result { id, .. } | PublishEnvelope::Error { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PublishEnvelope::Result { .. } => "result",
            PublishEnvelope::Error { .. } => "error",
        }
    }
}

impl From<Outcome> for PublishEnvelope {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success {
                id,
                count,
                confidence,
            } => PublishEnvelope::Result {
                id,
                count,
                confidence,
            },
            Outcome::Failure { id, detail, .. } => PublishEnvelope::Error {
                id,
                message: detail,
            },
        }
    }
}

/// An at-least-once message bus.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Deliver one payload and wait for the acknowledgment.
    ///
    /// Returns the message id the bus assigned.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String>;
}

/// Object storage for auxiliary artifacts.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn upload(&self, bucket: &str, name: &str, data: Bytes) -> Result<()>;
}

/// Publishes outcomes and uploads artifacts.
#[derive(Clone)]
pub struct ResultPublisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
    store: Option<(Arc<dyn BlobStore>, String)>,
    backoff: Backoff,
}

impl ResultPublisher {
    /// Publish to `topic` on `bus`, with no blob store and default retries.
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
            store: None,
            backoff: Backoff::default(),
        }
    }

    /// Store used by [`ResultPublisher::upload_artifact`].
    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>, bucket: impl Into<String>) -> Self {
        self.store = Some((store, bucket.into()));
        self
    }

    /// Retry policy for each publish.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Topic every outcome is published to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one outcome and wait for the bus to acknowledge it.
    ///
    /// Takes the outcome by value: each one is published at most once.
    pub async fn publish(&self, outcome: Outcome) -> Result<String> {
        let envelope = PublishEnvelope::from(outcome);
        let payload = Bytes::from(serde_json::to_vec(&envelope)?);

        let (result, report) = with_backoff(
            &self.backoff,
            || self.bus.publish(&self.topic, payload.clone()),
            DispatchError::is_retryable,
        )
        .await;

        let message_id = result?;
        info!(
            id = envelope.id(),
            kind = envelope.kind(),
            attempts = report.attempts,
            "Published message {} to {}",
            message_id,
            self.topic
        );
        Ok(message_id)
    }

    /// Upload a local file to the configured bucket under its base name.
    pub async fn upload_artifact(&self, path: impl AsRef<Path>) -> Result<()> {
        let (store, bucket) = self.store.as_ref().ok_or_else(|| DispatchError::Config {
            message: "no blob store configured".to_string(),
        })?;
        upload_file(store.as_ref(), bucket, path).await
    }
}

/// Upload a local file to `bucket` under its base name.
pub async fn upload_file(store: &dyn BlobStore, bucket: &str, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DispatchError::Upload {
            name: path.display().to_string(),
            message: "path has no usable file name".to_string(),
        })?;

    let data = tokio::fs::read(path)
        .await
        .map_err(|e| DispatchError::io_with_path(e, path))?;
    debug!("Uploading {} ({} bytes) to {}", name, data.len(), bucket);

    store.upload(bucket, name, Bytes::from(data)).await?;
    info!("File uploaded to {}: {}", bucket, name);
    Ok(())
}
