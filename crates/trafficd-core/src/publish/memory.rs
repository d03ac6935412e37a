//! In-process buses and blob store.
//!
//! [`MemoryBus`] and [`MemoryBlobStore`] back the tests. [`LogBus`] is what
//! `trafficd serve` publishes to when no bus URL is configured.

use super::{BlobStore, MessageBus, PublishEnvelope};
use crate::{DispatchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::info;

/// Records every acknowledged payload in memory.
#[derive(Debug, Default)]
pub struct MemoryBus {
    messages: Mutex<Vec<(String, Bytes)>>,
    pending_failures: AtomicU32,
    published: Notify,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publishes fail with a retryable error.
    pub fn fail_next(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Number of acknowledged messages.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Topic of each acknowledged message, in order.
    pub fn topics(&self) -> Vec<String> {
        self.lock().iter().map(|(topic, _)| topic.clone()).collect()
    }

    /// Decoded envelopes in acknowledgment order. Payloads that are not
    /// envelopes are skipped.
    pub fn envelopes(&self) -> Vec<PublishEnvelope> {
        self.lock()
            .iter()
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }

    /// Wait until at least `count` messages were acknowledged or `timeout`
    /// passes, then return what arrived.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<PublishEnvelope> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.published.notified();
            if self.len() >= count {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }
        self.envelopes()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Bytes)>> {
        // A poisoned lock only means a test panicked mid-push; the data is still usable.
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String> {
        if self.take_failure() {
            return Err(DispatchError::Publish {
                message: "injected bus failure".to_string(),
                retryable: true,
            });
        }

        info!(
            "Message on {}: {}",
            topic,
            String::from_utf8_lossy(&payload)
        );

        let message_id = {
            let mut messages = self.lock();
            messages.push((topic.to_string(), payload));
            messages.len().to_string()
        };
        self.published.notify_waiters();
        Ok(message_id)
    }
}

/// Acknowledges every payload after logging it. Nothing is retained.
#[derive(Debug, Default)]
pub struct LogBus {
    sequence: AtomicU64,
}

impl LogBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for LogBus {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<String> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            topic,
            sequence,
            "Published {}",
            String::from_utf8_lossy(&payload)
        );
        Ok(format!("local-{}", sequence))
    }
}

/// Keeps uploaded objects in a map keyed by bucket and name.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<(String, String), Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes stored under `bucket`/`name`, if any.
    pub fn get(&self, bucket: &str, name: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(bucket.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, bucket: &str, name: &str, data: Bytes) -> Result<()> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((bucket.to_string(), name.to_string()), data);
        Ok(())
    }
}
