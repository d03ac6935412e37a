//! Server counters.

use crate::DispatchError;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the listener and the workers.
#[derive(Debug, Default)]
pub struct ServerStats {
    received: AtomicU64,
    decode_errors: AtomicU64,
    unbound_senders: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub decode_errors: u64,
    pub unbound_senders: u64,
    pub published: u64,
    pub publish_failures: u64,
}

impl StatsSnapshot {
    /// Frames that made it past decoding.
    ///
    /// The counters are loaded one at a time, so a snapshot taken while the
    /// listener is busy can see a drop before the matching receive.
    pub fn accepted(&self) -> u64 {
        self.received
            .saturating_sub(self.decode_errors)
            .saturating_sub(self.unbound_senders)
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a datagram dropped by the listener under the matching counter.
    pub(crate) fn record_dropped(&self, err: &DispatchError) {
        let counter = match err {
            DispatchError::UnboundSender => &self.unbound_senders,
            _ => &self.decode_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            unbound_senders: self.unbound_senders.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}
