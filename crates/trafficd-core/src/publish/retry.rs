//! Bounded exponential backoff for bus deliveries.
//!
//! A publish that fails with a retryable error is attempted again after a
//! growing, jittered delay, up to `max_attempts` tries in total. The last
//! error is handed back to the caller unchanged.

use crate::config::PublishConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay schedule for repeated attempts.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trafficd_core::Backoff;
///
/// let backoff = Backoff::default()
///     .with_max_attempts(4)
///     .with_base_delay(Duration::from_millis(100))
///     .with_max_delay(Duration::from_millis(300))
///     .with_jitter(false);
///
/// assert_eq!(backoff.delay_for(0), Duration::from_millis(100));
/// assert_eq!(backoff.delay_for(1), Duration::from_millis(200));
/// assert_eq!(backoff.delay_for(2), Duration::from_millis(300));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Spread each delay over `[0.5, 1.5)` of its nominal value.
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: PublishConfig::RETRY_ATTEMPTS,
            base_delay: PublishConfig::RETRY_BASE_DELAY,
            max_delay: PublishConfig::RETRY_MAX_DELAY,
            jitter: true,
        }
    }
}

impl Backoff {
    /// A single attempt, never waits.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Total attempts, including the first. Zero is treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Wait after the first failure; later waits double from here.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Upper bound on any single wait.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Spread each wait by up to half its length in either direction.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait before retry number `retry` (0 is the wait after the first failure).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let nominal = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);

        if !self.jitter {
            return nominal;
        }

        let factor = rand::rng().random_range(0.5..1.5);
        nominal.mul_f64(factor).min(self.max_delay)
    }
}

/// What happened across the attempts of one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptReport {
    pub attempts: u32,
    pub waited: Duration,
    pub last_error: Option<String>,
}

/// Run `operation` until it succeeds, returns a non-retryable error, or the
/// attempts run out.
pub async fn with_backoff<F, Fut, T, E>(
    backoff: &Backoff,
    mut operation: F,
    is_retryable: impl Fn(&E) -> bool,
) -> (Result<T, E>, AttemptReport)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = backoff.max_attempts.max(1);
    let mut report = AttemptReport::default();

    loop {
        report.attempts += 1;

        let err = match operation().await {
            Ok(value) => {
                if report.attempts > 1 {
                    debug!("Succeeded on attempt {}", report.attempts);
                }
                return (Ok(value), report);
            }
            Err(err) => err,
        };

        report.last_error = Some(err.to_string());

        if !is_retryable(&err) {
            debug!("Not retrying: {}", err);
            return (Err(err), report);
        }
        if report.attempts >= max_attempts {
            warn!("Giving up after {} attempts: {}", report.attempts, err);
            return (Err(err), report);
        }

        let delay = backoff.delay_for(report.attempts - 1);
        report.waited += delay;
        warn!(
            "Attempt {}/{} failed: {}. Retrying in {:?}",
            report.attempts, max_attempts, err, delay
        );
        tokio::time::sleep(delay).await;
    }
}
