//! Stand-in classifier with randomized latency and results.

use super::{Classification, Classifier, InferenceError};
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;

/// Simulates a slow model.
///
/// Rejects formats outside its allow-set before doing anything else, then
/// sleeps for a random duration in `[min_delay, max_delay)` and returns a
/// random count in `0..=max_count`.
#[derive(Debug, Clone)]
pub struct SimulatedClassifier {
    formats: HashSet<String>,
    min_delay: Duration,
    max_delay: Duration,
    max_count: u32,
}

impl Default for SimulatedClassifier {
    fn default() -> Self {
        Self {
            formats: ["jpg", "png"].iter().map(|f| f.to_string()).collect(),
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
            max_count: 35,
        }
    }
}

impl SimulatedClassifier {
    /// Default delay range and the jpg and png formats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep a random duration in `min..max` per call.
    pub fn with_delay(mut self, min: Duration, max: Duration) -> Self {
        self.min_delay = min;
        self.max_delay = max.max(min);
        self
    }

    /// Replace the accepted format tags.
    pub fn with_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.formats = formats.into_iter().map(Into::into).collect();
        self
    }

    /// Whether `format` is one of the accepted tags.
    pub fn accepts(&self, format: &str) -> bool {
        self.formats.contains(format)
    }

    fn delay(&self) -> Duration {
        if self.max_delay <= self.min_delay {
            return self.min_delay;
        }
        let mut rng = rand::rng();
        rng.random_range(self.min_delay..self.max_delay)
    }
}

impl Classifier for SimulatedClassifier {
    fn classify(&self, _image: &[u8], format: &str) -> Result<Classification, InferenceError> {
        if !self.accepts(format) {
            return Err(InferenceError::InvalidFormat {
                format: format.to_string(),
            });
        }

        std::thread::sleep(self.delay());

        let mut rng = rand::rng();
        Ok(Classification {
            count: rng.random_range(0..=self.max_count),
            confidence: rng.random::<f64>(),
        })
    }
}
