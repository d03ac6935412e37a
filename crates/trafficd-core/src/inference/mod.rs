//! Vehicle-count classification capability.
//!
//! The server treats classification as an opaque, synchronous and possibly
//! slow call. Implementations receive the raw image bytes and the format tag
//! the caller sent, and return a vehicle count with a confidence score.

mod simulated;

pub use simulated::SimulatedClassifier;

use thiserror::Error;

/// Classification result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub count: u32,
    /// In `[0, 1]`.
    pub confidence: f64,
}

/// Classification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    #[error("Invalid image format: {format}")]
    InvalidFormat { format: String },

    /// The model failed or the call did not complete.
    #[error("Model error: {0}")]
    Model(String),
}

/// A synchronous classifier.
///
/// Called from the blocking thread pool, so implementations may block.
pub trait Classifier: Send + Sync + 'static {
    fn classify(&self, image: &[u8], format: &str) -> Result<Classification, InferenceError>;
}

impl<F> Classifier for F
where
    F: Fn(&[u8], &str) -> Result<Classification, InferenceError> + Send + Sync + 'static,
{
    fn classify(&self, image: &[u8], format: &str) -> Result<Classification, InferenceError> {
        self(image, format)
    }
}
