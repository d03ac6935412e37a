//! Routing of decoded frames to the classifier and the publisher.

use super::stats::ServerStats;
use crate::inference::{Classification, Classifier, InferenceError};
use crate::publish::{FailureReason, Outcome, ResultPublisher};
use crate::wire::{MessageKind, RequestFrame};
use crate::{DispatchError, Result};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Turns one frame into one published outcome.
#[derive(Clone)]
pub struct Dispatcher {
    classifier: Arc<dyn Classifier>,
    publisher: ResultPublisher,
    stats: Arc<ServerStats>,
}

impl Dispatcher {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        publisher: ResultPublisher,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            classifier,
            publisher,
            stats,
        }
    }

    /// Process a frame and publish its outcome.
    ///
    /// Returns once the bus acknowledged the envelope or the publish policy
    /// gave up.
    pub async fn handle(&self, frame: RequestFrame) -> Result<String> {
        let outcome = self.process(frame).await;
        debug!("Publishing outcome for message {}", outcome.id());

        match self.publisher.publish(outcome).await {
            Ok(message_id) => {
                self.stats.record_published();
                Ok(message_id)
            }
            Err(e) => {
                self.stats.record_publish_failure();
                Err(e)
            }
        }
    }

    /// Route a frame by kind. Never fails: every problem becomes a failure
    /// outcome.
    pub async fn process(&self, frame: RequestFrame) -> Outcome {
        let id = frame.id;
        // Route on the wire byte so `Unknown(1)` behaves like the Infer it encodes as.
        match frame.kind.as_u8() {
            MessageKind::INFER => match self.infer(&frame).await {
                Ok(classification) => {
                    info!(id, count = classification.count, "Ran inference for message {}", id);
                    Outcome::success(id, classification)
                }
                Err(e) => {
                    error!(id, error = %e, "Inference for message {} failed", id);
                    Outcome::failure(id, FailureReason::InferenceFailed)
                }
            },
            kind => {
                let err = DispatchError::InvalidMessage { id, kind };
                error!(id, "{}", err);
                Outcome::failure(id, FailureReason::InvalidMessage)
            }
        }
    }

    async fn infer(&self, frame: &RequestFrame) -> Result<Classification> {
        let path = frame.image_path();
        let image = tokio::fs::read(&path)
            .await
            .map_err(|e| DispatchError::io_with_path(e, &path))?;

        let format = frame.format_tag().into_owned();
        debug!(id = frame.id, "Running inference on {} ({})", path.display(), format);

        let classifier = self.classifier.clone();
        let classification = tokio::task::spawn_blocking(move || classifier.classify(&image, &format))
            .await
            .map_err(|e| InferenceError::Model(format!("classifier task failed: {}", e)))??;

        Ok(classification)
    }
}
