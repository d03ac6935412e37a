//! trafficd core - local datagram dispatch for vehicle-count inference.
//!
//! Co-located processes send fixed-size binary frames to a Unix datagram
//! socket. The server decodes each frame, runs the classifier on the image it
//! names, and publishes the outcome to a message bus. Callers never get a
//! reply on the socket; the bus is the only place results show up.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trafficd_core::{
//!     DispatchServer, HttpMessageBus, ResultPublisher, ServerConfig, SimulatedClassifier,
//! };
//!
//! #[tokio::main]
//! async fn main() -> trafficd_core::Result<()> {
//!     let bus = Arc::new(HttpMessageBus::new("http://127.0.0.1:8085")?);
//!     let publisher = ResultPublisher::new(bus, "traffic-results");
//!     let server = DispatchServer::new(
//!         ServerConfig::from_env()?,
//!         Arc::new(SimulatedClassifier::new()),
//!         publisher,
//!     );
//!
//!     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod inference;
pub mod publish;
pub mod server;
pub mod wire;

pub use config::{PublishConfig, ServerConfig, ServerDefaults, WireConfig};
pub use error::{DispatchError, Result};
pub use inference::{Classification, Classifier, InferenceError, SimulatedClassifier};
pub use publish::{
    upload_file, Backoff, BlobStore, FailureReason, HttpBlobStore, HttpMessageBus, LogBus,
    MemoryBlobStore, MemoryBus, MessageBus, Outcome, PublishEnvelope, ResultPublisher,
};
pub use server::{DispatchServer, DispatchServerHandle, ServerStats, StatsSnapshot};
pub use wire::{decode, encode_error_notice, DecodeError, DispatchClient, MessageKind, RequestFrame};
