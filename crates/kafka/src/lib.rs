//! Schema-aware Kafka pipelines for `schema-bridge`.
//!
//! Two pipelines share one lifecycle and one error model:
//!
//! - [`ConsumerPipeline`] reads schema-tagged records, decodes them through a
//!   schema registry and emits JSON records, optionally in batches
//! - [`ProducerPipeline`] encodes JSON messages with the subject's schema and
//!   publishes them
//!
//! Per-record failures become error artifacts routed to the primary or the
//! secondary output (see [`output::OutputRouter`]); they never stop a
//! pipeline.

/// Broker client seam and the librdkafka implementation
pub mod broker;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod status;
/// In-memory broker and registry for tests
pub mod testing;

/// Record batching by size and time window
pub mod batch;
pub mod evolution;
pub mod liveness;
pub mod metrics;
pub mod resolver;

// Re-export main types for easy access
pub use broker::{BrokerClient, ConsumerSettings, ProducerSettings, RdkafkaBroker};
pub use config::{BrokerOpts, ConsumerConfig, ProducerConfig};
pub use error::{Error, ErrorKind, Result};
pub use output::{Artifact, Emission, EmissionReceiver, EmissionSender, ErrorArtifact, OutputPort};
pub use pipeline::{ConsumerPipeline, Disposition, InputPayload, ProducerInput, ProducerPipeline};
pub use status::{PipelineState, PipelineStatus, StatusReporter};
