//! Producer pipeline: JSON in, schema-encoded messages out.

use chrono::Utc;
use kafka_types::{Headers, OutboundMessage};
use schema_bridge_registry::SchemaRegistryClient;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connect_broker;
use crate::broker::BrokerClient;
use crate::config::ProducerConfig;
use crate::error::{Error, Result};
use crate::liveness::LivenessMonitor;
use crate::output::{
    Artifact, EmissionSender, ErrorArtifact, OutputRouter, PublishReport, ValidationReport,
};
use crate::resolver::{SchemaBinding, SchemaResolver};
use crate::status::{PipelineRole, PipelineState, StatusReporter};

/// Message body handed to the producer.
#[derive(Debug, Clone, PartialEq)]
pub enum InputPayload {
    Json(JsonValue),
    /// Text that must parse as JSON
    Text(String),
}

/// One message to publish, with optional per-message overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerInput {
    pub payload: InputPayload,
    /// Defaults to the payload's `id` field
    pub key: Option<String>,
    pub headers: Headers,
    /// Milliseconds since epoch; defaults to the publish time
    pub timestamp: Option<i64>,
}

impl ProducerInput {
    pub fn json(value: JsonValue) -> Self {
        Self::new(InputPayload::Json(value))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(InputPayload::Text(text.into()))
    }

    fn new(payload: InputPayload) -> Self {
        Self {
            payload,
            key: None,
            headers: Headers::new(),
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The input as it is reported back in error artifacts.
    fn original(&self) -> JsonValue {
        match &self.payload {
            InputPayload::Json(value) => value.clone(),
            InputPayload::Text(text) => JsonValue::String(text.clone()),
        }
    }
}

type Produced = std::result::Result<Artifact, (Error, ErrorArtifact)>;

pub struct ProducerPipeline<B: ?Sized, R: ?Sized> {
    config: ProducerConfig,
    subject: String,
    broker: Arc<B>,
    registry: Arc<R>,
    resolver: SchemaResolver<R>,
    router: OutputRouter,
    status: StatusReporter,
    liveness: Option<LivenessMonitor>,
    closed: bool,
}

impl<B, R> ProducerPipeline<B, R>
where
    B: BrokerClient + ?Sized + 'static,
    R: SchemaRegistryClient + ?Sized + 'static,
{
    pub fn new(
        config: ProducerConfig,
        broker: Arc<B>,
        registry: Arc<R>,
        outputs: EmissionSender,
    ) -> Self {
        let resolver = SchemaResolver::new(
            Arc::clone(&registry),
            config.auto_register,
            config.default_schema.clone(),
        );
        Self {
            subject: config.subject(),
            router: OutputRouter::new(outputs, config.dual_output),
            config,
            broker,
            registry,
            resolver,
            status: StatusReporter::new(PipelineRole::Producer),
            liveness: None,
            closed: false,
        }
    }

    pub fn status(&self) -> &StatusReporter {
        &self.status
    }

    pub fn binding(&self) -> Option<&SchemaBinding> {
        self.resolver.binding()
    }

    /// Warm the schema cache and connect.
    ///
    /// A schema that cannot be resolved yet is not fatal here; every message
    /// resolves again until a binding is cached.
    pub async fn start(&mut self) -> Result<()> {
        let state = self.status.state();
        if state != PipelineState::Initializing {
            return Err(Error::NotReady(state));
        }
        if let Err(e) = self.try_start().await {
            error!("Producer pipeline failed to start: {e}");
            self.status.fail(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn try_start(&mut self) -> Result<()> {
        self.config.validate()?;
        info!(
            "Starting producer pipeline for topic {} (subject {})",
            self.config.topic, self.subject
        );

        self.status.transition(PipelineState::ResolvingSchema);
        match self.resolver.resolve(&self.subject).await {
            Ok(schema_id) => info!("Subject {} bound to schema id {schema_id}", self.subject),
            Err(e) => warn!("Schema for subject {} not resolved yet: {e}", self.subject),
        }

        self.status.transition(PipelineState::ConnectingBroker);
        connect_broker(Arc::clone(&self.broker), None).await?;

        self.status
            .update(|status| status.last_activity = Some(Instant::now()));
        self.status.transition(PipelineState::Ready);
        self.liveness = Some(LivenessMonitor::spawn(
            self.status.clone(),
            self.config.idle_threshold,
        ));
        Ok(())
    }

    /// Start, publish every input until the channel closes or `shutdown`
    /// fires, then close.
    pub async fn run(
        &mut self,
        mut inputs: mpsc::Receiver<ProducerInput>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        if let Err(e) = self.start().await {
            self.close().await;
            return Err(e);
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                input = inputs.recv() => input,
            };
            let Some(input) = next else {
                break;
            };
            if let Err(e) = self.handle(input).await {
                debug!("Message not published: {e}");
            }
        }

        self.close().await;
        Ok(())
    }

    /// Encode and publish one input.
    ///
    /// Failures are emitted as error artifacts and also returned. Inputs that
    /// arrive before the pipeline is ready are discarded.
    pub async fn handle(&mut self, input: ProducerInput) -> Result<Artifact> {
        let state = self.status.state();
        if !state.is_operational() {
            warn!("Producer not ready (state {state}); discarding message");
            return Err(Error::NotReady(state));
        }

        self.status.begin_processing(Instant::now());
        let outcome = match self.produce(&input).await {
            Ok(artifact) => {
                self.router.emit(artifact.clone());
                Ok(artifact)
            }
            Err((err, artifact)) => {
                error!("Failed to produce message to {}: {err}", self.config.topic);
                self.router.emit_error(artifact);
                Err(err)
            }
        };
        self.status.end_processing(outcome.is_ok());
        outcome
    }

    async fn produce(&mut self, input: &ProducerInput) -> Produced {
        let schema_id = match self.resolver.resolve(&self.subject).await {
            Ok(id) => id,
            Err(e) => {
                let artifact = ErrorArtifact::for_input(&e, input.original());
                return Err((e, artifact));
            }
        };

        let data = match &input.payload {
            InputPayload::Json(value) => value.clone(),
            InputPayload::Text(text) => match serde_json::from_str(text) {
                Ok(value) => value,
                Err(e) => {
                    let err = Error::PayloadParse(e.to_string());
                    let artifact = ErrorArtifact::for_input(&err, input.original());
                    return Err((err, artifact));
                }
            },
        };

        let encoded = match self.registry.encode(schema_id, &data).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = Error::from_encode(e);
                let artifact = ErrorArtifact::for_data(&err, data);
                return Err((err, artifact));
            }
        };

        if self.config.validate_only {
            debug!("Validated message against schema {schema_id} ({} bytes)", encoded.len());
            return Ok(Artifact::Validated {
                payload: ValidationReport {
                    validated: true,
                    schema_id,
                    original_data: data,
                    encoded_size: encoded.len(),
                },
            });
        }

        let message = OutboundMessage {
            key: input.key.clone().or_else(|| key_from_payload(&data)),
            value: encoded,
            headers: input.headers.clone(),
            timestamp: Some(
                input
                    .timestamp
                    .unwrap_or_else(|| Utc::now().timestamp_millis()),
            ),
        };

        match self.broker.send(&self.config.topic, vec![message]).await {
            Ok(kafka_result) => Ok(Artifact::Published {
                payload: PublishReport {
                    success: true,
                    schema_id,
                    kafka_result,
                    original_data: data,
                    topic: self.config.topic.clone(),
                },
            }),
            Err(e) => {
                let err = match e {
                    Error::Send(_) => e,
                    other => Error::Send(other.to_string()),
                };
                let artifact = ErrorArtifact::for_input(&err, input.original());
                Err((err, artifact))
            }
        }
    }

    /// Release every resource. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let failed = self.status.state() == PipelineState::Failed;
        if !failed {
            self.status.transition(PipelineState::Closing);
        }

        if let Some(liveness) = self.liveness.take() {
            liveness.stop().await;
        }
        if let Err(e) = self.broker.disconnect().await {
            warn!("Error disconnecting from Kafka: {e}");
        }

        let summary = self.status.snapshot();
        info!(
            "Producer pipeline for topic {} closed after {} messages ({} errors)",
            self.config.topic, summary.message_count, summary.error_count
        );

        self.resolver.invalidate();
        self.status.reset_counters();

        if !failed {
            self.status.transition(PipelineState::Closed);
        }
    }
}

fn key_from_payload(data: &JsonValue) -> Option<String> {
    match data.get("id")? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
