//! Consumer pipeline: broker records in, decoded records out.

use kafka_types::{extract_schema_id, RawRecord};
use schema_bridge_registry::SchemaRegistryClient;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connect_broker;
use crate::batch::BatchAccumulator;
use crate::broker::BrokerClient;
use crate::config::ConsumerConfig;
use crate::error::{Error, Result};
use crate::evolution::EvolutionTracker;
use crate::liveness::LivenessMonitor;
use crate::metrics::PerformanceMonitor;
use crate::output::{
    Artifact, EmissionSender, ErrorArtifact, OutputPort, OutputRouter, RawMetadata, SuccessRecord,
};
use crate::resolver::{SchemaBinding, SchemaResolver};
use crate::status::{PipelineRole, PipelineState, StatusReporter};

/// What happened to a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Emitted on its own to the primary output.
    Emitted,
    /// Added to the open batch; carries the records now buffered.
    Batched { pending: usize },
    /// Failed, and the error artifact went to this output.
    Failed(OutputPort),
    /// Failed, and was dropped because invalid records are skipped.
    Skipped,
}

pub struct ConsumerPipeline<B: ?Sized, R: ?Sized> {
    config: ConsumerConfig,
    subject: String,
    broker: Arc<B>,
    registry: Arc<R>,
    resolver: SchemaResolver<R>,
    tracker: Option<EvolutionTracker>,
    monitor: Option<PerformanceMonitor>,
    batch: Option<BatchAccumulator>,
    router: OutputRouter,
    status: StatusReporter,
    liveness: Option<LivenessMonitor>,
    closed: bool,
}

impl<B, R> ConsumerPipeline<B, R>
where
    B: BrokerClient + ?Sized + 'static,
    R: SchemaRegistryClient + ?Sized + 'static,
{
    pub fn new(
        config: ConsumerConfig,
        broker: Arc<B>,
        registry: Arc<R>,
        outputs: EmissionSender,
    ) -> Self {
        let status = StatusReporter::new(PipelineRole::Consumer);
        let router = OutputRouter::new(outputs, config.dual_output);
        let resolver = SchemaResolver::new(
            Arc::clone(&registry),
            config.auto_register,
            config.default_schema.clone(),
        );
        let batch = config.batching_enabled().then(|| {
            BatchAccumulator::new(
                config.batch_size,
                config.batch_timeout,
                router.clone(),
                status.clone(),
            )
        });
        let tracker = config
            .track_schema_evolution
            .then(|| EvolutionTracker::new(config.evolution_capacity));
        let monitor = config.enable_metrics.then(PerformanceMonitor::new);

        Self {
            subject: config.subject(),
            config,
            broker,
            registry,
            resolver,
            tracker,
            monitor,
            batch,
            router,
            status,
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

    pub fn evolution(&self) -> Option<&EvolutionTracker> {
        self.tracker.as_ref()
    }

    /// Resolve the schema and connect. On failure the pipeline is left in
    /// `Failed`; call [`close`](Self::close) to release what was acquired.
    pub async fn start(&mut self) -> Result<()> {
        let state = self.status.state();
        if state != PipelineState::Initializing {
            return Err(Error::NotReady(state));
        }
        if let Err(e) = self.try_start().await {
            error!("Consumer pipeline failed to start: {e}");
            self.status.fail(e.to_string());
            return Err(e);
        }
        Ok(())
    }

    async fn try_start(&mut self) -> Result<()> {
        self.config.validate()?;
        info!(
            "Starting consumer pipeline for topic {} (subject {})",
            self.config.topic, self.subject
        );

        self.status.transition(PipelineState::ResolvingSchema);
        let schema_id = self.resolver.resolve(&self.subject).await?;
        info!("Subject {} bound to schema id {schema_id}", self.subject);

        self.status.transition(PipelineState::ConnectingBroker);
        connect_broker(
            Arc::clone(&self.broker),
            Some((self.config.topic.clone(), self.config.start_position)),
        )
        .await?;

        self.status
            .update(|status| status.last_activity = Some(Instant::now()));
        self.status.transition(PipelineState::Ready);
        self.liveness = Some(LivenessMonitor::spawn(
            self.status.clone(),
            self.config.idle_threshold,
        ));
        Ok(())
    }

    /// Start, consume until `shutdown` fires or the broker fails, then close.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        if let Err(e) = self.start().await {
            self.close().await;
            return Err(e);
        }

        let broker = Arc::clone(&self.broker);
        let result = loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                received = broker.recv() => Some(received),
            };
            match next {
                None => {
                    info!("Shutdown requested; stopping consumer");
                    break Ok(());
                }
                Some(Ok(record)) => {
                    self.handle_record(record).await;
                }
                Some(Err(e)) => {
                    error!("Broker error while consuming: {e}");
                    self.status.fail(e.to_string());
                    break Err(e);
                }
            }
        };

        self.close().await;
        result
    }

    /// Process one record and route the outcome.
    pub async fn handle_record(&mut self, record: RawRecord) -> Disposition {
        let started = Instant::now();
        self.status.begin_processing(started);

        let outcome = self.process(&record, started).await;
        let succeeded = outcome.is_ok();
        let disposition = match outcome {
            Ok(success) => match &self.batch {
                Some(batch) => Disposition::Batched {
                    pending: batch.add(success).await,
                },
                None => {
                    self.router.emit(Artifact::Record(success));
                    Disposition::Emitted
                }
            },
            Err(artifact) if self.config.skip_invalid => {
                warn!(
                    "Skipping invalid record {}[{}]@{}: {}",
                    record.topic, record.partition, record.offset, artifact.message
                );
                Disposition::Skipped
            }
            Err(artifact) => Disposition::Failed(self.router.emit_error(artifact)),
        };

        self.refresh_annotations();
        self.status.end_processing(succeeded);
        disposition
    }

    async fn process(
        &mut self,
        record: &RawRecord,
        started: Instant,
    ) -> std::result::Result<SuccessRecord, ErrorArtifact> {
        // Evolution tracking is best effort and never fails the record
        if let (Some(tracker), Some(schema_id)) =
            (self.tracker.as_mut(), extract_schema_id(&record.value))
        {
            tracker.observe(schema_id, &*self.registry).await;
        }

        match self.registry.decode(&record.value).await {
            Ok(payload) => {
                let elapsed = started.elapsed();
                let processing_time_ms = self.monitor.as_mut().map(|monitor| {
                    monitor.record(elapsed);
                    elapsed.as_secs_f64() * 1000.0
                });
                let kafka_message = self.config.output_raw_message.then(|| RawMetadata {
                    record: record.metadata(),
                    processing_time_ms,
                });
                debug!(
                    "Decoded record {}[{}]@{}",
                    record.topic, record.partition, record.offset
                );
                Ok(SuccessRecord {
                    payload,
                    kafka_message,
                })
            }
            Err(e) => {
                let err = Error::from_decode(e);
                error!(
                    "Failed to decode record {}[{}]@{}: {err}",
                    record.topic, record.partition, record.offset
                );
                let processing_time_ms = self
                    .monitor
                    .is_some()
                    .then(|| started.elapsed().as_secs_f64() * 1000.0);
                Err(ErrorArtifact::for_record(&err, record, processing_time_ms))
            }
        }
    }

    fn refresh_annotations(&self) {
        let performance = self.monitor.as_ref().map(PerformanceMonitor::snapshot);
        let schema_count = self.tracker.as_ref().map_or(0, EvolutionTracker::len);
        self.status.update(|status| {
            status.performance = performance;
            status.schema_count = schema_count;
        });
    }

    /// Flush pending work and release every resource. Idempotent.
    ///
    /// A pipeline that failed stays in `Failed`; otherwise it ends in `Closed`.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let failed = self.status.state() == PipelineState::Failed;
        if !failed {
            self.status.transition(PipelineState::Closing);
        }

        if let Some(batch) = &self.batch {
            if let Some(flushed) = batch.flush().await {
                info!("Flushed {flushed} pending records on close");
            }
        }
        if let Some(liveness) = self.liveness.take() {
            liveness.stop().await;
        }
        if let Err(e) = self.broker.disconnect().await {
            warn!("Error disconnecting from Kafka: {e}");
        }

        let summary = self.status.snapshot();
        info!(
            "Consumer pipeline for topic {} closed after {} messages ({} errors)",
            self.config.topic, summary.message_count, summary.error_count
        );

        self.resolver.invalidate();
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.clear();
        }
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.reset();
        }
        self.status.reset_counters();

        if !failed {
            self.status.transition(PipelineState::Closed);
        }
    }
}
