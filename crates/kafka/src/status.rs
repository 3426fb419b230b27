//! Pipeline lifecycle state and the status surface.
//!
//! Every pipeline owns a [`StatusReporter`]. Its clones are handed to the
//! batch timer and the liveness task; observers call
//! [`StatusReporter::subscribe`] to follow changes.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, trace, warn};

use crate::metrics::PerformanceSnapshot;

/// Lifecycle states shared by both pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Initializing,
    ResolvingSchema,
    ConnectingBroker,
    Ready,
    Processing,
    Idle,
    Closing,
    Closed,
    Failed,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Closed | Failed, _) => false,
            (Closing, Closed) => true,
            (Closing, _) => false,
            (_, Failed | Closing) => true,
            (Initializing, ResolvingSchema | ConnectingBroker) => true,
            (ResolvingSchema, ConnectingBroker) => true,
            (ConnectingBroker, Ready) => true,
            (Ready, Processing | Idle) => true,
            (Processing, Ready) => true,
            (Idle, Processing) => true,
            _ => false,
        }
    }

    /// Whether the pipeline accepts work in this state.
    pub fn is_operational(self) -> bool {
        matches!(self, Self::Ready | Self::Processing | Self::Idle)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "initializing",
            Self::ResolvingSchema => "resolving_schema",
            Self::ConnectingBroker => "connecting_broker",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Idle => "idle",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Which side of the bridge a status belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineRole {
    Consumer,
    Producer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchFill {
    pub pending: usize,
    pub capacity: usize,
}

/// Observable status of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub role: PipelineRole,
    pub state: PipelineState,
    pub message_count: u64,
    pub error_count: u64,
    #[serde(skip)]
    pub last_activity: Option<Instant>,
    pub batch: Option<BatchFill>,
    pub performance: Option<PerformanceSnapshot>,
    pub schema_count: usize,
    pub failure: Option<String>,
}

impl PipelineStatus {
    pub fn new(role: PipelineRole) -> Self {
        Self {
            role,
            state: PipelineState::Initializing,
            message_count: 0,
            error_count: 0,
            last_activity: None,
            batch: None,
            performance: None,
            schema_count: 0,
            failure: None,
        }
    }

    /// One-line human readable status.
    pub fn text(&self) -> String {
        match self.state {
            PipelineState::Initializing => "Initializing".to_string(),
            PipelineState::ResolvingSchema => "Resolving schema".to_string(),
            PipelineState::ConnectingBroker => "Connecting to Kafka".to_string(),
            PipelineState::Ready if self.message_count == 0 && self.error_count == 0 => {
                "Ready".to_string()
            }
            PipelineState::Ready | PipelineState::Processing => self.active_text(),
            PipelineState::Idle => self.idle_text(),
            PipelineState::Closing => "Closing".to_string(),
            PipelineState::Closed => "Closed".to_string(),
            PipelineState::Failed => match &self.failure {
                Some(reason) => format!("Failed: {reason}"),
                None => "Failed".to_string(),
            },
        }
    }

    fn active_text(&self) -> String {
        let verb = match self.role {
            PipelineRole::Consumer => "Reading",
            PipelineRole::Producer => "Sending",
        };
        let mut text = format!("{verb} ({})", self.message_count);
        if let Some(perf) = self.performance.filter(|p| p.messages_per_sec > 0.0) {
            text.push_str(&format!(" - {:.1} msg/s", perf.messages_per_sec));
        }
        if self.error_count > 0 {
            text.push_str(&format!(" - {} errors", self.error_count));
        }
        if let Some(batch) = self.batch.filter(|b| b.pending > 0) {
            text.push_str(&format!(" - Batch: {}/{}", batch.pending, batch.capacity));
        }
        text
    }

    fn idle_text(&self) -> String {
        let mut text = match (self.message_count, self.error_count) {
            (0, 0) => "Idle".to_string(),
            (n, 0) => format!("Idle ({n} msgs)"),
            (n, e) => format!("Idle ({n} msgs, {e} errors)"),
        };
        if let Some(perf) = self.performance.filter(|p| p.message_count > 0) {
            text.push_str(&format!(" - Avg: {:.1}ms", perf.average_ms));
        }
        if self.schema_count > 1 {
            text.push_str(&format!(" - {} schemas", self.schema_count));
        }
        text
    }
}

/// Shared handle for publishing status changes.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: Arc<watch::Sender<PipelineStatus>>,
}

impl StatusReporter {
    pub fn new(role: PipelineRole) -> Self {
        let (tx, _rx) = watch::channel(PipelineStatus::new(role));
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> PipelineStatus {
        self.tx.borrow().clone()
    }

    pub fn state(&self) -> PipelineState {
        self.tx.borrow().state
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn transition(&self, next: PipelineState) -> bool {
        let mut from = None;
        let changed = self.tx.send_if_modified(|status| {
            if status.state == next || !status.state.can_transition_to(next) {
                from = Some(status.state);
                return false;
            }
            from = Some(status.state);
            status.state = next;
            true
        });

        let from = from.unwrap_or(next);
        if changed {
            match (from, next) {
                (PipelineState::Ready, PipelineState::Processing)
                | (PipelineState::Idle, PipelineState::Processing)
                | (PipelineState::Processing, PipelineState::Ready) => {
                    trace!("Pipeline state {from} -> {next}")
                }
                _ => info!("Pipeline state {from} -> {next}"),
            }
        } else if from != next {
            warn!("Ignoring invalid pipeline transition {from} -> {next}");
        }
        changed
    }

    /// Enter `Failed` and remember why.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let changed = self.tx.send_if_modified(|status| {
            if status.state.is_terminal() {
                return false;
            }
            status.state = PipelineState::Failed;
            status.failure = Some(reason.clone());
            true
        });
        if changed {
            warn!("Pipeline failed: {reason}");
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut PipelineStatus)) {
        self.tx.send_modify(f);
    }

    /// Start handling one unit of work.
    pub fn begin_processing(&self, now: Instant) {
        self.transition(PipelineState::Processing);
        self.update(|status| status.last_activity = Some(now));
    }

    /// Finish one unit of work, returning to `Ready`.
    pub fn end_processing(&self, succeeded: bool) {
        self.update(|status| {
            if succeeded {
                status.message_count += 1;
            } else {
                status.error_count += 1;
            }
        });
        self.transition(PipelineState::Ready);
    }

    /// Switch `Ready` to `Idle` when nothing has happened for longer than
    /// `threshold`. Returns true only on the switch itself.
    pub fn mark_idle_if_inactive(&self, threshold: Duration, now: Instant) -> bool {
        let changed = self.tx.send_if_modified(|status| {
            let Some(last) = status.last_activity else {
                return false;
            };
            if status.state != PipelineState::Ready || now.duration_since(last) <= threshold {
                return false;
            }
            status.state = PipelineState::Idle;
            true
        });
        if changed {
            info!("Pipeline state {} -> {}", PipelineState::Ready, PipelineState::Idle);
        }
        changed
    }

    /// Clear counters and per-run annotations.
    pub fn reset_counters(&self) {
        self.update(|status| {
            status.message_count = 0;
            status.error_count = 0;
            status.batch = None;
            status.performance = None;
            status.schema_count = 0;
        });
    }
}
