//! Groups decoded records into batches.
//!
//! A batch is flushed when it reaches capacity or when the batch timeout
//! expires, whichever comes first. The timeout is a fixed window measured
//! from the first record of the batch; later records do not extend it.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::output::{Artifact, BatchArtifact, BatchInfo, OutputRouter, SuccessRecord};
use crate::status::{BatchFill, StatusReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Capacity,
    Timeout,
    Forced,
}

#[derive(Default)]
struct Window {
    records: Vec<SuccessRecord>,
    /// Bumped whenever a new window opens; stale timers compare against it
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Shared {
    capacity: usize,
    router: OutputRouter,
    status: StatusReporter,
}

impl Shared {
    /// Emit the current window, if any. The caller holds the window lock.
    fn flush(&self, window: &mut Window, reason: FlushReason) -> Option<usize> {
        if window.records.is_empty() {
            return None;
        }
        let records = std::mem::take(&mut window.records);
        let size = records.len();
        let artifact = BatchArtifact {
            payload: records,
            batch_info: BatchInfo {
                size,
                timestamp: Utc::now().timestamp_millis(),
                batch_id: Uuid::new_v4().to_string(),
            },
        };
        debug!("Flushing batch of {size} records ({reason:?})");
        self.router.emit(Artifact::Batch(artifact));
        self.report(0);
        Some(size)
    }

    fn report(&self, pending: usize) {
        let capacity = self.capacity;
        self.status.update(|status| {
            status.batch = Some(BatchFill { pending, capacity });
        });
    }
}

pub struct BatchAccumulator {
    window: Arc<Mutex<Window>>,
    shared: Arc<Shared>,
    timeout: Duration,
}

impl BatchAccumulator {
    pub fn new(
        capacity: usize,
        timeout: Duration,
        router: OutputRouter,
        status: StatusReporter,
    ) -> Self {
        Self {
            window: Arc::new(Mutex::new(Window::default())),
            shared: Arc::new(Shared {
                capacity,
                router,
                status,
            }),
            timeout,
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Add a record; returns how many records remain buffered afterwards.
    pub async fn add(&self, record: SuccessRecord) -> usize {
        let mut window = self.window.lock().await;
        if window.records.is_empty() {
            window.generation += 1;
            let generation = window.generation;
            if let Some(stale) = window.timer.replace(self.arm_timer(generation)) {
                stale.abort();
            }
        }

        window.records.push(record);
        if window.records.len() >= self.shared.capacity {
            if let Some(timer) = window.timer.take() {
                timer.abort();
            }
            self.shared.flush(&mut window, FlushReason::Capacity);
        } else {
            self.shared.report(window.records.len());
        }
        window.records.len()
    }

    fn arm_timer(&self, generation: u64) -> JoinHandle<()> {
        let window = Arc::clone(&self.window);
        let shared = Arc::clone(&self.shared);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut window = window.lock().await;
            if window.generation != generation {
                return;
            }
            // Drop our own handle instead of aborting it
            window.timer.take();
            shared.flush(&mut window, FlushReason::Timeout);
        })
    }

    /// Flush whatever is buffered now.
    pub async fn flush(&self) -> Option<usize> {
        let mut window = self.window.lock().await;
        if let Some(timer) = window.timer.take() {
            timer.abort();
        }
        self.shared.flush(&mut window, FlushReason::Forced)
    }

    pub async fn pending(&self) -> usize {
        self.window.lock().await.records.len()
    }
}
