//! Background task that flips a quiet pipeline to `Idle`.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::status::StatusReporter;

/// How often the liveness check runs.
pub const CHECK_PERIOD: Duration = Duration::from_secs(1);

pub struct LivenessMonitor {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn spawn(status: StatusReporter, threshold: Duration) -> Self {
        Self::spawn_with_period(status, threshold, CHECK_PERIOD)
    }

    pub fn spawn_with_period(status: StatusReporter, threshold: Duration, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if status.mark_idle_if_inactive(threshold, Instant::now()) {
                            debug!("No activity for more than {}ms", threshold.as_millis());
                        }
                    }
                }
            }
        });
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!("Liveness task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
