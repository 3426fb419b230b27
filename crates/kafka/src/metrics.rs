//! Per-record processing time and throughput.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSnapshot {
    pub message_count: u64,
    pub average_ms: f64,
    pub messages_per_sec: f64,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    total_processing_ms: f64,
    message_count: u64,
    window_start: Instant,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self {
            total_processing_ms: 0.0,
            message_count: 0,
            window_start: Instant::now(),
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.total_processing_ms += elapsed.as_secs_f64() * 1000.0;
        self.message_count += 1;
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    /// Mean processing time; zero before the first record.
    pub fn average_ms(&self) -> f64 {
        if self.message_count == 0 {
            return 0.0;
        }
        self.total_processing_ms / self.message_count as f64
    }

    /// Records per second since the window started.
    pub fn rate(&self) -> f64 {
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.message_count as f64 / elapsed
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            message_count: self.message_count,
            average_ms: self.average_ms(),
            messages_per_sec: self.rate(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
