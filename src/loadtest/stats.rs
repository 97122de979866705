//! Run statistics shared between load runs and the stats endpoints.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

use crate::clock::unix_timestamp;

/// Snapshot of one load run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub average_response_ms: u64,
    pub max_response_ms: u64,
    /// 0 when no unit succeeded.
    pub min_response_ms: u64,
    pub requests_per_second: f64,
    pub start_time: i64,
    pub end_time: i64,
    pub duration_ms: u64,
    pub concurrency: u64,
}

#[derive(Debug, Default)]
struct Accumulator {
    stats: RunStats,
    latency_sum_ms: u64,
    min_seen_ms: Option<u64>,
}

impl Accumulator {
    fn refresh_average(&mut self) {
        let samples = self.stats.success_requests;
        self.stats.average_response_ms = if samples == 0 {
            0
        } else {
            self.latency_sum_ms / samples
        };
        self.stats.min_response_ms = self.min_seen_ms.unwrap_or(0);
    }
}

/// Cloneable handle to one set of run statistics.
///
/// The lock is held only for the constant-time update, never across an await.
#[derive(Debug, Clone, Default)]
pub struct StatsRecorder {
    inner: Arc<Mutex<Accumulator>>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Accumulator) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Start a new run, discarding whatever was recorded before.
    pub fn begin(&self, concurrency: u64) {
        self.with(|acc| {
            *acc = Accumulator::default();
            acc.stats.concurrency = concurrency;
            acc.stats.start_time = unix_timestamp();
        });
    }

    /// Record a unit that completed after `latency`.
    pub fn record_success(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.with(|acc| {
            acc.stats.total_requests += 1;
            acc.stats.success_requests += 1;
            acc.latency_sum_ms += ms;
            acc.stats.max_response_ms = acc.stats.max_response_ms.max(ms);
            acc.min_seen_ms = Some(acc.min_seen_ms.map_or(ms, |min| min.min(ms)));
            acc.refresh_average();
        });
    }

    /// Record a unit that did not complete.
    pub fn record_failure(&self) {
        self.with(|acc| {
            acc.stats.total_requests += 1;
            acc.stats.failed_requests += 1;
        });
    }

    /// Close the run after `elapsed` and return its final numbers.
    pub fn finish(&self, elapsed: Duration) -> RunStats {
        self.with(|acc| {
            acc.stats.end_time = unix_timestamp();
            acc.stats.duration_ms = elapsed.as_millis() as u64;
            let secs = elapsed.as_secs_f64();
            acc.stats.requests_per_second = if secs > 0.0 {
                acc.stats.total_requests as f64 / secs
            } else {
                0.0
            };
            acc.refresh_average();
            acc.stats.clone()
        })
    }

    /// Replace the held numbers with a finished run's.
    pub fn publish(&self, stats: RunStats) {
        self.with(|acc| {
            acc.latency_sum_ms = stats.average_response_ms * stats.success_requests;
            acc.min_seen_ms = (stats.success_requests > 0).then_some(stats.min_response_ms);
            acc.stats = stats;
        });
    }

    pub fn snapshot(&self) -> RunStats {
        self.with(|acc| acc.stats.clone())
    }

    pub fn reset(&self) {
        self.with(|acc| *acc = Accumulator::default());
    }
}
