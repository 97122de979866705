//! Load harness: simulated work units under a concurrency cap.
//!
//! Every unit is a tokio task that sleeps for a simulated processing time.
//! Nothing is sent over the network; the point is to generate long-lived
//! request load on the proxy in front of this server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::clock::unix_timestamp;
use crate::config::LoadTestConfig;
use crate::lifecycle::ShutdownSignal;
use crate::loadtest::stats::{RunStats, StatsRecorder};
use crate::observability::metrics;

/// Simulated processing time per bounded unit, in milliseconds.
const BOUNDED_UNIT_MS: std::ops::Range<u64> = 10..60;
/// Simulated processing time per duration-run unit.
const DURATION_UNIT_MS: std::ops::Range<u64> = 10..110;
/// Simulated processing time per batch item.
const BATCH_UNIT_MS: std::ops::Range<u64> = 50..250;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HarnessError {
    #[error("{parameter} = {value} is outside {min}..={max}")]
    AdmissionViolation {
        parameter: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
}

/// Upper bounds a run must fit in before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessLimits {
    pub max_concurrency: u64,
    pub max_requests: u64,
    pub max_delay: Duration,
    pub max_duration: Duration,
    pub max_stress_concurrency: u64,
    pub max_qps: u64,
    pub max_paced_duration: Duration,
    pub max_batch: usize,
}

impl HarnessLimits {
    pub fn from_config(config: &LoadTestConfig) -> Self {
        Self {
            max_concurrency: config.concurrency.max,
            max_requests: config.requests.max,
            max_delay: Duration::from_millis(config.delay_ms.max),
            max_duration: Duration::from_secs(config.stress_duration_secs.max),
            max_stress_concurrency: config.stress_concurrency.max,
            max_qps: config.qps.max,
            max_paced_duration: Duration::from_secs(config.load_duration_secs.max),
            max_batch: config.max_batch,
        }
    }
}

impl Default for HarnessLimits {
    fn default() -> Self {
        Self::from_config(&LoadTestConfig::default())
    }
}

/// Result of a fixed-rate run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacedStats {
    pub target_qps: u64,
    pub actual_qps: f64,
    pub total_requests: u64,
    pub success_requests: u64,
    pub duration_seconds: u64,
}

/// One entry of a batch request. Only echoed back; nothing is fetched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchItem {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub index: usize,
    pub method: String,
    pub url: String,
    pub response_time: u64,
    pub status: &'static str,
    pub response_code: u16,
}

#[derive(Debug, Clone, Default)]
pub struct LoadHarness {
    limits: HarnessLimits,
}

impl LoadHarness {
    pub fn new(limits: HarnessLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &HarnessLimits {
        &self.limits
    }

    /// Run `requests` units, at most `concurrency` at a time. Each unit waits
    /// `delay` plus a little jitter.
    pub async fn run_bounded(
        &self,
        recorder: &StatsRecorder,
        concurrency: u64,
        requests: u64,
        delay: Duration,
    ) -> Result<RunStats, HarnessError> {
        admit("concurrency", concurrency, 1, self.limits.max_concurrency)?;
        admit("requests", requests, 1, self.limits.max_requests)?;
        admit(
            "delay_ms",
            delay.as_millis() as u64,
            0,
            self.limits.max_delay.as_millis() as u64,
        )?;

        tracing::info!(concurrency, requests, delay_ms = delay.as_millis() as u64, "Bounded run starting");
        recorder.begin(concurrency);
        let start = Instant::now();
        let permits = Arc::new(Semaphore::new(concurrency as usize));
        let mut units = JoinSet::new();

        for _ in 0..requests {
            // The semaphore is never closed.
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            units.spawn(async move {
                let _permit = permit;
                let begun = Instant::now();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                simulate(BOUNDED_UNIT_MS).await;
                begun.elapsed()
            });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(latency) => recorder.record_success(latency),
                Err(e) => {
                    tracing::warn!(error = %e, "Load unit failed");
                    recorder.record_failure();
                }
            }
        }

        let stats = recorder.finish(start.elapsed());
        metrics::record_harness_run("bounded", stats.total_requests);
        tracing::info!(
            total = stats.total_requests,
            failed = stats.failed_requests,
            duration_ms = stats.duration_ms,
            "Bounded run finished"
        );
        Ok(stats)
    }

    /// Keep `concurrency` workers busy until `duration` passes or `cancel`
    /// fires. A unit interrupted by the stop signal is not counted.
    pub async fn run_for_duration(
        &self,
        recorder: &StatsRecorder,
        concurrency: u64,
        duration: Duration,
        mut cancel: ShutdownSignal,
    ) -> Result<RunStats, HarnessError> {
        admit("concurrency", concurrency, 1, self.limits.max_stress_concurrency)?;
        admit(
            "duration",
            duration.as_secs(),
            1,
            self.limits.max_duration.as_secs(),
        )?;

        tracing::info!(concurrency, duration_secs = duration.as_secs(), "Duration run starting");
        recorder.begin(concurrency);
        let start = Instant::now();
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut workers = JoinSet::new();

        for _ in 0..concurrency {
            let mut stop = stop_rx.clone();
            let recorder = recorder.clone();
            workers.spawn(async move {
                while !*stop.borrow() {
                    let begun = Instant::now();
                    tokio::select! {
                        _ = stop.wait_for(|stopped| *stopped) => break,
                        _ = simulate(DURATION_UNIT_MS) => recorder.record_success(begun.elapsed()),
                    }
                }
            });
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = cancel.recv() => tracing::info!("Duration run cancelled"),
        }
        let _ = stop_tx.send(true);

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "Load worker failed");
                recorder.record_failure();
            }
        }

        let stats = recorder.finish(start.elapsed());
        metrics::record_harness_run("duration", stats.total_requests);
        tracing::info!(
            total = stats.total_requests,
            duration_ms = stats.duration_ms,
            "Duration run finished"
        );
        Ok(stats)
    }

    /// Start units at a fixed rate for `duration`, then wait for all of them.
    pub async fn run_paced(&self, qps: u64, duration: Duration) -> Result<PacedStats, HarnessError> {
        admit("qps", qps, 1, self.limits.max_qps)?;
        admit(
            "duration",
            duration.as_secs(),
            1,
            self.limits.max_paced_duration.as_secs(),
        )?;

        let start = Instant::now();
        let deadline = start + duration;
        let mut ticker = tokio::time::interval(Duration::from_secs(1) / qps as u32);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
        let mut units = JoinSet::new();
        let mut total = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {
                    total += 1;
                    units.spawn(simulate(BOUNDED_UNIT_MS));
                }
            }
        }

        let mut success = 0u64;
        while let Some(joined) = units.join_next().await {
            if joined.is_ok() {
                success += 1;
            }
        }

        metrics::record_harness_run("paced", total);
        let stats = PacedStats {
            target_qps: qps,
            actual_qps: total as f64 / duration.as_secs_f64(),
            total_requests: total,
            success_requests: success,
            duration_seconds: duration.as_secs(),
        };
        tracing::info!(target_qps = qps, actual_qps = stats.actual_qps, total, "Paced run finished");
        Ok(stats)
    }

    /// Simulate every item concurrently. Outcomes come back in input order.
    pub async fn run_batch(&self, items: Vec<BatchItem>) -> Result<Vec<BatchOutcome>, HarnessError> {
        admit("batch", items.len() as u64, 0, self.limits.max_batch as u64)?;

        let handles: Vec<_> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let method = item.method.clone();
                let url = item.url.clone();
                let handle = tokio::spawn(async move {
                    let begun = Instant::now();
                    simulate(BATCH_UNIT_MS).await;
                    BatchOutcome {
                        index,
                        method: item.method,
                        url: item.url,
                        response_time: begun.elapsed().as_millis() as u64,
                        status: "success",
                        response_code: 200,
                    }
                });
                (index, method, url, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (index, method, url, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(index, error = %e, "Batch item failed");
                    BatchOutcome {
                        index,
                        method,
                        url,
                        response_time: 0,
                        status: "failed",
                        response_code: 500,
                    }
                }
            };
            outcomes.push(outcome);
        }

        metrics::record_harness_run("batch", outcomes.len() as u64);
        tracing::debug!(items = outcomes.len(), completed_at = unix_timestamp(), "Batch finished");
        Ok(outcomes)
    }
}

fn admit(parameter: &'static str, value: u64, min: u64, max: u64) -> Result<(), HarnessError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(HarnessError::AdmissionViolation {
            parameter,
            value,
            min,
            max,
        })
    }
}

async fn simulate(range: std::ops::Range<u64>) {
    tokio::time::sleep(Duration::from_millis(fastrand::u64(range))).await;
}
