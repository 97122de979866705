//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the testbed.
//! All types derive Serde traits for deserialization from config files, and
//! every section has defaults so an empty file is a valid configuration.

use std::num::IntErrorKind;

use serde::{Deserialize, Serialize};

/// Root configuration for the testbed server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HarnessConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeouts for the short request/response routes.
    pub timeouts: TimeoutConfig,

    /// Bounds for the streaming and chunked-transfer endpoints.
    pub streaming: StreamingConfig,

    /// WebSocket hub and endpoint settings.
    pub websocket: WebSocketConfig,

    /// Load harness parameter bounds.
    pub load_test: LoadTestConfig,

    /// Request size limits.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Inclusive range plus default for one numeric query parameter.
///
/// Missing or unparsable values resolve to `default`; everything else is
/// clamped into `min..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct ParamBounds {
    pub min: u64,
    pub max: u64,
    pub default: u64,
}

impl ParamBounds {
    pub const fn new(min: u64, max: u64, default: u64) -> Self {
        Self { min, max, default }
    }

    /// Resolve a raw query value against the bounds.
    pub fn resolve(&self, raw: Option<&str>) -> u64 {
        let Some(raw) = raw.map(str::trim) else {
            return self.default;
        };
        match raw.parse::<i128>() {
            Ok(v) if v < 0 => self.min,
            Ok(v) => u64::try_from(v).unwrap_or(u64::MAX).clamp(self.min, self.max),
            // Numbers too wide for any integer type still clamp.
            Err(e) => match e.kind() {
                IntErrorKind::PosOverflow => self.max,
                IntErrorKind::NegOverflow => self.min,
                _ => self.default,
            },
        }
    }

    /// Whether the bounds are internally consistent.
    pub fn is_ordered(&self) -> bool {
        self.min <= self.default && self.default <= self.max
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout for non-streaming routes, in seconds.
    /// Streams, WebSockets and load runs are bounded by their own parameters.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Streaming endpoint bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// `chunks` for the count-bounded chunked stream.
    pub chunk_count: ParamBounds,
    /// `delay` (ms) between chunks of the count-bounded chunked stream.
    pub chunk_delay_ms: ParamBounds,
    /// `duration` (s) of the duration-bounded chunked stream.
    pub stream_duration_secs: ParamBounds,
    /// `interval` (ms) of the duration-bounded chunked stream.
    pub stream_interval_ms: ParamBounds,
    /// Size in MiB of the large-transfer endpoint.
    pub large_size_mib: ParamBounds,
    /// Number of lines of the line stream.
    pub lines: ParamBounds,
    /// Delay between lines, in milliseconds.
    pub line_interval_ms: u64,
    /// Number of server-sent events.
    pub sse_count: ParamBounds,
    /// Delay between server-sent events, in milliseconds.
    pub sse_interval_ms: ParamBounds,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_count: ParamBounds::new(1, 100, 5),
            chunk_delay_ms: ParamBounds::new(0, 5_000, 500),
            stream_duration_secs: ParamBounds::new(1, 300, 10),
            stream_interval_ms: ParamBounds::new(100, 10_000, 1_000),
            large_size_mib: ParamBounds::new(1, 1_000, 10),
            lines: ParamBounds::new(1, 1_000, 10),
            line_interval_ms: 100,
            sse_count: ParamBounds::new(1, 1_000, 10),
            sse_interval_ms: ParamBounds::new(100, 10_000, 1_000),
        }
    }
}

/// WebSocket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Frames buffered per connection before the peer counts as failed.
    pub outbound_queue: usize,
    /// Push interval of the realtime endpoint, in milliseconds.
    pub realtime_interval_ms: u64,
    /// Ping interval of the heartbeat endpoint, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Idle timeout of the heartbeat endpoint, in seconds.
    pub idle_timeout_secs: u64,
    /// `count` for the performance endpoint.
    pub performance_count: ParamBounds,
    /// `interval` (ms) for the performance endpoint.
    pub performance_interval_ms: ParamBounds,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            outbound_queue: 64,
            realtime_interval_ms: 1_000,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 60,
            performance_count: ParamBounds::new(1, 10_000, 100),
            performance_interval_ms: ParamBounds::new(1, 5_000, 10),
        }
    }
}

/// Load harness bounds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadTestConfig {
    /// `concurrency` of the bounded run.
    pub concurrency: ParamBounds,
    /// `requests` of the bounded run.
    pub requests: ParamBounds,
    /// `delay` (ms) per unit of the bounded run.
    pub delay_ms: ParamBounds,
    /// `duration` (s) of the stress run.
    pub stress_duration_secs: ParamBounds,
    /// `concurrency` of the stress run.
    pub stress_concurrency: ParamBounds,
    /// `qps` of the paced run.
    pub qps: ParamBounds,
    /// `duration` (s) of the paced run.
    pub load_duration_secs: ParamBounds,
    /// Maximum items accepted by the batch endpoint.
    pub max_batch: usize,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            concurrency: ParamBounds::new(1, 1_000, 10),
            requests: ParamBounds::new(1, 10_000, 100),
            delay_ms: ParamBounds::new(0, 5_000, 0),
            stress_duration_secs: ParamBounds::new(1, 300, 60),
            stress_concurrency: ParamBounds::new(1, 500, 20),
            qps: ParamBounds::new(1, 1_000, 50),
            load_duration_secs: ParamBounds::new(1, 300, 30),
            max_batch: 100,
        }
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered body size in bytes for the echo routes.
    /// Chunked-transfer receivers stream their bodies and are not capped.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
