//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (timeouts > 0, bounds ordered)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HarnessConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{HarnessConfig, ParamBounds};

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a parsed configuration.
pub fn validate_config(config: &HarnessConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {}", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    let streaming = &config.streaming;
    let websocket = &config.websocket;
    let load = &config.load_test;
    let bounds: [(&str, &ParamBounds); 16] = [
        ("streaming.chunk_count", &streaming.chunk_count),
        ("streaming.chunk_delay_ms", &streaming.chunk_delay_ms),
        ("streaming.stream_duration_secs", &streaming.stream_duration_secs),
        ("streaming.stream_interval_ms", &streaming.stream_interval_ms),
        ("streaming.large_size_mib", &streaming.large_size_mib),
        ("streaming.lines", &streaming.lines),
        ("streaming.sse_count", &streaming.sse_count),
        ("streaming.sse_interval_ms", &streaming.sse_interval_ms),
        ("websocket.performance_count", &websocket.performance_count),
        ("websocket.performance_interval_ms", &websocket.performance_interval_ms),
        ("load_test.concurrency", &load.concurrency),
        ("load_test.requests", &load.requests),
        ("load_test.delay_ms", &load.delay_ms),
        ("load_test.stress_duration_secs", &load.stress_duration_secs),
        ("load_test.stress_concurrency", &load.stress_concurrency),
        ("load_test.qps", &load.qps),
    ];
    for (field, b) in bounds {
        if !b.is_ordered() {
            errors.push(ValidationError::new(
                field,
                format!("expected min <= default <= max, got {}/{}/{}", b.min, b.default, b.max),
            ));
        }
    }
    if !load.load_duration_secs.is_ordered() {
        errors.push(ValidationError::new("load_test.load_duration_secs", "bounds out of order"));
    }

    // Counts and intervals that feed timers or semaphores must not reach zero.
    let nonzero_minimums = [
        ("streaming.chunk_count", streaming.chunk_count.min),
        ("streaming.stream_duration_secs", streaming.stream_duration_secs.min),
        ("streaming.stream_interval_ms", streaming.stream_interval_ms.min),
        ("streaming.large_size_mib", streaming.large_size_mib.min),
        ("streaming.lines", streaming.lines.min),
        ("streaming.sse_count", streaming.sse_count.min),
        ("websocket.performance_count", websocket.performance_count.min),
        ("load_test.concurrency", load.concurrency.min),
        ("load_test.requests", load.requests.min),
        ("load_test.stress_duration_secs", load.stress_duration_secs.min),
        ("load_test.stress_concurrency", load.stress_concurrency.min),
        ("load_test.qps", load.qps.min),
        ("load_test.load_duration_secs", load.load_duration_secs.min),
    ];
    for (field, min) in nonzero_minimums {
        if min == 0 {
            errors.push(ValidationError::new(field, "min must be > 0"));
        }
    }

    if websocket.outbound_queue == 0 {
        errors.push(ValidationError::new("websocket.outbound_queue", "must be > 0"));
    }
    if websocket.realtime_interval_ms == 0 {
        errors.push(ValidationError::new("websocket.realtime_interval_ms", "must be > 0"));
    }
    if websocket.heartbeat_interval_secs == 0 {
        errors.push(ValidationError::new("websocket.heartbeat_interval_secs", "must be > 0"));
    }
    if websocket.idle_timeout_secs < websocket.heartbeat_interval_secs {
        errors.push(ValidationError::new(
            "websocket.idle_timeout_secs",
            "must be at least the heartbeat interval",
        ));
    }
    if load.max_batch == 0 {
        errors.push(ValidationError::new("load_test.max_batch", "must be > 0"));
    }

    let obs = &config.observability;
    if !LOG_LEVELS.contains(&obs.log_level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level {:?}", obs.log_level),
        ));
    }
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {}", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
