//! Metrics collection and exposition.
//!
//! # Metrics
//! - `testbed_requests_total` (counter): requests by method, status
//! - `testbed_request_duration_seconds` (histogram): handler latency
//! - `testbed_active_sessions` (gauge): live streams / websockets
//! - `testbed_stream_units_total` (counter): units emitted by producers
//! - `testbed_ws_connections` (gauge): hub membership
//! - `testbed_ws_broadcast_removed_total` (counter): peers dropped during broadcast
//! - `testbed_harness_runs_total` (counter): load harness runs by mode
//! - `testbed_decode_errors_total` (counter): rejected chunked bodies
//!
//! Every recorder is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one completed HTTP request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "testbed_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("testbed_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Axum middleware recording request counts and latency.
pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    record_request(&method, response.status().as_u16(), start);
    response
}

pub fn record_active_sessions(kind: &'static str, active: u64) {
    metrics::gauge!("testbed_active_sessions", "kind" => kind).set(active as f64);
}

pub fn record_stream_units(kind: &'static str, units: u64) {
    metrics::counter!("testbed_stream_units_total", "kind" => kind).increment(units);
}

pub fn record_ws_connections(count: usize) {
    metrics::gauge!("testbed_ws_connections").set(count as f64);
}

pub fn record_broadcast_removed(removed: usize) {
    metrics::counter!("testbed_ws_broadcast_removed_total").increment(removed as u64);
}

pub fn record_harness_run(mode: &'static str, units: u64) {
    metrics::counter!("testbed_harness_runs_total", "mode" => mode).increment(1);
    metrics::counter!("testbed_harness_units_total", "mode" => mode).increment(units);
}

pub fn record_decode_error(kind: &'static str) {
    metrics::counter!("testbed_decode_errors_total", "kind" => kind).increment(1);
}
