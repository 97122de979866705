//! `/test` handlers driving the load harness.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::clock::unix_timestamp;
use crate::http::handlers::{param, QueryParams};
use crate::http::response::{ApiError, ApiResponse};
use crate::http::server::AppState;
use crate::loadtest::{BatchItem, PacedStats, RunStats, StatsRecorder};

/// `GET|POST /concurrent?concurrency&requests&delay`
///
/// Each run counts into its own recorder; the finished numbers are then
/// published to the shared one read by `/test/stats`.
pub async fn concurrent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<QueryParams>,
) -> Result<ApiResponse<RunStats>, ApiError> {
    let bounds = &state.config.load_test;
    let concurrency = param(&params, "concurrency", &bounds.concurrency);
    let requests = param(&params, "requests", &bounds.requests);
    let delay = param(&params, "delay", &bounds.delay_ms);

    let recorder = StatsRecorder::new();
    let stats = state
        .harness
        .run_bounded(&recorder, concurrency, requests, Duration::from_millis(delay))
        .await?;
    state.recorder.publish(stats.clone());
    Ok(ApiResponse::success("concurrent test complete", stats).with_request_id(&headers))
}

/// `GET|POST /stress?duration&concurrency`
pub async fn stress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<QueryParams>,
) -> Result<ApiResponse<RunStats>, ApiError> {
    let bounds = &state.config.load_test;
    let duration = param(&params, "duration", &bounds.stress_duration_secs);
    let concurrency = param(&params, "concurrency", &bounds.stress_concurrency);

    // Stress runs keep their own numbers; /test/stats reports concurrent runs.
    let recorder = StatsRecorder::new();
    let stats = state
        .harness
        .run_for_duration(
            &recorder,
            concurrency,
            Duration::from_secs(duration),
            state.shutdown.clone(),
        )
        .await?;
    Ok(ApiResponse::success("stress test complete", stats).with_request_id(&headers))
}

/// `POST /batch` with a JSON array of requests.
pub async fn batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    items: Result<Json<Vec<BatchItem>>, JsonRejection>,
) -> Result<ApiResponse<Value>, ApiError> {
    let Json(items) = items.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let max = state.harness.limits().max_batch;
    if items.len() > max {
        return Err(ApiError::BadRequest(format!(
            "batch holds {} requests, at most {max} allowed",
            items.len()
        )));
    }

    let results = state.harness.run_batch(items).await?;
    let data = json!({
        "total_requests": results.len(),
        "results": results,
        "completed_at": unix_timestamp(),
    });
    Ok(ApiResponse::success("batch complete", data).with_request_id(&headers))
}

/// `GET /load?qps&duration`
pub async fn load(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<QueryParams>,
) -> Result<ApiResponse<PacedStats>, ApiError> {
    let bounds = &state.config.load_test;
    let qps = param(&params, "qps", &bounds.qps);
    let duration = param(&params, "duration", &bounds.load_duration_secs);

    let stats = state
        .harness
        .run_paced(qps, Duration::from_secs(duration))
        .await?;
    Ok(ApiResponse::success("load test complete", stats).with_request_id(&headers))
}

/// `GET /stats`
pub async fn stats(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse<RunStats> {
    ApiResponse::success("current statistics", state.recorder.snapshot()).with_request_id(&headers)
}

/// `POST /reset`
pub async fn reset(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse<Value> {
    state.recorder.reset();
    tracing::info!("Load statistics reset");
    ApiResponse::success("statistics reset", Value::Null).with_request_id(&headers)
}
