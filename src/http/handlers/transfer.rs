//! `/api/transfer` handlers: chunked and large transfers in both directions.

use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use serde_json::{json, Value};
use tokio::io::{copy_buf, sink};

use crate::clock::unix_timestamp;
use crate::http::handlers::{body_reader, is_chunked, param, streaming_response, QueryParams};
use crate::http::response::{ApiError, ApiResponse};
use crate::http::server::AppState;
use crate::stream::{StreamSession, UnitKind};
use crate::transfer::ChunkDecoder;

/// Block size for large transfers.
const LARGE_BLOCK: usize = 1024 * 1024;

/// `GET /chunked?chunks&delay`
pub async fn send_chunked(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Response, ApiError> {
    let bounds = &state.config.streaming;
    let chunks = param(&params, "chunks", &bounds.chunk_count);
    let delay = param(&params, "delay", &bounds.chunk_delay_ms);

    let session =
        StreamSession::counted(UnitKind::JsonChunk, chunks, Duration::from_millis(delay)).chunked();
    streaming_response(&state, session)
}

/// `GET /chunked/stream?duration&interval`
pub async fn stream_chunked(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Response, ApiError> {
    let bounds = &state.config.streaming;
    let duration = param(&params, "duration", &bounds.stream_duration_secs);
    let interval = param(&params, "interval", &bounds.stream_interval_ms);

    let session = StreamSession::timed(
        UnitKind::JsonChunk,
        Duration::from_secs(duration),
        Duration::from_millis(interval),
    )
    .chunked();
    streaming_response(&state, session)
}

/// `POST /chunked`: decode and echo a chunked body, or read a plain one.
pub async fn receive_chunked(
    headers: HeaderMap,
    body: Body,
) -> Result<ApiResponse<Value>, ApiError> {
    let chunked = is_chunked(&headers);
    let mut received = Vec::new();
    let mut chunks = Vec::new();

    if chunked {
        let mut decoder = ChunkDecoder::new(body_reader(body));
        while let Some(chunk) = decoder.next_chunk().await? {
            chunks.push(json!({
                "chunk_id": chunks.len() + 1,
                "size": chunk.size,
                "data": String::from_utf8_lossy(&chunk.payload),
            }));
            received.extend_from_slice(&chunk.payload);
        }
    } else {
        let bytes = to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        received.extend_from_slice(&bytes);
    }

    tracing::debug!(chunked, chunks = chunks.len(), bytes = received.len(), "Chunked body received");
    let data = json!({
        "is_chunked": chunked,
        "transfer_encoding": header_value(&headers, header::TRANSFER_ENCODING),
        "chunk_count": chunks.len(),
        "total_size": received.len(),
        "received_data": String::from_utf8_lossy(&received),
        "chunks": chunks,
        "content_type": header_value(&headers, header::CONTENT_TYPE),
        "content_length": header_value(&headers, header::CONTENT_LENGTH),
        "received_at": unix_timestamp(),
    });
    Ok(ApiResponse::success("chunked transfer received", data).with_request_id(&headers))
}

/// `POST /chunked/upload`: chunked bodies only, payloads discarded.
pub async fn upload_chunked(
    headers: HeaderMap,
    body: Body,
) -> Result<ApiResponse<Value>, ApiError> {
    if !is_chunked(&headers) {
        return Err(ApiError::BadRequest(
            "request must use Transfer-Encoding: chunked".into(),
        ));
    }

    let started = Instant::now();
    let mut decoder = ChunkDecoder::new(body_reader(body));
    let mut chunks = Vec::new();
    while let Some(size) = decoder.skip_chunk().await? {
        chunks.push(json!({
            "chunk_id": chunks.len() + 1,
            "size": size,
            "received_at": unix_timestamp(),
        }));
    }

    let total = decoder.bytes_read();
    let count = decoder.chunks_read();
    let elapsed = started.elapsed();
    let data = json!({
        "chunk_count": count,
        "total_size": total,
        "upload_time_ms": elapsed.as_millis() as u64,
        "average_chunk_size": if count == 0 { 0.0 } else { total as f64 / count as f64 },
        "upload_speed_bps": rate(total, elapsed),
        "chunks": chunks,
        "content_type": header_value(&headers, header::CONTENT_TYPE),
        "completed_at": unix_timestamp(),
    });
    Ok(ApiResponse::success("chunked upload complete", data).with_request_id(&headers))
}

/// `GET /large/{size}?chunked=true`
pub async fn send_large(
    State(state): State<AppState>,
    Path(size): Path<String>,
    Query(params): Query<QueryParams>,
) -> Result<Response, ApiError> {
    let blocks = state.config.streaming.large_size_mib.resolve(Some(&size));
    let chunked = params.get("chunked").is_some_and(|v| v == "true");

    let mut session = StreamSession::counted(
        UnitKind::Pattern { size: LARGE_BLOCK },
        blocks,
        Duration::ZERO,
    );
    if chunked {
        session = session.chunked();
    }
    tracing::debug!(size_mib = blocks, chunked, "Large transfer requested");
    streaming_response(&state, session)
}

/// `POST /large`: drain a body and report throughput.
pub async fn receive_large(headers: HeaderMap, body: Body) -> Result<ApiResponse<Value>, ApiError> {
    let started = Instant::now();
    let chunked = is_chunked(&headers);

    let (total, count) = if chunked {
        let mut decoder = ChunkDecoder::new(body_reader(body));
        while decoder.skip_chunk().await?.is_some() {}
        (decoder.bytes_read(), decoder.chunks_read())
    } else {
        let mut reader = body_reader(body);
        let total = copy_buf(&mut reader, &mut sink())
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        (total, 0)
    };

    let elapsed = started.elapsed();
    let data = json!({
        "is_chunked": chunked,
        "transfer_encoding": header_value(&headers, header::TRANSFER_ENCODING),
        "chunk_count": count,
        "total_size": total,
        "transfer_time_ms": elapsed.as_millis() as u64,
        "transfer_speed_bps": rate(total, elapsed),
        "transfer_speed_mbps": rate(total, elapsed) / (1024.0 * 1024.0),
        "received_at": unix_timestamp(),
    });
    Ok(ApiResponse::success("large transfer received", data).with_request_id(&headers))
}

/// `GET /stream/sse`: ten events, one per second.
pub async fn send_sse(State(state): State<AppState>) -> Result<Response, ApiError> {
    let session = StreamSession::counted(UnitKind::Event, 10, Duration::from_secs(1));
    streaming_response(&state, session)
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn rate(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 / secs
    } else {
        0.0
    }
}
