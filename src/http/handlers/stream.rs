//! Line and SSE streams under `/api`.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::Response;

use crate::http::handlers::{param, streaming_response, QueryParams};
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::stream::{StreamSession, UnitKind};

/// `GET /api/stream/{lines}`
pub async fn stream_lines(
    State(state): State<AppState>,
    Path(lines): Path<String>,
) -> Result<Response, ApiError> {
    let streaming = &state.config.streaming;
    let count = streaming.lines.resolve(Some(&lines));
    let session = StreamSession::counted(
        UnitKind::Line,
        count,
        Duration::from_millis(streaming.line_interval_ms),
    );
    streaming_response(&state, session)
}

/// `GET /api/sse?count&interval`
pub async fn stream_events(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Response, ApiError> {
    let streaming = &state.config.streaming;
    let count = param(&params, "count", &streaming.sse_count);
    let interval = param(&params, "interval", &streaming.sse_interval_ms);
    let session = StreamSession::counted(UnitKind::Event, count, Duration::from_millis(interval));
    streaming_response(&state, session)
}
