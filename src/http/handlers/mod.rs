//! Route handlers.
//!
//! Short request/response handlers answer with [`ApiResponse`]; streaming
//! handlers hand a [`StreamSession`] to [`streaming_response`], which runs the
//! producer in its own task and returns the body immediately.
//!
//! [`ApiResponse`]: crate::http::response::ApiResponse

pub mod echo;
pub mod loadtest;
pub mod stream;
pub mod transfer;
pub mod websocket;

use std::collections::HashMap;
use std::io;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use futures_util::TryStreamExt;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

use crate::config::ParamBounds;
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::stream::{self as producer, body_from_receiver, ChannelSink, StreamSession};

/// Frames buffered between a producer and the response body.
const STREAM_QUEUE: usize = 4;

/// Raw query parameters, resolved per handler against configured bounds.
pub type QueryParams = HashMap<String, String>;

/// Resolve `name` against `bounds`: missing or unparsable means default,
/// anything else is clamped.
pub fn param(params: &QueryParams, name: &str, bounds: &ParamBounds) -> u64 {
    bounds.resolve(params.get(name).map(String::as_str))
}

/// Whether the request declares a chunked transfer coding.
pub fn is_chunked(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("chunked"))
}

/// Adapt a request body into a buffered async reader.
pub fn body_reader(body: Body) -> impl AsyncBufRead + Unpin {
    StreamReader::new(body.into_data_stream().map_err(io::Error::other))
}

/// Start `session` in the background and return its streaming response.
pub fn streaming_response(state: &AppState, session: StreamSession) -> Result<Response, ApiError> {
    let guard = state.streams.track();
    let (mut sink, rx) = ChannelSink::new(STREAM_QUEUE);
    let mut cancel = state.shutdown.clone();
    let chunked = session.is_chunked();
    let content_type = session.content_type();

    tokio::spawn(async move {
        let stream_id = guard.id();
        tracing::debug!(stream_id = %stream_id, unit = session.unit.label(), "Stream started");
        if let Err(e) = producer::run(&session, &mut sink, &mut cancel).await {
            tracing::debug!(stream_id = %stream_id, error = %e, "Stream ended early");
        }
        drop(guard);
    });

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive");
    if chunked {
        builder = builder.header(header::TRANSFER_ENCODING, "chunked");
    }
    builder
        .body(body_from_receiver(rx))
        .map_err(|e| ApiError::Internal(e.to_string()))
}
