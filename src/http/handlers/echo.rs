//! Request echo, version and health.

use std::net::SocketAddr;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, Method, Uri};
use serde_json::{json, Value};

use crate::http::request::RequestInfo;
use crate::http::response::{ApiError, ApiResponse};
use crate::http::server::AppState;

/// `ANY /api/test`: report what arrived.
pub async fn request_info(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    body: Body,
) -> Result<ApiResponse<RequestInfo>, ApiError> {
    let body = to_bytes(body, state.config.security.max_body_size)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    let info = RequestInfo::capture(&method, &uri, &headers, &query, Some(remote), &body);
    Ok(ApiResponse::success("request received", info).with_request_id(&headers))
}

/// `GET /api/version`
pub async fn version(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse<Value> {
    let hub_clients = state.hub.client_count().await.ok();
    let data = json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
        "active_streams": state.streams.active_count(),
        "active_websockets": state.sockets.active_count(),
        "peak_streams": state.streams.peak_count(),
        "peak_websockets": state.sockets.peak_count(),
        "hub_clients": hub_clients,
    });
    ApiResponse::success("version", data).with_request_id(&headers)
}

/// `GET /health`
pub async fn health(headers: HeaderMap) -> ApiResponse<Value> {
    ApiResponse::success("healthy", json!({ "status": "healthy" })).with_request_id(&headers)
}
