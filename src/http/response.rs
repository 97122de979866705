//! Response envelope and error mapping for the non-streaming endpoints.
//!
//! # Design Decisions
//! - Every JSON answer is `{ code, message, data, timestamp, request_id }`
//! - `code` mirrors the HTTP status
//! - Errors carry their subsystem error and map to a status in one place

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::clock::unix_timestamp;
use crate::http::request::{new_request_id, request_id};
use crate::loadtest::HarnessError;
use crate::observability::metrics;
use crate::stream::StreamError;
use crate::transfer::ChunkError;
use crate::ws::HubError;

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T = Value> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub timestamp: i64,
    pub request_id: String,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: message.into(),
            data: Some(data),
            timestamp: unix_timestamp(),
            request_id: new_request_id(),
        }
    }

    /// Echo the id assigned by the request-id layer.
    pub fn with_request_id(mut self, headers: &HeaderMap) -> Self {
        self.request_id = request_id(headers);
        self
    }
}

impl ApiResponse<Value> {
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            data: None,
            timestamp: unix_timestamp(),
            request_id: new_request_id(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid chunked body: {0}")]
    Decode(#[from] ChunkError),
    #[error("{0}")]
    BadRequest(String),
    #[error("load run rejected: {0}")]
    Harness(#[from] HarnessError),
    #[error("{0}")]
    Hub(#[from] HubError),
    #[error("{0}")]
    Stream(#[from] StreamError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Decode(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Harness(_)
            | ApiError::Hub(_)
            | ApiError::Stream(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Decode(e) => {
                metrics::record_decode_error(e.kind());
                tracing::warn!(error = %self, "Rejected request body");
            }
            ApiError::BadRequest(_) => tracing::debug!(error = %self, "Bad request"),
            _ => tracing::error!(error = %self, "Request failed"),
        }
        ApiResponse::error(status, self.to_string()).into_response()
    }
}
