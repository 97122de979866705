//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, trace, metrics layers)
//!     → handlers/ (transfer, stream, websocket, loadtest, echo)
//!     → request.rs (request ids, RequestInfo capture)
//!     → response.rs (ApiResponse envelope, ApiError → status)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestInfo, X_REQUEST_ID};
pub use response::{ApiError, ApiResponse};
pub use server::{AppState, HttpServer};
