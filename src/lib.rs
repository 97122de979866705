//! Proxy testbed library.
//!
//! An HTTP/WebSocket origin server for exercising reverse proxies: chunked
//! transfers in both directions, cadence-driven streams, a WebSocket hub and a
//! load harness.

pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod loadtest;
pub mod net;
pub mod observability;
pub mod stream;
pub mod transfer;
pub mod ws;

pub use config::schema::HarnessConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
