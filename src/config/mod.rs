//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, path from PROXY_TESTBED_CONFIG)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HarnessConfig (validated, immutable)
//!     → shared via Arc to all handlers
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Query parameters are clamped through `ParamBounds`, so handlers never
//!   hand out-of-range values to the streaming or load subsystems

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{
    HarnessConfig, ListenerConfig, LoadTestConfig, ObservabilityConfig, ParamBounds,
    SecurityConfig, StreamingConfig, TimeoutConfig, WebSocketConfig,
};
