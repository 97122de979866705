//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → main triggers Shutdown
//!
//! Shutdown (shutdown.rs):
//!     Shutdown::trigger → every ShutdownSignal fires
//!         → axum stops accepting, drains
//!         → hub task closes all connections
//!         → live streams stop before their next unit
//!         → duration-bounded load runs stop their workers
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
