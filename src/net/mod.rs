//! Network session bookkeeping.
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade / streaming response
//!     → connection.rs (ConnectionId, tracker guard held by the session task)
//!     → guard dropped when the session ends → gauge updated
//! ```

pub mod connection;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
