//! WebSocket subsystem.
//!
//! # Data Flow
//! ```text
//! upgrade → socket.split()
//!     reader half → handler loop (parse envelope, reply via hub)
//!     writer half ← session::spawn_writer ← bounded queue ← hub task
//! ```

pub mod envelope;
pub mod hub;
pub mod session;

pub use envelope::Envelope;
pub use hub::{BroadcastReport, Connection, ConnectionHub, HubError, HubTask};
pub use session::{spawn_writer, WsSink};

/// Errors surfaced while establishing a WebSocket session.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("websocket upgrade failed: {0}")]
    UpgradeFailure(String),
}
