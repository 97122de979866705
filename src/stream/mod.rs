//! Streaming producers.
//!
//! # Data Flow
//! ```text
//! StreamSession (unit kind, framing, cadence, bound)
//!     → producer::run renders a unit, frames it (raw or chunked)
//!     → StreamSink::write + flush
//!     → ChannelSink → HTTP body        or   WsSink → WebSocket text frames
//! ```

pub mod producer;
pub mod session;
pub mod sink;
pub mod units;

pub use producer::{run, StreamError, StreamOutcome, StreamSummary};
pub use session::{Bound, Framing, StreamSession};
pub use sink::{body_from_receiver, ChannelSink, StreamSink};
pub use units::{UnitContext, UnitKind};
