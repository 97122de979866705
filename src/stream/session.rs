//! Stream session description.

use std::time::Duration;

use crate::stream::units::UnitKind;

/// Byte-level structure of the emitted stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Units are written as-is.
    Raw,
    /// Every unit is framed with the chunk codec and the stream ends with the
    /// zero-size terminator.
    Chunked,
}

/// When a stream stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    /// Exactly this many units.
    Count(u64),
    /// Until this much time has passed since the first tick was scheduled.
    Duration(Duration),
}

/// One in-flight streaming response, minus its sink.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub unit: UnitKind,
    pub framing: Framing,
    /// Delay between units (count bound) or ticker period (duration bound).
    pub cadence: Duration,
    pub bound: Bound,
}

impl StreamSession {
    /// Emit `count` units, waiting `cadence` between them.
    pub fn counted(unit: UnitKind, count: u64, cadence: Duration) -> Self {
        Self {
            unit,
            framing: Framing::Raw,
            cadence,
            bound: Bound::Count(count),
        }
    }

    /// Emit one unit per `interval` until `duration` has elapsed.
    pub fn timed(unit: UnitKind, duration: Duration, interval: Duration) -> Self {
        Self {
            unit,
            framing: Framing::Raw,
            cadence: interval,
            bound: Bound::Duration(duration),
        }
    }

    /// Switch to chunked framing.
    pub fn chunked(mut self) -> Self {
        self.framing = Framing::Chunked;
        self
    }

    pub fn is_chunked(&self) -> bool {
        self.framing == Framing::Chunked
    }

    /// Content type advertised for this stream.
    pub fn content_type(&self) -> &'static str {
        self.unit.content_type()
    }
}
