//! Load-test harness.
//!
//! # Data Flow
//! ```text
//! /test/* handler (parameters clamped by ParamBounds)
//!     → harness.rs (admission check, spawn units under a semaphore / workers)
//!     → stats.rs (StatsRecorder, one mutex, O(1) updates)
//!     → RunStats / PacedStats / BatchOutcome back to the handler
//! ```

pub mod harness;
pub mod stats;

pub use harness::{BatchItem, BatchOutcome, HarnessError, HarnessLimits, LoadHarness, PacedStats};
pub use stats::{RunStats, StatsRecorder};
