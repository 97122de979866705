//! Connection identity and live-session accounting.
//!
//! # Responsibilities
//! - Hand out process-unique IDs to WebSocket peers and streams
//! - Count live sessions per kind with RAII guards
//! - Feed the session gauges

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::observability::metrics;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier, rendered as `conn-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        // Only uniqueness matters here.
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Counts {
    active: AtomicU64,
    peak: AtomicU64,
}

/// Live sessions of one kind ("stream", "websocket").
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    kind: &'static str,
    counts: Arc<Counts>,
}

impl ConnectionTracker {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            counts: Arc::default(),
        }
    }

    /// Open a session. It stays counted until the guard is dropped.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.counts.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counts.peak.fetch_max(active, Ordering::SeqCst);
        metrics::record_active_sessions(self.kind, active);

        ConnectionGuard {
            kind: self.kind,
            counts: Arc::clone(&self.counts),
            id: ConnectionId::new(),
            opened: Instant::now(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.counts.active.load(Ordering::SeqCst)
    }

    /// Highest concurrent count seen since startup.
    pub fn peak_count(&self) -> u64 {
        self.counts.peak.load(Ordering::SeqCst)
    }
}

/// Held by a session task for as long as the session lives.
#[derive(Debug)]
pub struct ConnectionGuard {
    kind: &'static str,
    counts: Arc<Counts>,
    id: ConnectionId,
    opened: Instant,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self
            .counts
            .active
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        metrics::record_active_sessions(self.kind, active);
        tracing::trace!(
            connection_id = %self.id,
            kind = self.kind,
            lifetime_ms = self.opened.elapsed().as_millis() as u64,
            "Session closed"
        );
    }
}
