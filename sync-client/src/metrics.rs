//! Operational counters for sync activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operational metrics for monitoring sync activity.
///
/// All counters are monotonically increasing (reset only on restart).
/// Shared between the orchestrator and its sessions via `Arc`.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Sessions started (initiator and responder).
    pub sessions_started: AtomicU64,
    /// Sessions that committed merged data.
    pub sessions_completed: AtomicU64,
    /// Sessions that ended with an error.
    pub sessions_failed: AtomicU64,
    /// Sessions cancelled by the application.
    pub sessions_cancelled: AtomicU64,
    /// Connection attempts, first tries included.
    pub attempts_total: AtomicU64,
    /// Attempts that followed a recoverable failure.
    pub retries_total: AtomicU64,
    /// Data chunks put on the wire, retransmissions included.
    pub chunks_sent: AtomicU64,
    /// Chunks sent again after a retransmit request.
    pub chunks_retransmitted: AtomicU64,
    /// Events merged with at least one conflicting field, over completed sessions.
    pub conflicts_resolved: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// See [`SyncMetrics::sessions_started`].
    pub sessions_started: u64,
    /// See [`SyncMetrics::sessions_completed`].
    pub sessions_completed: u64,
    /// See [`SyncMetrics::sessions_failed`].
    pub sessions_failed: u64,
    /// See [`SyncMetrics::sessions_cancelled`].
    pub sessions_cancelled: u64,
    /// See [`SyncMetrics::attempts_total`].
    pub attempts_total: u64,
    /// See [`SyncMetrics::retries_total`].
    pub retries_total: u64,
    /// See [`SyncMetrics::chunks_sent`].
    pub chunks_sent: u64,
    /// See [`SyncMetrics::chunks_retransmitted`].
    pub chunks_retransmitted: u64,
    /// See [`SyncMetrics::conflicts_resolved`].
    pub conflicts_resolved: u64,
}

impl SyncMetrics {
    /// Add one to a counter.
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n` to a counter.
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            sessions_started: load(&self.sessions_started),
            sessions_completed: load(&self.sessions_completed),
            sessions_failed: load(&self.sessions_failed),
            sessions_cancelled: load(&self.sessions_cancelled),
            attempts_total: load(&self.attempts_total),
            retries_total: load(&self.retries_total),
            chunks_sent: load(&self.chunks_sent),
            chunks_retransmitted: load(&self.chunks_retransmitted),
            conflicts_resolved: load(&self.conflicts_resolved),
        }
    }
}
