use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection pool statistics snapshot.
///
/// Read-only; taking a snapshot never blocks on the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Maximum number of open connections.
    pub max_open: usize,
    /// Maximum number of idle connections.
    pub max_idle: usize,
    /// Connections currently open, idle or in use.
    pub open: usize,
    /// Connections sitting in the idle set.
    pub idle: usize,
    /// Connections currently leased to a session or transaction.
    pub in_use: usize,
    /// Acquirers currently suspended, waiting for a release or a handshake.
    pub waiting: usize,
    /// Total number of acquisitions that had to wait on a saturated pool.
    pub wait_count: u64,
    /// Total time spent waiting by those acquisitions.
    pub wait_duration: Duration,
    /// Connections closed because the idle set was full.
    pub max_idle_closed: u64,
    /// Connections closed because they outlived the max lifetime.
    pub max_lifetime_closed: u64,
}

impl PoolStats {
    /// Returns the utilization percentage of the pool (0.0 to 1.0).
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.max_open == 0 {
            0.0
        } else {
            self.in_use as f64 / self.max_open as f64
        }
    }

    /// Returns whether the pool is under pressure (high utilization or waiting requests).
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.waiting > 0 || self.utilization() > 0.8
    }

    /// Returns whether every connection the pool may open is leased.
    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.idle == 0 && self.open >= self.max_open
    }
}

/// Cumulative counters updated by the pool and its manager.
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    waiting: AtomicUsize,
    in_use: AtomicUsize,
    wait_count: AtomicU64,
    wait_duration_ns: AtomicU64,
    max_idle_closed: AtomicU64,
    max_lifetime_closed: AtomicU64,
}

impl PoolCounters {
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Marks one acquirer as waiting until the returned guard is dropped.
    pub fn enter_wait(&self) -> WaitGuard<'_> {
        self.waiting.fetch_add(1, Ordering::AcqRel);
        WaitGuard { counters: self }
    }

    pub fn lease(&self) {
        self.in_use.fetch_add(1, Ordering::AcqRel);
    }

    pub fn unlease(&self) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn record_wait(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        self.wait_duration_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn record_idle_closed(&self) {
        self.max_idle_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lifetime_closed(&self) {
        self.max_lifetime_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Fills in the cumulative fields of a snapshot.
    pub fn fill(&self, stats: &mut PoolStats) {
        stats.waiting = self.waiting();
        stats.in_use = self.in_use();
        stats.wait_count = self.wait_count.load(Ordering::Relaxed);
        stats.wait_duration = Duration::from_nanos(self.wait_duration_ns.load(Ordering::Relaxed));
        stats.max_idle_closed = self.max_idle_closed.load(Ordering::Relaxed);
        stats.max_lifetime_closed = self.max_lifetime_closed.load(Ordering::Relaxed);
    }
}

/// Decrements the waiting counter on drop, including when the waiting future
/// is dropped by cancellation.
pub(crate) struct WaitGuard<'a> {
    counters: &'a PoolCounters,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.counters.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}
