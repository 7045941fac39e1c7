//! Counters shared between producers and the worker.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters. Producers and the worker bump these without locking.
#[derive(Debug, Default)]
pub struct WriterStats {
    pub(crate) enqueued: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) written: AtomicU64,
    pub(crate) opened: AtomicU64,
    pub(crate) evicted: AtomicU64,
    pub(crate) open_failures: AtomicU64,
    pub(crate) write_failures: AtomicU64,
    pub(crate) close_failures: AtomicU64,
    pub(crate) unknown_failures: AtomicU64,
}

impl WriterStats {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            open_failures: self.open_failures.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            unknown_failures: self.unknown_failures.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`WriterStats`] at one point in time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Entries accepted by the queue.
    pub enqueued: u64,
    /// Entries rejected by the queue.
    pub dropped: u64,
    /// Lines written and flushed.
    pub written: u64,
    /// Handles opened on cache misses.
    pub opened: u64,
    /// Handles released from the cache, by sweep, expiry on access, or shutdown.
    pub evicted: u64,
    /// Opens that failed.
    pub open_failures: u64,
    /// Writes or flushes that failed.
    pub write_failures: u64,
    /// Closes that failed during release.
    pub close_failures: u64,
    /// Per-entry faults caught by the worker.
    pub unknown_failures: u64,
}
