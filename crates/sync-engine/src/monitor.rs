//! Progress reporting for applied index work.
//!
//! Monitors observe what backends apply; they never change the outcome.

use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for receiving indexing progress updates.
pub trait IndexingMonitor: Send + Sync {
    /// Documents written to an index unit (adds and updates).
    fn documents_added(&self, _count: u64) {}

    /// Documents removed from an index unit.
    fn documents_removed(&self, _count: u64) {}

    /// Operations applied, of any kind.
    fn operations_applied(&self, _count: u64) {}
}

/// A no-op monitor for when progress reporting isn't needed.
pub struct NoOpMonitor;

impl IndexingMonitor for NoOpMonitor {}

/// Monitor that keeps running totals.
#[derive(Debug, Default)]
pub struct CountingMonitor {
    added: AtomicU64,
    removed: AtomicU64,
    applied: AtomicU64,
}

impl CountingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn added(&self) -> u64 {
        self.added.load(Ordering::Relaxed)
    }

    pub fn removed(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }

    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }
}

impl IndexingMonitor for CountingMonitor {
    fn documents_added(&self, count: u64) {
        self.added.fetch_add(count, Ordering::Relaxed);
    }

    fn documents_removed(&self, count: u64) {
        self.removed.fetch_add(count, Ordering::Relaxed);
    }

    fn operations_applied(&self, count: u64) {
        self.applied.fetch_add(count, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_monitor() {
        let monitor = CountingMonitor::new();
        monitor.documents_added(3);
        monitor.documents_added(2);
        monitor.documents_removed(1);
        monitor.operations_applied(6);

        assert_eq!(monitor.added(), 5);
        assert_eq!(monitor.removed(), 1);
        assert_eq!(monitor.applied(), 6);
    }

    #[test]
    fn test_noop_monitor_accepts_everything() {
        let monitor = NoOpMonitor;
        monitor.documents_added(10);
        monitor.documents_removed(10);
        monitor.operations_applied(20);
    }
}
