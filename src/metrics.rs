use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing tree build activity.
#[derive(Debug, Default)]
pub struct BuildMetrics {
    trees_built: AtomicU64,
    trees_failed: AtomicU64,
    nodes_persisted: AtomicU64,
}

impl BuildMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed build and the number of summary nodes persisted for it.
    pub fn record_success(&self, nodes_persisted: u64) {
        self.trees_built.fetch_add(1, Ordering::Relaxed);
        self.nodes_persisted
            .fetch_add(nodes_persisted, Ordering::Relaxed);
    }

    /// Record a failed build.
    pub fn record_failure(&self) {
        self.trees_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            trees_built: self.trees_built.load(Ordering::Relaxed),
            trees_failed: self.trees_failed.load(Ordering::Relaxed),
            nodes_persisted: self.nodes_persisted.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of build counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Builds that completed and were persisted since startup.
    pub trees_built: u64,
    /// Builds that ended in the failed state.
    pub trees_failed: u64,
    /// Summary nodes written across all completed builds.
    pub nodes_persisted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_builds_and_nodes() {
        let metrics = BuildMetrics::new();
        metrics.record_success(4);
        metrics.record_success(3);
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.trees_built, 2);
        assert_eq!(snapshot.trees_failed, 1);
        assert_eq!(snapshot.nodes_persisted, 7);
    }

    #[test]
    fn snapshot_starts_empty() {
        let metrics = BuildMetrics::new();
        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                trees_built: 0,
                trees_failed: 0,
                nodes_persisted: 0
            }
        );
    }
}
