//! Per-worker profiling counters.
//!
//! Deliberately narrow: four atomic counters, not a DAG/profiling recorder
//! (that collaborator is out of scope). This is exactly the interface a
//! profiling collaborator would be handed, and the only thing S4's
//! steal-count sanity check needs to observe.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct WorkerStats {
    spawned: AtomicU64,
    steal_attempts: AtomicU64,
    steal_hits: AtomicU64,
    overflow_rejections: AtomicU64,
}

/// A point-in-time snapshot of a worker's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub spawned: u64,
    pub steal_attempts: u64,
    pub steal_hits: u64,
    pub overflow_rejections: u64,
}

impl WorkerStats {
    pub(crate) fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_steal_attempt(&self) {
        self.steal_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_steal_hit(&self) {
        self.steal_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overflow_rejection(&self) {
        self.overflow_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            spawned: self.spawned.load(Ordering::Relaxed),
            steal_attempts: self.steal_attempts.load(Ordering::Relaxed),
            steal_hits: self.steal_hits.load(Ordering::Relaxed),
            overflow_rejections: self.overflow_rejections.load(Ordering::Relaxed),
        }
    }
}

impl std::ops::Add for StatsSnapshot {
    type Output = StatsSnapshot;

    fn add(self, rhs: StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            spawned: self.spawned + rhs.spawned,
            steal_attempts: self.steal_attempts + rhs.steal_attempts,
            steal_hits: self.steal_hits + rhs.steal_hits,
            overflow_rejections: self.overflow_rejections + rhs.overflow_rejections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_sum_across_workers() {
        let a = StatsSnapshot { spawned: 3, steal_attempts: 1, steal_hits: 1, overflow_rejections: 0 };
        let b = StatsSnapshot { spawned: 2, steal_attempts: 4, steal_hits: 0, overflow_rejections: 1 };
        let total = a + b;
        assert_eq!(total.spawned, 5);
        assert_eq!(total.steal_attempts, 5);
    }
}
