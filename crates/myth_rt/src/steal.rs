//! The victim-selection policy: which peer a worker tries to steal from
//! next, hot-swappable at runtime via [`crate::Runtime::set_steal_func`].
//!
//! Swapping the policy is an atomic pointer replace, not a CAS loop or a
//! lock: [`arc_swap::ArcSwap`] gives us that without introducing any new
//! unsafe code here, which a hand-rolled atomic-fn-pointer table would have.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::topology::ProbTable;

/// Picks the next worker rank a thief attempts to steal from: the
/// externally-pluggable half of the scheduler's steal function (§6's
/// `set_steal_func` hook). `draw` is a fresh, uniformly-distributed 31-bit
/// sample the runtime already drew for this attempt - handed in rather than
/// an RNG handle so a policy needs no access to the scheduler's internal
/// per-worker generator to be deterministic and side-effect-free.
///
/// Implementations must never return `rank` itself and must not block.
pub trait StealPolicy: Send + Sync {
    fn choose_victim(&self, rank: usize, workers: usize, draw: u32) -> usize;
}

/// Draws uniformly among every peer, excluding the caller. The default
/// policy; needs no precomputed state.
pub struct UniformRandom;

impl StealPolicy for UniformRandom {
    fn choose_victim(&self, rank: usize, workers: usize, draw: u32) -> usize {
        debug_assert!(workers > 1, "choose_victim requires at least one peer");
        let offset = (draw as usize) % (workers - 1);
        if offset >= rank { offset + 1 } else { offset }
    }
}

/// Draws from a precomputed topology-weighted cumulative distribution: `draw`
/// is binary-searched against the caller's row.
pub(crate) struct TopologyWeighted(pub(crate) ProbTable);

impl StealPolicy for TopologyWeighted {
    fn choose_victim(&self, rank: usize, _workers: usize, draw: u32) -> usize {
        self.0.victim(rank, draw)
    }
}

/// Shared, swappable handle to a worker pool's current steal policy. Cloned
/// into every [`crate::worker::Worker`]; [`crate::Runtime::set_steal_func`]
/// holds the one the builder created, so a swap through it reaches every
/// worker's clone immediately.
#[derive(Clone)]
pub(crate) struct StealHandle(Arc<ArcSwap<Box<dyn StealPolicy>>>);

impl StealHandle {
    pub fn new(policy: Box<dyn StealPolicy>) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(policy)))
    }

    /// Atomically installs a new policy for every worker sharing this
    /// handle, returning the one it replaced. In-flight steal attempts
    /// finish against whichever policy they already loaded.
    pub fn set(&self, policy: Box<dyn StealPolicy>) -> Arc<Box<dyn StealPolicy>> {
        self.0.swap(Arc::new(policy))
    }

    pub fn choose_victim(&self, rank: usize, workers: usize, draw: u32) -> usize {
        self.0.load().choose_victim(rank, workers, draw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_random_never_picks_self() {
        let policy = UniformRandom;
        for draw in 0..200u32 {
            let victim = policy.choose_victim(2, 5, draw);
            assert_ne!(victim, 2);
            assert!(victim < 5);
        }
    }

    #[test]
    fn handle_swap_takes_effect_immediately_and_returns_previous() {
        let handle = StealHandle::new(Box::new(UniformRandom));
        let _ = handle.choose_victim(0, 4, 7);

        struct AlwaysOne;
        impl StealPolicy for AlwaysOne {
            fn choose_victim(&self, _rank: usize, _workers: usize, _draw: u32) -> usize {
                1
            }
        }
        let previous = handle.set(Box::new(AlwaysOne));
        assert_eq!(handle.choose_victim(0, 4, 7), 1);
        assert_eq!(previous.choose_victim(0, 4, 0), previous.choose_victim(0, 4, 0));
    }
}
