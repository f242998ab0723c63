//! Per-worker pseudorandom number generator, used for uniform-random victim
//! selection and for drawing the 31-bit sample the topology-weighted policy
//! binary-searches on.

use std::cell::Cell;

/// [xorshift*], seeded per worker from its rank rather than from entropy -
/// workers don't need unpredictability against each other, just a cheap,
/// well-distributed stream that never repeats across ranks.
///
/// [xorshift*]: https://en.wikipedia.org/wiki/Xorshift#xorshift*
pub struct Rng {
    state: Cell<u64>,
}

impl Rng {
    /// Seeds from `rank`; any non-zero seed works, so the rank is folded
    /// through a cheap mix function to avoid the all-zero state for rank 0.
    pub fn seeded(rank: usize) -> Self {
        let mut seed = (rank as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(1);
        if seed == 0 {
            seed = 1;
        }
        Self { state: Cell::new(seed) }
    }

    fn next(&self) -> u64 {
        let mut x = self.state.get();
        debug_assert_ne!(x, 0);
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state.set(x);
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Returns a value in `0..n`. `n` must be nonzero.
    pub fn next_usize(&self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }

    /// Returns a value in `0..2^31`, the draw the topology-weighted steal
    /// policy binary-searches a probability row with.
    pub fn next_u31(&self) -> u32 {
        (self.next() >> 33) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_ranks_produce_distinct_streams() {
        let a = Rng::seeded(0);
        let b = Rng::seeded(1);
        let seq_a: Vec<_> = (0..8).map(|_| a.next_usize(1_000_000)).collect();
        let seq_b: Vec<_> = (0..8).map(|_| b.next_usize(1_000_000)).collect();
        assert_ne!(seq_a, seq_b);
    }

    #[test]
    fn next_u31_stays_within_range() {
        let rng = Rng::seeded(7);
        for _ in 0..1000 {
            assert!(rng.next_u31() < (1 << 31));
        }
    }

    #[test]
    fn next_usize_stays_within_range() {
        let rng = Rng::seeded(42);
        for _ in 0..1000 {
            assert!(rng.next_usize(5) < 5);
        }
    }
}
