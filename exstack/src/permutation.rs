//! Randomized per-peer flush order (spec §3 "Random peer permutation", §9).
//!
//! Exists solely to avoid every peer flushing to destination 0 first and
//! creating a synchronized hot-spot; any fixed-but-peer-dependent permutation
//! suffices. Reseeded on `reset`.

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// A session-local permutation of `[0, peers)`.
pub struct FlushOrder {
    order: Vec<usize>,
    peers: usize,
    rng: SmallRng,
}

impl FlushOrder {
    /// Builds a permutation for `peers` destinations, seeded from `self_peer`
    /// so that distinct peers in the same session start from different
    /// shuffles without needing a shared source of randomness.
    pub fn new(peers: usize, self_peer: usize) -> Self {
        let mut rng = SmallRng::seed_from_u64(self_peer as u64 ^ 0x5bd1_e995);
        let mut order: Vec<usize> = (0..peers).collect();
        order.shuffle(&mut rng);
        FlushOrder { order, peers, rng }
    }

    /// The current flush order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Reshuffles the permutation, as done on session `reset`.
    pub fn reseed(&mut self) {
        self.order.shuffle(&mut self.rng);
    }
}
