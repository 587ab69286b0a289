//! Seeded generator of accumulator blocks.

use merkle::{Hash, Hasher};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;

use super::Leaf;

/// Leaves appended and leaves spent in one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Block number, starting at 1.
    pub height: u64,
    /// New leaves.
    pub adds: Vec<Leaf>,
    /// Hashes of the leaves that expire in this block.
    pub dels: Vec<Hash>,
}

/// Produces a deterministic stream of blocks in which every leaf lives
/// for a random number of blocks.
pub struct Simulator {
    rng: ChaChaRng,
    hasher: Hasher<u64>,
    next_item: u64,
    height: u64,
    live: Vec<(Hash, u64)>,
    max_adds: usize,
    max_lifetime: u64,
}

impl Simulator {
    /// Up to 256 new leaves per block, each expiring within 8 blocks.
    pub fn new(seed: u64) -> Self {
        Self::with_limits(seed, 256, 8)
    }

    /// Up to `max_adds` new leaves per block, each living between 1 and `max_lifetime - 1` blocks.
    pub fn with_limits(seed: u64, max_adds: usize, max_lifetime: u64) -> Self {
        assert!(max_lifetime >= 2);
        Simulator {
            rng: ChaChaRng::seed_from_u64(seed),
            hasher: super::utreexo_hasher(),
            next_item: 0,
            height: 0,
            live: Vec::new(),
            max_adds,
            max_lifetime,
        }
    }

    /// Number of leaves that have been added and not yet expired.
    pub fn live(&self) -> usize {
        self.live.len()
    }

    /// Generates the next block.
    pub fn next_block(&mut self) -> Block {
        self.height += 1;
        let height = self.height;

        let (expired, live): (Vec<_>, Vec<_>) =
            self.live.drain(..).partition(|(_, expiry)| *expiry == height);
        self.live = live;
        let dels = expired.into_iter().map(|(hash, _)| hash).collect();

        let count = self.rng.gen_range(0, self.max_adds + 1);
        let mut adds = Vec::with_capacity(count);
        for _ in 0..count {
            self.next_item += 1;
            let hash = self.hasher.leaf(&self.next_item);
            let lifetime = self.rng.gen_range(1, self.max_lifetime);
            let remember = self.rng.gen_bool(0.5);
            self.live.push((hash, height + lifetime));
            adds.push(Leaf { hash, remember });
        }
        Block { height, adds, dels }
    }
}

impl Iterator for Simulator {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        Some(self.next_block())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_stream() {
        let a: Vec<Block> = Simulator::new(7).take(5).collect();
        let b: Vec<Block> = Simulator::new(7).take(5).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn leaves_expire_within_lifetime() {
        let mut sim = Simulator::with_limits(1, 16, 4);
        let mut added = std::collections::HashMap::new();
        for block in sim.by_ref().take(30) {
            for leaf in block.adds.iter() {
                added.insert(leaf.hash, block.height);
            }
            for hash in block.dels.iter() {
                let born = added.remove(hash).unwrap();
                assert!(block.height > born && block.height - born < 4);
            }
        }
        assert_eq!(added.len(), sim.live());
    }
}
