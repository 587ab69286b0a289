//! Utreexo: a hash-based dynamic accumulator.
//!
//! The set of leaves is committed to by a forest of perfect binary Merkle
//! trees, one per set bit of the leaf count. Leaves are appended at the
//! right edge and removed in batches by swapping subtrees into the holes
//! they leave, so the forest stays a sequence of perfect trees.
//!
//! Two forests implement it:
//! - `Forest` keeps every node in a flat `Store`, proves any leaf and can
//!   roll a block back with its `UndoBlock`;
//! - `Pollard` keeps the roots plus the nodes needed to prove the leaves
//!   it was asked to remember, and learns the rest from `BatchProof`s.

#![deny(missing_docs)]

use merkle::MerkleItem;
use serde::{Deserialize, Serialize};

mod config;
mod error;
mod forest;
mod nodes;
mod pollard;
pub mod position;
mod proof;
pub mod sim;
mod store;
pub mod transform;
mod undo;


pub use self::config::{Config, ConfiguredStore, ForestConfig, PollardConfig, StoreKind};
pub use self::error::UtreexoError;
pub use self::forest::{Forest, Metrics};
pub use self::pollard::{Pollard, RootSet};
pub use self::position::Position;
pub use self::proof::{proof_positions, verify, BatchProof, MAX_PROOF_ITEMS};
pub use self::store::{CachedStore, FileStore, MemStore, Store};
pub use self::undo::{UndoBlock, MAX_UNDO_ITEMS};
pub use merkle::{Hash, Hasher, MiniHash, NodeHasher};

/// Leaf to be added to the accumulator.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Leaf {
    /// Hash committed to by the forest.
    pub hash: Hash,
    /// Hint for sparse forests to keep this leaf provable.
    pub remember: bool,
}

impl Leaf {
    /// Leaf that sparse forests forget once added.
    pub fn new(hash: Hash) -> Self {
        Leaf {
            hash,
            remember: false,
        }
    }

    /// Leaf that sparse forests keep provable.
    pub fn remembered(hash: Hash) -> Self {
        Leaf {
            hash,
            remember: true,
        }
    }
}

/// Utreexo-labeled hasher.
pub fn utreexo_hasher<T: MerkleItem>() -> Hasher<T> {
    Hasher::new(b"utreexo")
}
