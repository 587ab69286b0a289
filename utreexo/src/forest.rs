use std::collections::{BTreeSet, HashMap};

use merkle::{Hash, MiniHash, NodeHasher};
use serde::Serialize;
use tracing::{debug, trace};

use super::error::UtreexoError;
use super::position::{
    child_many, detect_row, has_root, in_forest, is_root_position, left_child, parent,
    right_child, root_positions, row_offset, Position,
};
use super::proof::{self, proof_positions, BatchProof};
use super::store::{rows_for_size, Store};
use super::transform::{self, Transform};
use super::undo::UndoBlock;
use super::Leaf;

/// Dense forest: every node of every tree is kept in a flat store.
///
/// The forest can prove any of its leaves and can roll back the most
/// recent `modify` call with the `UndoBlock` it returned.
pub struct Forest<S: Store, H: NodeHasher> {
    num_leaves: u64,
    rows: u8,
    store: S,
    hasher: H,
    positions: HashMap<MiniHash, Position>,
}

/// Size counters of a dense forest.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize)]
pub struct Metrics {
    /// Number of live leaves.
    pub num_leaves: u64,
    /// Number of rows the layout currently spans.
    pub rows: u8,
    /// Number of slots in the backing store.
    pub store_size: u64,
    /// Number of entries in the hash-to-position map.
    pub position_map_len: usize,
}

impl<S: Store, H: NodeHasher> Forest<S, H> {
    /// Creates an empty forest over an empty store.
    pub fn new(mut store: S, hasher: H) -> Result<Self, UtreexoError> {
        if store.size() != 0 {
            return Err(UtreexoError::Store(
                "store already holds a forest; use Forest::restore".into(),
            ));
        }
        store.resize(1)?;
        Ok(Forest {
            num_leaves: 0,
            rows: 0,
            store,
            hasher,
            positions: HashMap::new(),
        })
    }

    /// Reopens a forest of `num_leaves` leaves previously written to `store`.
    pub fn restore(store: S, hasher: H, num_leaves: u64) -> Result<Self, UtreexoError> {
        let size = store.size();
        let rows = rows_for_size(size);
        if size == 0 || (2u64 << rows) - 1 != size || num_leaves > 1u64 << rows {
            return Err(UtreexoError::Store(format!(
                "store of {} slots cannot hold {} leaves",
                size, num_leaves
            )));
        }
        let mut positions = HashMap::with_capacity(num_leaves as usize);
        for pos in 0..num_leaves {
            let hash = store.read(pos)?;
            if hash.is_empty() {
                return Err(UtreexoError::Store(format!("leaf {} is missing", pos)));
            }
            positions.insert(hash.mini(), pos);
        }
        debug!(num_leaves, rows, "restored forest");
        Ok(Forest {
            num_leaves,
            rows,
            store,
            hasher,
            positions,
        })
    }

    /// Number of live leaves.
    pub fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    /// Number of rows of the layout. Only ever grows.
    pub fn rows(&self) -> u8 {
        self.rows
    }

    /// Root hashes in ascending row order.
    pub fn roots(&self) -> Result<Vec<Hash>, UtreexoError> {
        root_positions(self.num_leaves, self.rows)
            .map(|(_, pos)| self.store.read(pos))
            .collect()
    }

    /// Hash of the leaf at `pos`.
    pub fn leaf_at(&self, pos: Position) -> Result<Hash, UtreexoError> {
        if pos >= self.num_leaves {
            return Err(UtreexoError::PositionOutOfRange(pos));
        }
        self.store.read(pos)
    }

    /// Position of the leaf with the given hash.
    pub fn position_of(&self, hash: &Hash) -> Option<Position> {
        let pos = *self.positions.get(&hash.mini())?;
        match self.store.read(pos) {
            Ok(h) if h == *hash => Some(pos),
            _ => None,
        }
    }

    /// Size counters.
    pub fn metrics(&self) -> Metrics {
        Metrics {
            num_leaves: self.num_leaves,
            rows: self.rows,
            store_size: self.store.size(),
            position_map_len: self.positions.len(),
        }
    }

    /// Backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Flushes the backing store.
    pub fn close(&mut self) -> Result<(), UtreexoError> {
        self.store.close()
    }

    /// Appends leaves, growing the layout as needed.
    pub fn add(&mut self, leaves: &[Leaf]) -> Result<(), UtreexoError> {
        if leaves.iter().any(|l| l.hash.is_empty()) {
            return Err(UtreexoError::EmptyLeafRejected);
        }
        for leaf in leaves {
            if self.num_leaves >= 1u64 << self.rows {
                self.grow()?;
            }
            self.add_one(leaf.hash)?;
        }
        Ok(())
    }

    /// Removes the leaves at `dels`, then appends `adds`.
    /// Returns the data needed to roll the change back.
    pub fn modify(&mut self, adds: &[Leaf], dels: &[Position]) -> Result<UndoBlock, UtreexoError> {
        if adds.iter().any(|l| l.hash.is_empty()) {
            return Err(UtreexoError::EmptyLeafRejected);
        }
        let mut dels = dels.to_vec();
        dels.sort_unstable();
        if let Some(&bad) = dels.iter().find(|&&d| d >= self.num_leaves) {
            return Err(UtreexoError::PositionOutOfRange(bad));
        }
        if let Some(w) = dels.windows(2).find(|w| w[0] == w[1]) {
            return Err(UtreexoError::DuplicateTarget(w[0]));
        }

        let target = self.num_leaves - dels.len() as u64 + adds.len() as u64;
        while target > 1u64 << self.rows {
            self.grow()?;
        }

        let hashes = dels
            .iter()
            .map(|&d| self.store.read(d))
            .collect::<Result<Vec<_>, _>>()?;

        self.remove(&dels)?;
        self.add(adds)?;

        debug!(
            adds = adds.len(),
            dels = dels.len(),
            num_leaves = self.num_leaves,
            "modified forest"
        );
        Ok(UndoBlock {
            num_adds: adds.len() as u32,
            positions: dels,
            hashes,
        })
    }

    /// Builds a proof for the leaves with the given hashes.
    /// Returns the proof and the hashes reordered to match its sorted targets.
    pub fn prove_batch(&self, hashes: &[Hash]) -> Result<(BatchProof, Vec<Hash>), UtreexoError> {
        let mut found = Vec::with_capacity(hashes.len());
        for hash in hashes {
            let pos = self
                .position_of(hash)
                .ok_or(UtreexoError::HashNotFound(*hash))?;
            found.push((pos, *hash));
        }
        found.sort_unstable_by_key(|(pos, _)| *pos);
        if let Some(w) = found.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(UtreexoError::DuplicateTarget(w[0].0));
        }
        let targets: Vec<Position> = found.iter().map(|(pos, _)| *pos).collect();
        let (needed, _) = proof_positions(&targets, self.num_leaves, self.rows);
        let proof = needed
            .iter()
            .map(|&pos| self.store.read(pos))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((
            BatchProof { targets, proof },
            found.into_iter().map(|(_, h)| h).collect(),
        ))
    }

    /// Checks a proof for `hashes`, given in the order of the proof's targets.
    pub fn verify_batch(&self, hashes: &[Hash], proof: &BatchProof) -> Result<(), UtreexoError> {
        let roots = self.roots()?;
        proof::verify(
            &self.hasher,
            proof,
            hashes,
            &roots,
            self.num_leaves,
            self.rows,
        )
        .map(|_| ())
    }

    /// Rolls back the most recent `modify`, which must have returned `undo`.
    pub fn undo(&mut self, undo: &UndoBlock) -> Result<(), UtreexoError> {
        let num_adds = undo.num_adds as u64;
        if undo.positions.len() != undo.hashes.len()
            || num_adds > self.num_leaves
            || undo.positions.windows(2).any(|w| w[0] >= w[1])
            || undo.hashes.iter().any(|h| h.is_empty())
        {
            return Err(UtreexoError::UndoShapeMismatch);
        }
        let before_adds = self.num_leaves - num_adds;
        let original = before_adds + undo.positions.len() as u64;
        if original > 1u64 << self.rows {
            return Err(UtreexoError::UndoShapeMismatch);
        }
        let t = transform::plan(&undo.positions, original, self.rows)
            .map_err(|_| UtreexoError::UndoShapeMismatch)?;

        for pos in before_adds..self.num_leaves {
            let hash = self.store.read(pos)?;
            self.positions.remove(&hash.mini());
            self.store.write(pos, Hash::empty())?;
        }
        self.num_leaves = before_adds;

        for &(row, s) in t.collapses.iter().rev() {
            self.swap_subtrees(s.from, s.to, row)?;
        }
        for (row, s) in t.row_swaps().rev() {
            self.swap_subtrees(s.from, s.to, row)?;
        }
        for (&pos, &hash) in undo.positions.iter().zip(undo.hashes.iter()) {
            self.store.write(pos, hash)?;
            self.positions.insert(hash.mini(), pos);
        }
        self.num_leaves = original;

        let rows = self.rows;
        let dirty = t
            .row_swaps()
            .flat_map(|(_, s)| vec![s.from, s.to])
            .chain(undo.positions.iter().copied())
            .filter(|&p| !is_root_position(p, original, rows))
            .map(|p| parent(p, rows));
        self.rehash(
            dirty,
            |q| in_forest(q, original, rows),
            |q| is_root_position(q, original, rows),
        )?;
        debug!(num_leaves = original, "undid forest block");
        Ok(())
    }

    /// Deletes leaves at the sorted, unique positions `dels`.
    fn remove(&mut self, dels: &[Position]) -> Result<(), UtreexoError> {
        if dels.is_empty() {
            return Ok(());
        }
        let rows = self.rows;
        let t: Transform = transform::plan(dels, self.num_leaves, rows)?;

        for &d in dels {
            let hash = self.store.read(d)?;
            self.positions.remove(&hash.mini());
            self.store.write(d, Hash::empty())?;
        }

        let mut dirty: Vec<Position> = Vec::new();
        for (row, s) in t.row_swaps() {
            self.swap_subtrees(s.from, s.to, row)?;
            for q in dirty.iter_mut() {
                *q = s.remap(*q, row, rows);
            }
            if row < rows {
                dirty.push(parent(s.from, rows));
                dirty.push(parent(s.to, rows));
            }
        }
        self.rehash(
            dirty,
            |q| t.is_retained(q, rows),
            |q| t.is_surviving_root(q),
        )?;
        for &(row, s) in t.collapses.iter() {
            self.swap_subtrees(s.from, s.to, row)?;
        }
        self.num_leaves -= dels.len() as u64;
        trace!(
            swaps = t.row_swaps().count(),
            collapses = t.collapses.len(),
            "removed leaves"
        );
        Ok(())
    }

    fn add_one(&mut self, hash: Hash) -> Result<(), UtreexoError> {
        let mut pos = self.num_leaves;
        self.store.write(pos, hash)?;
        self.positions.insert(hash.mini(), pos);

        let mut node = hash;
        let mut row = 0;
        while has_root(self.num_leaves, row) {
            let left = self.store.read(pos ^ 1)?;
            node = self.hasher.parent(&left, &node);
            pos = parent(pos, self.rows);
            self.store.write(pos, node)?;
            row += 1;
        }
        self.num_leaves += 1;
        Ok(())
    }

    /// Adds a row on top of the layout, moving every upper row to its new offset.
    fn grow(&mut self) -> Result<(), UtreexoError> {
        let old = self.rows;
        let new = old + 1;
        self.store.resize((2u64 << new) - 1)?;
        for row in (1..=old).rev() {
            let from = row_offset(row, old);
            let to = row_offset(row, new);
            for i in 0..(1u64 << (old - row)) {
                let hash = self.store.read(from + i)?;
                self.store.write(to + i, hash)?;
            }
        }
        for pos in (1u64 << old)..((2u64 << old) - 1) {
            self.store.write(pos, Hash::empty())?;
        }
        self.rows = new;
        debug!(rows = new, "grew forest");
        Ok(())
    }

    /// Exchanges the subtrees rooted at `a` and `b`, both on `row`.
    fn swap_subtrees(&mut self, a: Position, b: Position, row: u8) -> Result<(), UtreexoError> {
        if a == b {
            return Ok(());
        }
        for depth in (0..=row).rev() {
            let start_a = child_many(a, depth, self.rows);
            let start_b = child_many(b, depth, self.rows);
            for i in 0..(1u64 << depth) {
                let ha = self.store.read(start_a + i)?;
                let hb = self.store.read(start_b + i)?;
                self.store.write(start_a + i, hb)?;
                self.store.write(start_b + i, ha)?;
                if depth == row {
                    if !hb.is_empty() {
                        self.positions.insert(hb.mini(), start_a + i);
                    }
                    if !ha.is_empty() {
                        self.positions.insert(ha.mini(), start_b + i);
                    }
                }
            }
        }
        Ok(())
    }

    /// Recomputes the hashes at `dirty` positions and their ancestors, lowest first.
    /// Positions failing `keep` are skipped; positions passing `stop` are not propagated upwards.
    fn rehash(
        &mut self,
        dirty: impl IntoIterator<Item = Position>,
        keep: impl Fn(Position) -> bool,
        stop: impl Fn(Position) -> bool,
    ) -> Result<(), UtreexoError> {
        let rows = self.rows;
        let mut queue: BTreeSet<Position> = dirty.into_iter().collect();
        while let Some(pos) = queue.iter().next().copied() {
            queue.remove(&pos);
            if !keep(pos) {
                continue;
            }
            debug_assert!(detect_row(pos, rows) > 0);
            let left = self.store.read(left_child(pos, rows))?;
            let right = self.store.read(right_child(pos, rows))?;
            if left.is_empty() || right.is_empty() {
                self.store.write(pos, Hash::empty())?;
                continue;
            }
            self.store.write(pos, self.hasher.parent(&left, &right))?;
            if !stop(pos) {
                queue.insert(parent(pos, rows));
            }
        }
        Ok(())
    }
}
