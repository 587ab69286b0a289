use std::collections::{BTreeSet, HashMap};
use std::convert::TryFrom;

use merkle::{Hash, MiniHash, NodeHasher};
use readerwriter::{Decodable, Encodable, ExactSizeEncodable, ReadError, Reader, WriteError, Writer};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::UtreexoError;
use super::nodes::{Heap, NodeIndex};
use super::position::{
    detect_offset, detect_row, has_root, left_child, num_roots, parent, parent_many,
    root_position, row_offset, tree_rows, Position, MAX_LEAVES,
};
use super::proof::{self, proof_positions, BatchProof};
use super::transform::{self, Transform};
use super::Leaf;

/// Sparse forest.
///
/// A pollard always holds the roots. Beyond that it keeps only the leaves
/// marked to be remembered together with what is needed to prove them, plus
/// whatever a proof supplies for the duration of an update. A full pollard
/// keeps every node and can prove any leaf.
///
/// Children of a node are stored in its sibling's `niece` pair; a root keeps
/// its own children. Swapping two subtrees is then a swap of the two top
/// hashes and of the two niece pairs that hold their children.
pub struct Pollard<H: NodeHasher> {
    num_leaves: u64,
    /// Highest row first.
    roots: Vec<NodeIndex>,
    heap: Heap,
    hasher: H,
    positions: Option<HashMap<MiniHash, Position>>,
}

/// Leaf count and root hashes: all a pollard needs to start verifying.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct RootSet {
    /// Number of leaves in the forest.
    pub num_leaves: u64,
    /// Root hashes in ascending row order.
    pub roots: Vec<Hash>,
}

impl<H: NodeHasher> Pollard<H> {
    /// Creates an empty pollard that keeps only remembered leaves.
    pub fn new(hasher: H) -> Self {
        Pollard {
            num_leaves: 0,
            roots: Vec::new(),
            heap: Heap::with_capacity(0),
            hasher,
            positions: None,
        }
    }

    /// Creates an empty pollard that keeps every node and indexes leaves by hash.
    pub fn new_full(hasher: H) -> Self {
        Pollard {
            positions: Some(HashMap::new()),
            ..Self::new(hasher)
        }
    }

    /// Creates a pollard holding only the roots of an existing forest.
    pub fn from_roots(hasher: H, roots: &RootSet) -> Result<Self, UtreexoError> {
        if roots.num_leaves > MAX_LEAVES
            || roots.roots.len() != num_roots(roots.num_leaves)
            || roots.roots.iter().any(|h| h.is_empty())
        {
            return Err(UtreexoError::ProofMalformed);
        }
        let mut heap = Heap::with_capacity(roots.roots.len());
        let nodes = roots
            .roots
            .iter()
            .rev()
            .map(|h| heap.allocate(*h, false, [None, None]))
            .collect();
        Ok(Pollard {
            num_leaves: roots.num_leaves,
            roots: nodes,
            heap,
            hasher,
            positions: None,
        })
    }

    /// Returns true if the pollard keeps every node.
    pub fn is_full(&self) -> bool {
        self.positions.is_some()
    }

    /// Number of leaves in the forest.
    pub fn num_leaves(&self) -> u64 {
        self.num_leaves
    }

    /// Number of rows of the tallest tree that fits the leaves.
    pub fn rows(&self) -> u8 {
        tree_rows(self.num_leaves)
    }

    /// Root hashes in ascending row order.
    pub fn roots(&self) -> Vec<Hash> {
        self.roots
            .iter()
            .rev()
            .map(|&i| self.heap.node_at(i).hash)
            .collect()
    }

    /// Leaf count and roots.
    pub fn export_roots(&self) -> RootSet {
        RootSet {
            num_leaves: self.num_leaves,
            roots: self.roots(),
        }
    }

    /// Number of nodes held in memory.
    pub fn count_nodes(&self) -> usize {
        self.heap.len()
    }

    /// Position of the leaf with the given hash. Only full pollards index leaves.
    pub fn position_of(&self, hash: &Hash) -> Option<Position> {
        let pos = *self.positions.as_ref()?.get(&hash.mini())?;
        match self.leaf_at(pos) {
            Some(h) if h == *hash => Some(pos),
            _ => None,
        }
    }

    /// Hash of the leaf at `pos`, if the pollard holds it.
    pub fn leaf_at(&self, pos: Position) -> Option<Hash> {
        if pos >= self.num_leaves {
            return None;
        }
        let (node, _) = self.grab(pos).ok()?;
        node.map(|i| self.heap.node_at(i).hash)
    }

    /// Appends leaves.
    pub fn add(&mut self, leaves: &[Leaf]) -> Result<(), UtreexoError> {
        if leaves.iter().any(|l| l.hash.is_empty()) {
            return Err(UtreexoError::EmptyLeafRejected);
        }
        for leaf in leaves {
            self.add_one(leaf);
        }
        Ok(())
    }

    /// Checks a proof for `hashes` against the roots.
    /// Returns the hash of every node the proof covers, keyed by position.
    pub fn verify_batch(
        &self,
        hashes: &[Hash],
        proof: &BatchProof,
    ) -> Result<HashMap<Position, Hash>, UtreexoError> {
        proof::verify(
            &self.hasher,
            proof,
            hashes,
            &self.roots(),
            self.num_leaves,
            self.rows(),
        )
    }

    /// Populates the paths from the roots down to `targets` using
    /// the hashes of a verified proof.
    pub fn ingest(
        &mut self,
        targets: &[Position],
        hashes: &HashMap<Position, Hash>,
    ) -> Result<(), UtreexoError> {
        let rows = self.rows();
        for &target in targets {
            let offset = detect_offset(target, self.num_leaves, rows)
                .ok_or(UtreexoError::PositionOutOfRange(target))?;
            let mut pos = parent_many(target, offset.depth, rows);
            let mut sib = self.roots[offset.tree];
            for i in (0..offset.depth).rev() {
                let left = left_child(pos, rows);
                let niece = self.heap.node_at(sib).niece;
                let mut missing = [None; 2];
                for k in 0..2 {
                    if niece[k].is_none() {
                        let p = left | k as u64;
                        missing[k] = Some(
                            *hashes
                                .get(&p)
                                .ok_or(UtreexoError::InsufficientPollardData(p))?,
                        );
                    }
                }
                let mut pair = [0; 2];
                for k in 0..2 {
                    pair[k] = match (niece[k], missing[k]) {
                        (Some(n), _) => n,
                        (None, Some(hash)) => self.heap.allocate(hash, false, [None, None]),
                        (None, None) => unreachable!(),
                    };
                }
                self.heap
                    .update(sib, |n| n.niece = [Some(pair[0]), Some(pair[1])]);
                let b = ((offset.bits >> i) & 1) as usize;
                pos = left | b as u64;
                sib = pair[b ^ 1];
            }
        }
        Ok(())
    }

    /// Verifies and applies a block: removes the leaves proven by `proof`
    /// (whose hashes are `del_hashes`, in target order), then appends `adds`.
    pub fn modify(
        &mut self,
        adds: &[Leaf],
        del_hashes: &[Hash],
        proof: &BatchProof,
    ) -> Result<(), UtreexoError> {
        if adds.iter().any(|l| l.hash.is_empty()) {
            return Err(UtreexoError::EmptyLeafRejected);
        }
        let hashes = self.verify_batch(del_hashes, proof)?;
        if !proof.targets.is_empty() {
            self.ingest(&proof.targets, &hashes)?;
            self.remove(&proof.targets)?;
        }
        self.add(adds)?;
        debug!(
            adds = adds.len(),
            dels = proof.targets.len(),
            num_leaves = self.num_leaves,
            nodes = self.heap.len(),
            "modified pollard"
        );
        Ok(())
    }

    /// Removes the leaves at `dels`. Every node on their proof paths must be present.
    pub fn remove(&mut self, dels: &[Position]) -> Result<(), UtreexoError> {
        if dels.is_empty() {
            return Ok(());
        }
        let rows = self.rows();
        let t: Transform = transform::plan(dels, self.num_leaves, rows)?;

        let (needed, computed) = proof_positions(dels, self.num_leaves, rows);
        for &p in computed.iter().chain(needed.iter()) {
            if self.grab(p)?.0.is_none() {
                return Err(UtreexoError::InsufficientPollardData(p));
            }
        }

        for &d in dels {
            if let (Some(node), _) = self.grab(d)? {
                let hash = self.heap.node_at(node).hash;
                if let Some(map) = self.positions.as_mut() {
                    map.remove(&hash.mini());
                }
                self.heap.update(node, |n| {
                    n.hash = Hash::empty();
                    n.remember = false;
                });
            }
        }

        let mut dirty: Vec<Position> = Vec::new();
        for (row, s) in t.row_swaps() {
            self.swap_subtrees(s.from, s.to)?;
            for q in dirty.iter_mut() {
                *q = s.remap(*q, row, rows);
            }
            if row < rows {
                dirty.push(parent(s.from, rows));
                dirty.push(parent(s.to, rows));
            }
            if self.is_full() {
                self.reindex(s.from, row)?;
                self.reindex(s.to, row)?;
            }
        }
        self.rehash(dirty, &t, rows)?;

        let mut new_roots = Vec::with_capacity(t.roots.len());
        for &(_, x) in t.roots.iter() {
            let (node, holder) = self.grab(x)?;
            let node = *self
                .heap
                .node_at(node.ok_or(UtreexoError::InsufficientPollardData(x))?);
            let niece = match holder {
                Some(h) => self.heap.take_nieces(h),
                None => [None, None],
            };
            new_roots.push(self.heap.allocate(node.hash, node.remember, niece));
        }
        let old_roots = std::mem::replace(&mut self.roots, new_roots);
        for root in old_roots {
            self.heap.release(root);
        }
        self.num_leaves -= dels.len() as u64;

        let new_rows = self.rows();
        if self.is_full() {
            for &(row, x) in t.roots.iter() {
                let y = root_position(self.num_leaves, row, new_rows);
                let first_x = (x - row_offset(row, rows)) << row;
                let first_y = (y - row_offset(row, new_rows)) << row;
                if first_x != first_y {
                    self.reindex(y, row)?;
                }
            }
        } else {
            for i in 0..self.roots.len() {
                self.prune(self.roots[i]);
            }
        }
        Ok(())
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
        let proof = self.prove_positions(&targets)?;
        Ok((proof, found.into_iter().map(|(_, h)| h).collect()))
    }

    /// Builds a proof for the leaves at `targets` from the nodes the pollard holds.
    pub fn prove_positions(&self, targets: &[Position]) -> Result<BatchProof, UtreexoError> {
        let mut targets = targets.to_vec();
        targets.sort_unstable();
        if let Some(w) = targets.windows(2).find(|w| w[0] == w[1]) {
            return Err(UtreexoError::DuplicateTarget(w[0]));
        }
        if let Some(&bad) = targets.iter().find(|&&t| t >= self.num_leaves) {
            return Err(UtreexoError::PositionOutOfRange(bad));
        }
        let (needed, _) = proof_positions(&targets, self.num_leaves, self.rows());
        let proof = needed
            .iter()
            .map(|&p| match self.grab(p)? {
                (Some(node), _) => Ok(self.heap.node_at(node).hash),
                (None, _) => Err(UtreexoError::InsufficientPollardData(p)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BatchProof { targets, proof })
    }

    /// Finds the node at `pos` and the node holding its children.
    /// Either is `None` when the pollard does not hold it.
    fn grab(
        &self,
        pos: Position,
    ) -> Result<(Option<NodeIndex>, Option<NodeIndex>), UtreexoError> {
        let offset = detect_offset(pos, self.num_leaves, self.rows())
            .ok_or(UtreexoError::PositionOutOfRange(pos))?;
        let root = self.roots[offset.tree];
        let mut node = Some(root);
        let mut sib = Some(root);
        for i in (0..offset.depth).rev() {
            let holder = match sib {
                Some(s) => s,
                None => return Ok((None, None)),
            };
            let niece = self.heap.node_at(holder).niece;
            let b = ((offset.bits >> i) & 1) as usize;
            node = niece[b];
            sib = niece[b ^ 1];
        }
        Ok((node, sib))
    }

    fn add_one(&mut self, leaf: &Leaf) {
        let pos = self.num_leaves;
        let mut node = self.heap.allocate(leaf.hash, leaf.remember, [None, None]);
        let mut row = 0;
        while has_root(self.num_leaves, row) {
            let left = match self.roots.pop() {
                Some(left) => left,
                None => unreachable!("a root exists for every set bit of the leaf count"),
            };
            self.heap.swap_nieces(left, node);
            let hash = self
                .hasher
                .parent(&self.heap.node_at(left).hash, &self.heap.node_at(node).hash);
            let joined = self.heap.allocate(hash, false, [Some(left), Some(node)]);
            if !self.is_full() {
                self.prune_pair(joined);
            }
            node = joined;
            row += 1;
        }
        self.roots.push(node);
        self.num_leaves += 1;
        if let Some(map) = self.positions.as_mut() {
            map.insert(leaf.hash.mini(), pos);
        }
    }

    /// Exchanges the subtrees at `a` and `b`, both on the same row.
    fn swap_subtrees(&mut self, a: Position, b: Position) -> Result<(), UtreexoError> {
        let (node_a, holder_a) = self.grab(a)?;
        let (node_b, holder_b) = self.grab(b)?;
        let node_a = node_a.ok_or(UtreexoError::InsufficientPollardData(a))?;
        let node_b = node_b.ok_or(UtreexoError::InsufficientPollardData(b))?;

        let na = *self.heap.node_at(node_a);
        let nb = *self.heap.node_at(node_b);
        self.heap.update(node_a, |n| {
            n.hash = nb.hash;
            n.remember = nb.remember;
        });
        self.heap.update(node_b, |n| {
            n.hash = na.hash;
            n.remember = na.remember;
        });

        match (holder_a, holder_b) {
            (Some(x), Some(y)) => self.heap.swap_nieces(x, y),
            (Some(x), None) | (None, Some(x)) => {
                for n in self.heap.take_nieces(x).iter().flatten() {
                    self.heap.release(*n);
                }
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Recomputes the hashes at `dirty` positions and their ancestors within the surviving trees.
    fn rehash(&mut self, dirty: Vec<Position>, t: &Transform, rows: u8) -> Result<(), UtreexoError> {
        let mut queue: BTreeSet<Position> = dirty.into_iter().collect();
        while let Some(pos) = queue.iter().next().copied() {
            queue.remove(&pos);
            if !t.is_retained(pos, rows) {
                continue;
            }
            let (node, holder) = self.grab(pos)?;
            let missing = UtreexoError::InsufficientPollardData(pos);
            let node = node.ok_or_else(|| missing.clone())?;
            let holder = holder.ok_or_else(|| missing.clone())?;
            let (l, r) = match self.heap.node_at(holder).niece {
                [Some(l), Some(r)] => (l, r),
                _ => return Err(missing),
            };
            let hash = self
                .hasher
                .parent(&self.heap.node_at(l).hash, &self.heap.node_at(r).hash);
            self.heap.update(node, |n| n.hash = hash);
            if !t.is_surviving_root(pos) {
                queue.insert(parent(pos, rows));
            }
        }
        Ok(())
    }

    /// Updates the position index for every leaf under `pos` at `row`.
    fn reindex(&mut self, pos: Position, row: u8) -> Result<(), UtreexoError> {
        let (node, holder) = self.grab(pos)?;
        let mut leaves = Vec::new();
        self.collect_leaves(pos, row, node, holder, &mut leaves);
        if let Some(map) = self.positions.as_mut() {
            for (p, hash) in leaves {
                if !hash.is_empty() {
                    map.insert(hash.mini(), p);
                }
            }
        }
        Ok(())
    }

    fn collect_leaves(
        &self,
        pos: Position,
        row: u8,
        node: Option<NodeIndex>,
        holder: Option<NodeIndex>,
        out: &mut Vec<(Position, Hash)>,
    ) {
        if row == 0 {
            if let Some(n) = node {
                out.push((pos, self.heap.node_at(n).hash));
            }
            return;
        }
        let holder = match holder {
            Some(h) => h,
            None => return,
        };
        let [l, r] = self.heap.node_at(holder).niece;
        let rows = self.rows();
        let left = left_child(pos, rows);
        debug_assert_eq!(detect_row(left, rows), row - 1);
        self.collect_leaves(left, row - 1, l, r, out);
        self.collect_leaves(left | 1, row - 1, r, l, out);
    }

    /// Drops the pair of children held by `holder` if neither is remembered
    /// and neither holds children of its own.
    fn prune_pair(&mut self, holder: NodeIndex) {
        let niece = self.heap.node_at(holder).niece;
        let prunable = niece.iter().all(|n| match n {
            Some(i) => {
                let node = self.heap.node_at(*i);
                !node.remember && !node.has_nieces()
            }
            None => true,
        });
        if prunable {
            for n in self.heap.take_nieces(holder).iter().flatten() {
                self.heap.release(*n);
            }
        }
    }

    /// Prunes everything below `holder` that no remembered leaf depends on.
    fn prune(&mut self, holder: NodeIndex) {
        let niece = self.heap.node_at(holder).niece;
        for n in niece.iter().flatten() {
            self.prune(*n);
        }
        self.prune_pair(holder);
    }
}

impl Encodable for RootSet {
    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError> {
        w.write_u64(b"num_leaves", self.num_leaves)?;
        for root in self.roots.iter() {
            root.encode(w)?;
        }
        Ok(())
    }
}

impl ExactSizeEncodable for RootSet {
    fn encoded_size(&self) -> usize {
        8 + 32 * self.roots.len()
    }
}

impl Decodable for RootSet {
    fn decode(r: &mut impl Reader) -> Result<Self, ReadError> {
        let num_leaves = r.read_u64()?;
        if num_leaves > MAX_LEAVES {
            return Err(ReadError::LimitExceeded {
                len: usize::try_from(num_leaves).unwrap_or(usize::MAX),
                limit: usize::try_from(MAX_LEAVES).unwrap_or(usize::MAX),
            });
        }
        let roots = r.read_vec(num_roots(num_leaves), 32, Hash::decode)?;
        Ok(RootSet { num_leaves, roots })
    }
}
