//! Batch proofs of membership.
//!
//! A batch proof names the target leaves and carries exactly the hashes a
//! verifier cannot compute on its own: the siblings of every node on the
//! paths from the targets to their roots, unless the sibling is itself on
//! such a path. Proof hashes are ordered by row, then by position.

use std::collections::HashMap;

use merkle::{Hash, NodeHasher};
use readerwriter::{Decodable, Encodable, ExactSizeEncodable, ReadError, Reader, WriteError, Writer};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::UtreexoError;
use super::position::{detect_row, has_root, num_roots, parent, root_position, Position};

/// Upper bound on the number of targets or proof hashes accepted from the wire.
pub const MAX_PROOF_ITEMS: usize = 1 << 16;

/// Proof that a set of leaves is present in the forest.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct BatchProof {
    /// Positions of the leaves, in ascending order.
    pub targets: Vec<Position>,
    /// Hashes of the nodes needed to recompute the roots.
    pub proof: Vec<Hash>,
}

/// Positions whose hashes make up a proof for `targets`, ordered by row, then by position.
/// Also returns every position the verifier computes on the way, targets included.
///
/// Targets may sit on any row, which lets the same routine describe partial proofs.
pub fn proof_positions(
    targets: &[Position],
    num_leaves: u64,
    rows: u8,
) -> (Vec<Position>, Vec<Position>) {
    let mut by_row: Vec<Position> = targets.to_vec();
    by_row.sort_unstable();
    by_row.dedup();

    let mut needed = Vec::new();
    let mut computed = Vec::new();
    let mut promoted: Vec<Position> = Vec::new();

    for r in 0..=rows {
        let mut row: Vec<Position> = by_row
            .iter()
            .copied()
            .filter(|&t| detect_row(t, rows) == r)
            .chain(promoted.drain(..))
            .collect();
        row.sort_unstable();
        row.dedup();
        computed.extend_from_slice(&row);

        if has_root(num_leaves, r) && row.last() == Some(&root_position(num_leaves, r, rows)) {
            row.pop();
        }
        if r == rows {
            debug_assert!(row.is_empty());
            break;
        }

        let mut i = 0;
        while i < row.len() {
            let t = row[i];
            if i + 1 < row.len() && t | 1 == row[i + 1] {
                i += 2;
            } else {
                needed.push(t ^ 1);
                i += 1;
            }
            promoted.push(parent(t, rows));
        }
    }
    (needed, computed)
}

/// Checks `proof` against the claimed leaf `hashes` and the forest `roots`
/// (given in ascending row order). On success returns the hash of every node
/// the proof covers, keyed by position, in the layout of a forest with
/// `num_leaves` leaves and `rows` rows.
pub fn verify<H: NodeHasher>(
    hasher: &H,
    proof: &BatchProof,
    hashes: &[Hash],
    roots: &[Hash],
    num_leaves: u64,
    rows: u8,
) -> Result<HashMap<Position, Hash>, UtreexoError> {
    let mut map = HashMap::new();
    if proof.targets.is_empty() {
        return if hashes.is_empty() && proof.proof.is_empty() {
            Ok(map)
        } else {
            Err(UtreexoError::ProofMalformed)
        };
    }
    if proof.targets.len() != hashes.len() {
        return Err(UtreexoError::ProofMalformed);
    }
    if proof.targets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(UtreexoError::ProofMalformed);
    }
    if let Some(&t) = proof.targets.iter().find(|&&t| t >= num_leaves) {
        return Err(UtreexoError::PositionOutOfRange(t));
    }
    if roots.len() != num_roots(num_leaves) {
        return Err(UtreexoError::ProofMismatch);
    }
    if hashes.iter().chain(proof.proof.iter()).any(|h| h.is_empty()) {
        warn!("proof carries an empty hash");
        return Err(UtreexoError::ProofMismatch);
    }

    let (positions, _) = proof_positions(&proof.targets, num_leaves, rows);
    if positions.len() != proof.proof.len() {
        return Err(UtreexoError::ProofMalformed);
    }
    map.extend(proof.targets.iter().copied().zip(hashes.iter().copied()));
    map.extend(positions.iter().copied().zip(proof.proof.iter().copied()));

    let mut row: Vec<Position> = proof.targets.clone();
    for r in 0..=rows {
        let mut next = Vec::with_capacity(row.len() / 2 + 1);
        let mut i = 0;
        while i < row.len() {
            let t = row[i];
            if has_root(num_leaves, r) && t == root_position(num_leaves, r, rows) {
                let index = (0..r).filter(|&k| has_root(num_leaves, k)).count();
                let hash = map.get(&t).ok_or(UtreexoError::ProofMalformed)?;
                if !hash.ct_eq(&roots[index]) {
                    warn!(row = r, targets = proof.targets.len(), "proof does not match root");
                    return Err(UtreexoError::ProofMismatch);
                }
                i += 1;
                continue;
            }
            let sibling_computed = i + 1 < row.len() && t | 1 == row[i + 1];
            let left = map.get(&(t & !1)).ok_or(UtreexoError::ProofMalformed)?;
            let right = map.get(&(t | 1)).ok_or(UtreexoError::ProofMalformed)?;
            let p = parent(t, rows);
            let hash = hasher.parent(left, right);
            map.insert(p, hash);
            next.push(p);
            i += if sibling_computed { 2 } else { 1 };
        }
        if next.is_empty() {
            break;
        }
        row = next;
    }
    Ok(map)
}

impl Encodable for BatchProof {
    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError> {
        w.write_u32(b"num_targets", self.targets.len() as u32)?;
        w.write_u32(b"num_proof", self.proof.len() as u32)?;
        for t in self.targets.iter() {
            w.write_u64(b"target", *t)?;
        }
        for h in self.proof.iter() {
            h.encode(w)?;
        }
        Ok(())
    }
}

impl ExactSizeEncodable for BatchProof {
    fn encoded_size(&self) -> usize {
        8 + self.targets.len() * 8 + self.proof.len() * 32
    }
}

impl Decodable for BatchProof {
    fn decode(r: &mut impl Reader) -> Result<Self, ReadError> {
        let num_targets = r.read_size(MAX_PROOF_ITEMS)?;
        let num_proof = r.read_size(MAX_PROOF_ITEMS)?;
        let targets = r.read_vec(num_targets, 8, |r| r.read_u64())?;
        let proof = r.read_vec(num_proof, 32, Hash::decode)?;
        Ok(BatchProof { targets, proof })
    }
}

impl BatchProof {
    /// Parses a proof from its wire encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, UtreexoError> {
        Ok(Self::decode_exact(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Siblings of every computed ancestor that are not computed themselves.
    fn oracle(targets: &[Position], num_leaves: u64, rows: u8) -> Vec<Position> {
        let mut computed = HashSet::new();
        for &t in targets {
            let mut p = t;
            loop {
                computed.insert(p);
                let r = detect_row(p, rows);
                if has_root(num_leaves, r) && root_position(num_leaves, r, rows) == p {
                    break;
                }
                p = parent(p, rows);
            }
        }
        let mut needed: Vec<_> = computed
            .iter()
            .filter(|&&p| {
                let r = detect_row(p, rows);
                !(has_root(num_leaves, r) && root_position(num_leaves, r, rows) == p)
            })
            .map(|p| p ^ 1)
            .filter(|s| !computed.contains(s))
            .collect();
        needed.sort_by_key(|&p| (detect_row(p, rows), p));
        needed
    }

    #[test]
    fn positions_for_mixed_rows() {
        // 15 leaves in 4 rows, targets on rows 0 and 1
        let targets = [2, 3, 5, 10, 11, 20];
        let (needed, _) = proof_positions(&targets, 15, 4);
        assert_eq!(needed, oracle(&targets, 15, 4));
    }

    #[test]
    fn positions_match_oracle() {
        for n in 1..33u64 {
            let rows = crate::position::tree_rows(n);
            for stride in 1..5u64 {
                let targets: Vec<_> = (0..n).step_by(stride as usize).collect();
                let (needed, computed) = proof_positions(&targets, n, rows);
                assert_eq!(needed, oracle(&targets, n, rows), "n={} stride={}", n, stride);
                assert!(targets.iter().all(|t| computed.contains(t)));
            }
        }
    }

    #[test]
    fn root_targets_need_nothing() {
        // a lone leaf at the end of 5 leaves is its own root
        let (needed, _) = proof_positions(&[4], 5, 3);
        assert!(needed.is_empty());
    }

    #[test]
    fn wire_format() {
        let proof = BatchProof {
            targets: vec![1, 7],
            proof: vec![Hash::from([3u8; 32])],
        };
        let bytes = proof.encode_to_vec();
        assert_eq!(bytes.len(), proof.encoded_size());
        assert_eq!(&bytes[0..8], &[0, 0, 0, 2, 0, 0, 0, 1]);
        assert_eq!(&bytes[8..16], &[0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(BatchProof::from_bytes(&bytes), Ok(proof));
        assert_eq!(
            BatchProof::from_bytes(&bytes[..bytes.len() - 1]),
            Err(UtreexoError::ProofMalformed)
        );
    }

    #[test]
    fn rejects_oversized_counts() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0];
        assert_eq!(
            BatchProof::from_bytes(&bytes),
            Err(UtreexoError::ProofMalformed)
        );
    }
}
