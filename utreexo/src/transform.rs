//! Deletion planner.
//!
//! Deleting leaves leaves holes in the forest. The planner fills them by
//! exchanging whole subtrees, one row at a time from the leaves up, so that
//! every row ends up with at most one surviving tree root. The surviving
//! roots are then moved to the slots they occupy in a forest of
//! `num_leaves - deletions` leaves.
//!
//! The same plan drives the dense forest and the pollard, and its inverse
//! drives undo: every swap exchanges two equally tall subtrees, so applying
//! the swaps of a plan in reverse order restores the original layout.

use super::error::UtreexoError;
use super::position::{
    detect_row, has_root, parent, parent_many, root_position, Position,
};

/// Exchange of the subtrees rooted at `from` and `to`.
/// Both positions are on the same row.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Swap {
    /// Position whose subtree moves into `to`.
    pub from: Position,
    /// Position whose subtree moves into `from`.
    pub to: Position,
}

impl Swap {
    /// Maps a position under either end of the swap (at `row`) to its location after the swap.
    /// Positions elsewhere are returned unchanged.
    pub fn remap(&self, pos: Position, row: u8, rows: u8) -> Position {
        let pos_row = detect_row(pos, rows);
        if pos_row > row {
            return pos;
        }
        let depth = row - pos_row;
        let ancestor = parent_many(pos, depth, rows);
        if ancestor == self.from || ancestor == self.to {
            pos ^ ((self.from ^ self.to) << depth)
        } else {
            pos
        }
    }
}

/// Rearrangement that removes a batch of leaves.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Transform {
    /// Swaps grouped by row, starting with row 0.
    pub swaps: Vec<Vec<Swap>>,
    /// Surviving roots after the row swaps, highest row first, as `(row, position)`.
    pub roots: Vec<(u8, Position)>,
    /// Moves of surviving roots into their final slots, as `(row, swap)`,
    /// applied in order after the row swaps.
    pub collapses: Vec<(u8, Swap)>,
}

impl Transform {
    /// Returns true if `pos` lies within one of the surviving trees,
    /// in the layout right after the row swaps.
    pub fn is_retained(&self, pos: Position, rows: u8) -> bool {
        let row = detect_row(pos, rows);
        self.roots
            .iter()
            .any(|&(r, x)| r >= row && parent_many(pos, r - row, rows) == x)
    }

    /// Returns true if `pos` is a surviving root, in the layout right after the row swaps.
    pub fn is_surviving_root(&self, pos: Position) -> bool {
        self.roots.iter().any(|&(_, x)| x == pos)
    }

    /// Iterates over all row swaps, lowest row first, with their rows.
    pub fn row_swaps(&self) -> impl DoubleEndedIterator<Item = (u8, &Swap)> {
        self.swaps
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().map(move |s| (r as u8, s)))
    }
}

/// Plans the removal of `dels` from a forest of `num_leaves` leaves laid out in `rows` rows.
/// `dels` must not contain duplicates; their order does not matter.
pub fn plan(dels: &[Position], num_leaves: u64, rows: u8) -> Result<Transform, UtreexoError> {
    if let Some(&bad) = dels.iter().find(|&&d| d >= num_leaves) {
        return Err(UtreexoError::PositionOutOfRange(bad));
    }
    let mut dels = dels.to_vec();
    dels.sort_unstable();
    if let Some(w) = dels.windows(2).find(|w| w[0] == w[1]) {
        return Err(UtreexoError::DuplicateTarget(w[0]));
    }
    let remaining = num_leaves - dels.len() as u64;

    let mut swaps = Vec::with_capacity(rows as usize + 1);
    let mut pending: Vec<(u8, Position)> = Vec::new();

    for r in 0..=rows {
        let mut root_present = has_root(num_leaves, r);
        let root = root_position(num_leaves, r, rows);
        if root_present && dels.last() == Some(&root) {
            dels.pop();
            root_present = false;
        }

        let mut next = Vec::with_capacity(dels.len() / 2 + 1);
        let mut rest = Vec::with_capacity(dels.len());
        let mut i = 0;
        while i < dels.len() {
            if i + 1 < dels.len() && dels[i] | 1 == dels[i + 1] {
                next.push(parent(dels[i], rows));
                i += 2;
            } else {
                rest.push(dels[i]);
                i += 1;
            }
        }

        let mut row_swaps = Vec::with_capacity(rest.len() / 2 + 1);
        let pairs = rest.chunks_exact(2);
        let odd = pairs.remainder().first().copied();
        for pair in pairs {
            row_swaps.push(Swap {
                from: pair[1] ^ 1,
                to: pair[0],
            });
            next.push(parent(pair[1], rows));
        }
        let mut new_pending = None;
        match (odd, root_present) {
            (Some(d), true) => row_swaps.push(Swap { from: root, to: d }),
            (Some(d), false) => {
                new_pending = Some(d ^ 1);
                next.push(parent(d, rows));
            }
            (None, true) => new_pending = Some(root),
            (None, false) => {}
        }

        for s in row_swaps.iter() {
            for p in pending.iter_mut() {
                p.1 = s.remap(p.1, r, rows);
            }
        }
        if let Some(x) = new_pending {
            pending.push((r, x));
        }
        swaps.push(row_swaps);

        if r == rows {
            debug_assert!(next.is_empty(), "deletions above the top row");
            break;
        }
        next.sort_unstable();
        dels = next;
    }

    debug_assert_eq!(
        pending.iter().map(|(r, _)| 1u64 << r).sum::<u64>(),
        remaining
    );

    pending.reverse();
    let roots = pending.clone();

    let mut collapses = Vec::new();
    for idx in 0..pending.len() {
        let (r, x) = pending[idx];
        let y = root_position(remaining, r, rows);
        if x == y {
            continue;
        }
        let s = Swap { from: x, to: y };
        for lower in pending[idx + 1..].iter_mut() {
            lower.1 = s.remap(lower.1, r, rows);
        }
        collapses.push((r, s));
    }

    Ok(Transform {
        swaps,
        roots,
        collapses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{child_many, detect_row, root_positions, tree_rows};

    /// Applies a plan to an explicit array of leaf labels and returns the surviving labels in order.
    fn simulate(dels: &[Position], num_leaves: u64, rows: u8) -> Vec<u64> {
        let t = plan(dels, num_leaves, rows).unwrap();
        let mut leaves: Vec<Option<u64>> = (0..1u64 << rows).map(Some).collect();
        for &d in dels {
            leaves[d as usize] = None;
        }
        let exchange = |leaves: &mut Vec<Option<u64>>, s: &Swap, row: u8| {
            let a = child_many(s.from, row, rows) as usize;
            let b = child_many(s.to, row, rows) as usize;
            for k in 0..(1usize << row) {
                leaves.swap(a + k, b + k);
            }
        };
        for (r, s) in t.row_swaps() {
            exchange(&mut leaves, s, r);
        }
        for (r, s) in t.collapses.iter() {
            exchange(&mut leaves, s, *r);
        }
        let remaining = num_leaves - dels.len() as u64;
        // every surviving leaf sits below a canonical root
        for p in 0..remaining {
            assert!(leaves[p as usize].is_some(), "hole at {}", p);
        }
        leaves[..remaining as usize]
            .iter()
            .map(|l| l.unwrap())
            .collect()
    }

    #[test]
    fn no_deletions_keeps_roots_in_place() {
        let t = plan(&[], 7, 3).unwrap();
        assert!(t.row_swaps().next().is_none());
        assert!(t.collapses.is_empty());
        let mut expected: Vec<_> = root_positions(7, 3).collect();
        expected.reverse();
        assert_eq!(t.roots, expected);
    }

    #[test]
    fn deleting_the_last_leaf() {
        let t = plan(&[7], 8, 3).unwrap();
        assert!(t.swaps[0].is_empty());
        assert_eq!(t.roots, vec![(2, 12), (1, 10), (0, 6)]);
        assert!(t.collapses.is_empty());
    }

    #[test]
    fn deleting_a_twin_pair() {
        // leaves 2 and 3 go away together, the tree of 4..8 drops its right half
        let got = simulate(&[2, 3], 8, 3);
        assert_eq!(got.len(), 6);
        let mut sorted = got.clone();
        sorted.sort();
        assert_eq!(sorted, vec![0, 1, 4, 5, 6, 7]);
    }

    #[test]
    fn single_deletion_in_a_full_tree() {
        let t = plan(&[0], 4, 2).unwrap();
        // leaf 1 is left alone on row 0, the right half stays on row 1
        assert_eq!(t.roots.len(), 2);
        assert_eq!(t.roots[0].0, 1);
        assert_eq!(t.roots[1].0, 0);
        let got = simulate(&[0], 4, 2);
        let mut sorted = got.clone();
        sorted.sort();
        assert_eq!(sorted, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_out_of_range_and_duplicates() {
        assert_eq!(plan(&[5], 5, 3), Err(UtreexoError::PositionOutOfRange(5)));
        assert_eq!(plan(&[1, 1], 5, 3), Err(UtreexoError::DuplicateTarget(1)));
    }

    #[test]
    fn surviving_roots_match_remaining_count() {
        for n in 1..40u64 {
            let rows = tree_rows(n);
            for mask in [0b1u64, 0b101, 0b1110, 0b10011, 0b110101101].iter() {
                let dels: Vec<u64> = (0..n).filter(|p| (mask >> (p % 9)) & 1 == 1).collect();
                let t = plan(&dels, n, rows).unwrap();
                let remaining = n - dels.len() as u64;
                let rows_left: u64 = t.roots.iter().map(|(r, _)| 1u64 << r).sum();
                assert_eq!(rows_left, remaining);
                for &(r, x) in t.roots.iter() {
                    assert_eq!(detect_row(x, rows), r);
                }
                let got = simulate(&dels, n, rows);
                let mut sorted = got.clone();
                sorted.sort();
                let expected: Vec<u64> = (0..n).filter(|p| !dels.contains(p)).collect();
                assert_eq!(sorted, expected);
            }
        }
    }

    #[test]
    fn plan_does_not_depend_on_extra_rows() {
        let dels = [1, 4, 5, 9, 12];
        let tight = simulate(&dels, 14, 4);
        let wide = simulate(&dels, 14, 6);
        assert_eq!(tight, wide);
    }

    #[test]
    fn swap_remaps_descendants() {
        let s = Swap { from: 12, to: 13 };
        // rows = 3: 12 covers leaves 0..4, 13 covers 4..8
        assert_eq!(s.remap(1, 2, 3), 5);
        assert_eq!(s.remap(6, 2, 3), 2);
        assert_eq!(s.remap(9, 2, 3), 11);
        assert_eq!(s.remap(14, 2, 3), 14);
        assert_eq!(s.remap(13, 2, 3), 12);
    }
}
