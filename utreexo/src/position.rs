//! Positional algebra of the forest.
//!
//! A forest with `rows` rows lays out every node in a flat address space
//! of `(2 << rows) - 1` positions. Row 0 holds the leaves `0..1 << rows`,
//! each higher row follows immediately after the row below it:
//!
//! ```text
//! row 3:  14
//! row 2:  12              13
//! row 1:  08      09      10      11
//! row 0:  00  01  02  03  04  05  06  07
//! ```
//!
//! The row of a position is the number of leading one-bits in its
//! `rows + 1`-bit representation. None of these functions allocate.

/// Absolute position of a node in the forest.
pub type Position = u64;

/// Largest leaf count the position space can address: 63 rows.
pub const MAX_LEAVES: u64 = 1 << 63;

/// Mask of the `rows + 1` low bits that span the position space.
#[inline]
fn space_mask(rows: u8) -> u64 {
    (2u64 << rows).wrapping_sub(1)
}

/// Number of rows of the smallest perfect tree that covers `num_leaves` leaves.
pub fn tree_rows(num_leaves: u64) -> u8 {
    if num_leaves <= 1 {
        return 0;
    }
    (64 - (num_leaves - 1).leading_zeros()) as u8
}

/// Number of perfect trees (and therefore roots) in a forest of `num_leaves`.
pub fn num_roots(num_leaves: u64) -> usize {
    num_leaves.count_ones() as usize
}

/// Parent of a node.
#[inline]
pub fn parent(pos: Position, rows: u8) -> Position {
    (pos >> 1) | (1u64 << rows)
}

/// Ancestor `rise` rows above the node.
pub fn parent_many(pos: Position, rise: u8, rows: u8) -> Position {
    (0..rise).fold(pos, |p, _| parent(p, rows))
}

/// Left child of a node. Meaningless for row-0 positions.
#[inline]
pub fn left_child(pos: Position, rows: u8) -> Position {
    (pos << 1) & space_mask(rows)
}

/// Right child of a node. Meaningless for row-0 positions.
#[inline]
pub fn right_child(pos: Position, rows: u8) -> Position {
    left_child(pos, rows) | 1
}

/// Leftmost descendant `drop` rows below the node.
pub fn child_many(pos: Position, drop: u8, rows: u8) -> Position {
    (0..drop).fold(pos, |p, _| left_child(p, rows))
}

/// Sibling of a node.
#[inline]
pub fn sibling(pos: Position) -> Position {
    pos ^ 1
}

/// Returns true if the node is the right child of its parent.
#[inline]
pub fn is_right(pos: Position) -> bool {
    pos & 1 == 1
}

/// Row of a position in a forest of `rows` rows.
pub fn detect_row(pos: Position, rows: u8) -> u8 {
    let mut marker = 1u64 << rows;
    let mut row = 0u8;
    while pos & marker != 0 {
        marker >>= 1;
        row += 1;
    }
    row
}

/// First position of a row.
pub fn row_offset(row: u8, rows: u8) -> Position {
    (2u64 << rows).wrapping_sub(2u64 << (rows - row))
}

/// Largest valid position: the single node of the topmost row.
pub fn max_position(rows: u8) -> Position {
    space_mask(rows) - 1
}

/// Index of a node within its row.
pub fn row_index(pos: Position, rows: u8) -> u64 {
    pos - row_offset(detect_row(pos, rows), rows)
}

/// Position of the root at `row` for `num_leaves`, whether or not that root exists.
/// Callers check `has_root` first.
pub fn root_position(num_leaves: u64, row: u8, rows: u8) -> Position {
    let index = num_leaves.checked_shr(row as u32 + 1).unwrap_or(0) << 1;
    row_offset(row, rows) + index
}

/// Returns true if a forest of `num_leaves` has a root at `row`.
#[inline]
pub fn has_root(num_leaves: u64, row: u8) -> bool {
    num_leaves.checked_shr(row as u32).unwrap_or(0) & 1 == 1
}

/// Root positions in ascending row order.
pub fn root_positions(num_leaves: u64, rows: u8) -> impl Iterator<Item = (u8, Position)> {
    (0..=rows)
        .filter(move |&r| has_root(num_leaves, r))
        .map(move |r| (r, root_position(num_leaves, r, rows)))
}

/// Returns true if `pos` is one of the roots.
pub fn is_root_position(pos: Position, num_leaves: u64, rows: u8) -> bool {
    let row = detect_row(pos, rows);
    has_root(num_leaves, row) && root_position(num_leaves, row, rows) == pos
}

/// Returns true if `pos` is reachable from one of the roots of `num_leaves`.
pub fn in_forest(pos: Position, num_leaves: u64, rows: u8) -> bool {
    if pos < num_leaves {
        return true;
    }
    if pos > max_position(rows) {
        return false;
    }
    let mask = space_mask(rows);
    let mut p = pos;
    // descend along the right edge down to the rightmost leaf
    while p & (1u64 << rows) != 0 {
        p = ((p << 1) & mask) | 1;
    }
    p < num_leaves
}

/// Location of a node relative to the tree that contains it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Offset {
    /// Index of the tree among the roots, counted from the highest row.
    pub tree: usize,
    /// Row of the tree's root.
    pub tree_row: u8,
    /// Number of steps from the root down to the node.
    pub depth: u8,
    /// Left/right turns from the root: bit `depth-1` is the first step, 1 means right.
    pub bits: u64,
}

/// Finds the tree containing `pos`, the depth of `pos` below the tree's root,
/// and the turns leading to it. Returns `None` if `pos` is outside the forest.
pub fn detect_offset(pos: Position, num_leaves: u64, rows: u8) -> Option<Offset> {
    if !in_forest(pos, num_leaves, rows) {
        return None;
    }
    let row = detect_row(pos, rows);
    let first_leaf = (pos - row_offset(row, rows)) << row;
    let mut tree = 0usize;
    for tree_row in (row..=rows).rev() {
        if !has_root(num_leaves, tree_row) {
            continue;
        }
        let start = num_leaves
            .checked_shr(tree_row as u32 + 1)
            .and_then(|x| x.checked_shl(tree_row as u32 + 1))
            .unwrap_or(0);
        let end = start + (1u64 << tree_row);
        if first_leaf >= start && first_leaf < end {
            let depth = tree_row - row;
            let bits = row_index(pos, rows) & ((1u64 << depth) - 1);
            return Some(Offset {
                tree,
                tree_row,
                depth,
                bits,
            });
        }
        tree += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_and_roots() {
        assert_eq!(tree_rows(0), 0);
        assert_eq!(tree_rows(1), 0);
        assert_eq!(tree_rows(2), 1);
        assert_eq!(tree_rows(3), 2);
        assert_eq!(tree_rows(8), 3);
        assert_eq!(tree_rows(9), 4);
        assert_eq!(tree_rows(1 << 63), 63);
        assert_eq!(num_roots(15), 4);
        assert_eq!(num_roots(16), 1);
    }

    #[test]
    fn family() {
        // rows = 3: row 0 is 0..8, row 1 is 8..12, row 2 is 12..14, row 3 is 14
        assert_eq!(parent(0, 3), 8);
        assert_eq!(parent(7, 3), 11);
        assert_eq!(parent(9, 3), 12);
        assert_eq!(parent(13, 3), 14);
        assert_eq!(left_child(14, 3), 12);
        assert_eq!(right_child(12, 3), 9);
        assert_eq!(left_child(11, 3), 6);
        assert_eq!(parent_many(5, 3, 3), 14);
        assert_eq!(child_many(14, 3, 3), 0);
        assert_eq!(child_many(13, 2, 3), 4);
    }

    #[test]
    fn row_detection() {
        assert_eq!(detect_row(0, 3), 0);
        assert_eq!(detect_row(7, 3), 0);
        assert_eq!(detect_row(8, 3), 1);
        assert_eq!(detect_row(12, 3), 2);
        assert_eq!(detect_row(14, 3), 3);
        assert_eq!(row_offset(0, 3), 0);
        assert_eq!(row_offset(1, 3), 8);
        assert_eq!(row_offset(2, 3), 12);
        assert_eq!(row_offset(3, 3), 14);
        assert_eq!(max_position(3), 14);
        assert_eq!(row_index(13, 3), 1);
    }

    #[test]
    fn wide_forest_does_not_overflow() {
        assert_eq!(row_offset(0, 63), 0);
        assert_eq!(row_offset(1, 63), 1 << 63);
        assert_eq!(max_position(63), u64::max_value() - 1);
        assert_eq!(detect_row(max_position(63), 63), 63);
        assert_eq!(left_child(max_position(63), 63), max_position(63) - 2);
        assert_eq!(root_position(1 << 63, 63, 63), max_position(63));
    }

    #[test]
    fn roots_of_six_leaves() {
        // 6 leaves in 3 rows: trees over leaves 0..4 and 4..6
        let roots: Vec<_> = root_positions(6, 3).collect();
        assert_eq!(roots, vec![(1, 10), (2, 12)]);
        assert!(is_root_position(10, 6, 3));
        assert!(!is_root_position(8, 6, 3));
        let roots: Vec<_> = root_positions(7, 3).collect();
        assert_eq!(roots, vec![(0, 6), (1, 10), (2, 12)]);
    }

    #[test]
    fn forest_membership() {
        assert!(in_forest(5, 6, 3));
        assert!(!in_forest(6, 6, 3));
        assert!(in_forest(10, 6, 3));
        assert!(!in_forest(11, 6, 3));
        assert!(in_forest(12, 6, 3));
        assert!(!in_forest(13, 6, 3));
        assert!(!in_forest(14, 6, 3));
        assert!(in_forest(14, 8, 3));
        assert!(!in_forest(15, 8, 3));
    }

    #[test]
    fn offsets() {
        // 7 leaves: trees of 4, 2 and 1 leaves.
        let o = detect_offset(2, 7, 3).unwrap();
        assert_eq!((o.tree, o.tree_row, o.depth, o.bits), (0, 2, 2, 0b10));
        let o = detect_offset(5, 7, 3).unwrap();
        assert_eq!((o.tree, o.tree_row, o.depth, o.bits), (1, 1, 1, 1));
        let o = detect_offset(6, 7, 3).unwrap();
        assert_eq!((o.tree, o.tree_row, o.depth), (2, 0, 0));
        let o = detect_offset(9, 7, 3).unwrap();
        assert_eq!((o.tree, o.tree_row, o.depth, o.bits), (0, 2, 1, 1));
        assert_eq!(detect_offset(7, 7, 3), None);
    }
}
