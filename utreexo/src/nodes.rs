use merkle::Hash;

/// Index of a `Node` within a pollard's heap storage.
pub(super) type NodeIndex = usize;

/// Node of a pollard.
///
/// A node does not own its children: they are stored in its sibling's
/// `niece` pair, and a root stores its own children. Leaves and trimmed
/// nodes have no nieces.
#[derive(Copy, Clone, PartialEq, Debug)]
pub(super) struct Node {
    pub(super) hash: Hash,
    pub(super) niece: [Option<NodeIndex>; 2],
    pub(super) remember: bool,
}

impl Node {
    pub(super) fn has_nieces(&self) -> bool {
        self.niece[0].is_some() || self.niece[1].is_some()
    }
}

/// Storage of all the nodes with methods to access them.
/// Released slots are recycled by later allocations.
#[derive(Clone, Debug, Default)]
pub(super) struct Heap {
    storage: Vec<Node>,
    free: Vec<NodeIndex>,
}

impl Heap {
    pub(super) fn with_capacity(cap: usize) -> Self {
        Heap {
            storage: Vec::with_capacity(cap),
            free: Vec::new(),
        }
    }

    pub(super) fn node_at(&self, i: NodeIndex) -> &Node {
        &self.storage[i]
    }

    /// Number of live nodes.
    pub(super) fn len(&self) -> usize {
        self.storage.len() - self.free.len()
    }

    /// Allocates a node in the heap.
    pub(super) fn allocate(
        &mut self,
        hash: Hash,
        remember: bool,
        niece: [Option<NodeIndex>; 2],
    ) -> NodeIndex {
        let node = Node {
            hash,
            niece,
            remember,
        };
        match self.free.pop() {
            Some(i) => {
                self.storage[i] = node;
                i
            }
            None => {
                self.storage.push(node);
                self.storage.len() - 1
            }
        }
    }

    pub(super) fn update<T>(&mut self, i: NodeIndex, closure: impl FnOnce(&mut Node) -> T) -> T {
        closure(&mut self.storage[i])
    }

    /// Exchanges the niece pairs of two nodes.
    pub(super) fn swap_nieces(&mut self, a: NodeIndex, b: NodeIndex) {
        if a == b {
            return;
        }
        let na = self.storage[a].niece;
        self.storage[a].niece = self.storage[b].niece;
        self.storage[b].niece = na;
    }

    /// Detaches and returns the niece pair of a node.
    pub(super) fn take_nieces(&mut self, i: NodeIndex) -> [Option<NodeIndex>; 2] {
        std::mem::replace(&mut self.storage[i].niece, [None, None])
    }

    /// Releases a node and everything reachable through its nieces.
    pub(super) fn release(&mut self, i: NodeIndex) {
        let mut stack = vec![i];
        while let Some(i) = stack.pop() {
            let niece = self.take_nieces(i);
            stack.extend(niece.iter().flatten());
            self.storage[i].hash = Hash::empty();
            self.free.push(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_released_nodes() {
        let mut heap = Heap::with_capacity(4);
        let a = heap.allocate(Hash::from([1u8; 32]), false, [None, None]);
        let b = heap.allocate(Hash::from([2u8; 32]), false, [None, None]);
        let root = heap.allocate(Hash::from([3u8; 32]), true, [Some(a), Some(b)]);
        assert_eq!(heap.len(), 3);
        heap.release(root);
        assert_eq!(heap.len(), 0);
        let c = heap.allocate(Hash::from([4u8; 32]), false, [None, None]);
        assert!(c == a || c == b || c == root);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn niece_exchange() {
        let mut heap = Heap::with_capacity(4);
        let a = heap.allocate(Hash::from([1u8; 32]), false, [None, None]);
        let b = heap.allocate(Hash::from([2u8; 32]), false, [Some(a), None]);
        let c = heap.allocate(Hash::from([3u8; 32]), false, [None, None]);
        heap.swap_nieces(b, c);
        assert!(!heap.node_at(b).has_nieces());
        assert_eq!(heap.node_at(c).niece, [Some(a), None]);
        assert_eq!(heap.take_nieces(c), [Some(a), None]);
        assert!(!heap.node_at(c).has_nieces());
    }
}
