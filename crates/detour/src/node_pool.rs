//! Node pool and open list used by every A*-style traversal
//!
//! Nodes live in a bump-allocated array bounded by `max_nodes` and are found
//! again through hash buckets keyed on the polygon reference. The open list is
//! a binary min-heap over node indices keyed on the node's total cost.

use bitflags::bitflags;

use crate::PolyRef;

bitflags! {
    /// Search flags stored in a node's packed field
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u32 {
        const OPEN = 0x01;
        const CLOSED = 0x02;
        /// Parent is not adjacent; reached through a raycast shortcut
        const PARENT_DETACHED = 0x04;
    }
}

/// Bits reserved for the parent index in [`NodeLinks`]
pub const DT_NODE_PARENT_BITS: u32 = 24;
/// Bits reserved for the search state in [`NodeLinks`]
pub const DT_NODE_STATE_BITS: u32 = 2;
/// Bits reserved for [`NodeFlags`] in [`NodeLinks`]
pub const DT_NODE_FLAG_BITS: u32 = 3;

const PARENT_MASK: u32 = (1 << DT_NODE_PARENT_BITS) - 1;
const STATE_SHIFT: u32 = DT_NODE_PARENT_BITS;
const STATE_MASK: u32 = (1 << DT_NODE_STATE_BITS) - 1;
const FLAG_SHIFT: u32 = DT_NODE_PARENT_BITS + DT_NODE_STATE_BITS;
const FLAG_MASK: u32 = (1 << DT_NODE_FLAG_BITS) - 1;

/// Maximum number of distinct search states per polygon
pub const DT_MAX_STATES_PER_NODE: usize = 1 << DT_NODE_STATE_BITS;

/// Largest pool the 24-bit parent field can address
pub const DT_MAX_NODE_POOL_SIZE: usize = PARENT_MASK as usize;

/// Sentinel for empty hash chains
const DT_NULL_IDX: u32 = u32::MAX;

/// Packed `{parent: 24, state: 2, flags: 3}` field of a search node.
///
/// The parent is stored as a 1-based pool index; zero means "no parent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeLinks(u32);

impl NodeLinks {
    pub fn parent(&self) -> u32 {
        self.0 & PARENT_MASK
    }

    pub fn set_parent(&mut self, pidx: u32) {
        self.0 = (self.0 & !PARENT_MASK) | (pidx & PARENT_MASK);
    }

    pub fn state(&self) -> u8 {
        ((self.0 >> STATE_SHIFT) & STATE_MASK) as u8
    }

    pub fn set_state(&mut self, state: u8) {
        self.0 = (self.0 & !(STATE_MASK << STATE_SHIFT)) | ((state as u32 & STATE_MASK) << STATE_SHIFT);
    }

    pub fn flags(&self) -> NodeFlags {
        NodeFlags::from_bits_truncate((self.0 >> FLAG_SHIFT) & FLAG_MASK)
    }

    pub fn set_flags(&mut self, flags: NodeFlags) {
        self.0 = (self.0 & !(FLAG_MASK << FLAG_SHIFT)) | ((flags.bits() & FLAG_MASK) << FLAG_SHIFT);
    }
}

/// Search node
#[derive(Debug, Clone, Copy, Default)]
pub struct Node {
    /// Position of the node
    pub pos: [f32; 3],
    /// Cost from the start to this node
    pub cost: f32,
    /// Cost plus heuristic
    pub total: f32,
    /// Packed parent, state and flags
    pub links: NodeLinks,
    /// Polygon ref the node corresponds to
    pub id: PolyRef,
}

impl Node {
    #[inline]
    pub fn parent(&self) -> u32 {
        self.links.parent()
    }

    #[inline]
    pub fn set_parent(&mut self, pidx: u32) {
        self.links.set_parent(pidx);
    }

    #[inline]
    pub fn state(&self) -> u8 {
        self.links.state()
    }

    #[inline]
    pub fn flags(&self) -> NodeFlags {
        self.links.flags()
    }

    #[inline]
    pub fn set_flags(&mut self, flags: NodeFlags) {
        self.links.set_flags(flags);
    }

    #[inline]
    pub fn has_flag(&self, flag: NodeFlags) -> bool {
        self.links.flags().contains(flag)
    }

    #[inline]
    pub fn add_flags(&mut self, flags: NodeFlags) {
        self.links.set_flags(self.links.flags() | flags);
    }

    #[inline]
    pub fn remove_flags(&mut self, flags: NodeFlags) {
        self.links.set_flags(self.links.flags() - flags);
    }
}

/// Hash bucketed arena of search nodes
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<Node>,
    first: Vec<u32>,
    next: Vec<u32>,
    max_nodes: usize,
    hash_mask: usize,
}

#[inline]
fn hash_ref(r: PolyRef) -> u32 {
    let mut a = r.id();
    a = a.wrapping_add(!(a << 15));
    a ^= a >> 10;
    a = a.wrapping_add(a << 3);
    a ^= a >> 6;
    a = a.wrapping_add(!(a << 11));
    a ^= a >> 16;
    a
}

impl NodePool {
    /// Creates a pool holding at most `max_nodes` nodes. `hash_size` must be a
    /// power of two.
    pub fn new(max_nodes: usize, hash_size: usize) -> Self {
        debug_assert!(hash_size.is_power_of_two());
        debug_assert!(max_nodes > 0 && max_nodes <= DT_MAX_NODE_POOL_SIZE);

        Self {
            nodes: Vec::with_capacity(max_nodes),
            first: vec![DT_NULL_IDX; hash_size],
            next: vec![DT_NULL_IDX; max_nodes],
            max_nodes,
            hash_mask: hash_size - 1,
        }
    }

    /// Forgets every node. Runs in O(hash size).
    pub fn clear(&mut self) {
        self.first.fill(DT_NULL_IDX);
        self.nodes.clear();
    }

    /// Returns the node for `(id, state)`, allocating it if needed. `None`
    /// means the pool is exhausted.
    pub fn get_node(&mut self, id: PolyRef, state: u8) -> Option<usize> {
        let bucket = hash_ref(id) as usize & self.hash_mask;
        let mut i = self.first[bucket];
        while i != DT_NULL_IDX {
            let node = &self.nodes[i as usize];
            if node.id == id && node.state() == state {
                return Some(i as usize);
            }
            i = self.next[i as usize];
        }

        if self.nodes.len() >= self.max_nodes {
            return None;
        }

        let idx = self.nodes.len();
        let mut node = Node {
            id,
            ..Default::default()
        };
        node.links.set_state(state);
        self.nodes.push(node);

        self.next[idx] = self.first[bucket];
        self.first[bucket] = idx as u32;

        Some(idx)
    }

    /// Looks up `(id, state)` without allocating
    pub fn find_node(&self, id: PolyRef, state: u8) -> Option<usize> {
        let bucket = hash_ref(id) as usize & self.hash_mask;
        let mut i = self.first[bucket];
        while i != DT_NULL_IDX {
            let node = &self.nodes[i as usize];
            if node.id == id && node.state() == state {
                return Some(i as usize);
            }
            i = self.next[i as usize];
        }
        None
    }

    /// Collects up to `max_nodes` nodes for `id`, across all states
    pub fn find_nodes(&self, id: PolyRef, max_nodes: usize) -> Vec<usize> {
        let mut found = Vec::new();
        let bucket = hash_ref(id) as usize & self.hash_mask;
        let mut i = self.first[bucket];
        while i != DT_NULL_IDX && found.len() < max_nodes {
            if self.nodes[i as usize].id == id {
                found.push(i as usize);
            }
            i = self.next[i as usize];
        }
        found
    }

    /// 1-based index stored in a child's parent field
    #[inline]
    pub fn node_idx(&self, index: usize) -> u32 {
        index as u32 + 1
    }

    /// Resolves a 1-based parent index back to an array index
    #[inline]
    pub fn node_at_idx(&self, idx: u32) -> Option<usize> {
        if idx == 0 {
            None
        } else {
            Some(idx as usize - 1)
        }
    }

    #[inline]
    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    #[inline]
    pub fn node_mut(&mut self, index: usize) -> &mut Node {
        &mut self.nodes[index]
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn hash_size(&self) -> usize {
        self.hash_mask + 1
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    total: f32,
    node: usize,
}

/// Binary min-heap of node indices ordered by total cost
#[derive(Debug)]
pub struct NodeQueue {
    heap: Vec<HeapEntry>,
    capacity: usize,
}

impl NodeQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Node with the lowest total, without removing it
    pub fn top(&self) -> Option<usize> {
        self.heap.first().map(|e| e.node)
    }

    pub fn push(&mut self, node: usize, total: f32) {
        debug_assert!(self.heap.len() < self.capacity);
        self.heap.push(HeapEntry { total, node });
        let last = self.heap.len() - 1;
        self.bubble_up(last);
    }

    pub fn pop(&mut self) -> Option<usize> {
        if self.heap.is_empty() {
            return None;
        }
        let top = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.trickle_down(0);
        }
        Some(top.node)
    }

    /// Re-heapifies after the node's total decreased
    pub fn modify(&mut self, node: usize, total: f32) {
        if let Some(i) = self.heap.iter().position(|e| e.node == node) {
            self.heap[i].total = total;
            self.bubble_up(i);
        }
    }

    fn bubble_up(&mut self, mut i: usize) {
        let entry = self.heap[i];
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[parent].total <= entry.total {
                break;
            }
            self.heap[i] = self.heap[parent];
            i = parent;
        }
        self.heap[i] = entry;
    }

    fn trickle_down(&mut self, mut i: usize) {
        let entry = self.heap[i];
        let size = self.heap.len();
        loop {
            let mut child = 2 * i + 1;
            if child >= size {
                break;
            }
            if child + 1 < size && self.heap[child + 1].total < self.heap[child].total {
                child += 1;
            }
            if entry.total <= self.heap[child].total {
                break;
            }
            self.heap[i] = self.heap[child];
            i = child;
        }
        self.heap[i] = entry;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_links_round_trip() {
        let mut links = NodeLinks::default();
        links.set_parent(0x00ab_cdef);
        links.set_state(3);
        links.set_flags(NodeFlags::CLOSED | NodeFlags::PARENT_DETACHED);

        assert_eq!(links.parent(), 0x00ab_cdef);
        assert_eq!(links.state(), 3);
        assert_eq!(links.flags(), NodeFlags::CLOSED | NodeFlags::PARENT_DETACHED);

        links.set_parent(7);
        assert_eq!(links.state(), 3);
        assert_eq!(links.flags(), NodeFlags::CLOSED | NodeFlags::PARENT_DETACHED);
        links.set_flags(NodeFlags::OPEN);
        assert_eq!(links.parent(), 7);
        assert_eq!(links.flags(), NodeFlags::OPEN);
    }

    #[test]
    fn test_node_pool() {
        let mut pool = NodePool::new(16, 8);

        let poly1 = PolyRef::new(1);
        let a = pool.get_node(poly1, 0).unwrap();
        assert_eq!(pool.node(a).id, poly1);
        assert_eq!(pool.node(a).state(), 0);

        assert_eq!(pool.get_node(poly1, 0), Some(a));
        assert_eq!(pool.find_node(poly1, 0), Some(a));

        let b = pool.get_node(poly1, 1).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.node(b).state(), 1);
        assert_eq!(pool.find_nodes(poly1, 10).len(), 2);
        assert_eq!(pool.find_nodes(poly1, 1).len(), 1);
        assert_eq!(pool.find_node(PolyRef::new(2), 0), None);
    }

    #[test]
    fn test_node_pool_exhaustion_and_clear() {
        let mut pool = NodePool::new(4, 4);
        for i in 1..=4 {
            assert!(pool.get_node(PolyRef::new(i), 0).is_some());
        }
        assert_eq!(pool.get_node(PolyRef::new(99), 0), None);
        // Existing nodes are still handed out when full.
        assert!(pool.get_node(PolyRef::new(2), 0).is_some());

        pool.clear();
        assert_eq!(pool.node_count(), 0);
        assert_eq!(pool.find_node(PolyRef::new(2), 0), None);
        assert!(pool.get_node(PolyRef::new(99), 0).is_some());
    }

    #[test]
    fn test_parent_index_is_one_based() {
        let mut pool = NodePool::new(8, 4);
        let a = pool.get_node(PolyRef::new(10), 0).unwrap();
        let pidx = pool.node_idx(a);
        assert_ne!(pidx, 0);
        assert_eq!(pool.node_at_idx(pidx), Some(a));
        assert_eq!(pool.node_at_idx(0), None);
    }

    #[test]
    fn test_node_queue_orders_by_total() {
        let mut queue = NodeQueue::new(16);
        queue.push(0, 5.0);
        queue.push(1, 3.0);
        queue.push(2, 7.0);
        queue.push(3, 1.0);

        assert_eq!(queue.top(), Some(3));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(2));
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_node_queue_modify() {
        let mut queue = NodeQueue::new(16);
        queue.push(0, 5.0);
        queue.push(1, 6.0);
        queue.push(2, 7.0);

        queue.modify(2, 1.0);
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.len(), 1);
    }
}
