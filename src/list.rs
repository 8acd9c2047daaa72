//! Generic doubly-linked list with list-owned nodes.
//!
//! Nodes live in a slot arena owned by the list and are addressed through
//! [`NodeId`] handles. A handle records which list created it plus a slot
//! generation, so a handle from another list or for an already removed node
//! is rejected instead of silently aliasing a reused slot.
//!
//! The scheduler's ready queue and every deferred-work queue are built on
//! this container.
//!
//! Consistency contract (checked by [`List::validate`], and after every
//! mutation in debug builds):
//! - head has no previous link, tail has no next link,
//! - `len()` equals the number of nodes reachable forwards and backwards,
//! - every node's back-reference names the list that holds it.

use alloc::vec::Vec;
use core::fmt;
use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};

/// Source of list identities used for node back-references.
static NEXT_LIST_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ListId(u32);

/// Handle to one node of a [`List`].
///
/// Handles are plain values; they stay `Copy` and never keep the node alive.
/// Using a handle after its node was removed is a usage violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    list: ListId,
    index: u32,
    generation: u32,
}

struct Node<T> {
    data: T,
    prev: Option<u32>,
    next: Option<u32>,
    /// Owning list, compared against the holder on every validation pass.
    list: ListId,
}

enum Slot<T> {
    Occupied { generation: u32, node: Node<T> },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Ordered container with O(1) insertion and removal at a known node.
pub struct List<T> {
    id: ListId,
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    count: usize,
}

impl<T> List<T> {
    /// Creates an empty list with a fresh identity.
    pub fn new() -> Self {
        let list = Self {
            id: ListId(NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed)),
            slots: Vec::new(),
            free_head: None,
            head: None,
            tail: None,
            count: 0,
        };
        list.check();
        list
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head.map(|index| self.handle(index))
    }

    pub fn tail(&self) -> Option<NodeId> {
        self.tail.map(|index| self.handle(index))
    }

    /// Returns whether `node` currently names a live node of this list.
    pub fn contains(&self, node: NodeId) -> bool {
        self.resolve(node).is_some()
    }

    pub fn get(&self, node: NodeId) -> Option<&T> {
        let index = self.resolve(node)?;
        Some(&self.node(index).data)
    }

    pub fn get_mut(&mut self, node: NodeId) -> Option<&mut T> {
        let index = self.resolve(node)?;
        Some(&mut self.node_mut(index).data)
    }

    /// Returns the node following `node`, or `None` at the tail.
    pub fn next(&self, node: NodeId) -> Option<NodeId> {
        let index = self.index_of(node);
        self.node(index).next.map(|next| self.handle(next))
    }

    /// Returns the node preceding `node`, or `None` at the head.
    pub fn prev(&self, node: NodeId) -> Option<NodeId> {
        let index = self.index_of(node);
        self.node(index).prev.map(|prev| self.handle(prev))
    }

    /// Inserts `data` as the new head.
    pub fn prepend(&mut self, data: T) -> NodeId {
        let head = self.head;
        self.link(data, None, head)
    }

    /// Inserts `data` as the new tail.
    pub fn append(&mut self, data: T) -> NodeId {
        let tail = self.tail;
        self.link(data, tail, None)
    }

    /// Inserts `data` directly in front of `node`.
    ///
    /// Inserting before the head makes the new node the head.
    pub fn insert_before(&mut self, node: NodeId, data: T) -> NodeId {
        let index = self.index_of(node);
        let prev = self.node(index).prev;
        self.link(data, prev, Some(index))
    }

    /// Inserts `data` directly behind `node`.
    ///
    /// Inserting after the tail makes the new node the tail.
    pub fn insert_after(&mut self, node: NodeId, data: T) -> NodeId {
        let index = self.index_of(node);
        let next = self.node(index).next;
        self.link(data, Some(index), next)
    }

    /// Unlinks `node` and hands its data back to the caller.
    pub fn remove(&mut self, node: NodeId) -> T {
        let index = self.index_of(node);
        let (prev, next) = {
            let n = self.node(index);
            (n.prev, n.next)
        };

        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
        self.count -= 1;

        let vacant = Slot::Vacant {
            generation: node.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        self.free_head = Some(index);

        let Slot::Occupied { node: removed, .. } =
            mem::replace(&mut self.slots[index as usize], vacant)
        else {
            unreachable!("list: resolved slot was not occupied");
        };

        self.check();
        removed.data
    }

    /// Tears the list down, dropping every node and its data.
    pub fn destroy(self) {
        self.check();
        log::trace!(target: "list", "destroying list with {} nodes", self.count);
        drop(self);
    }

    /// Returns the first node (from the head) whose data equals `value`.
    pub fn find_first(&self, value: &T) -> Option<NodeId>
    where
        T: PartialEq,
    {
        self.iter()
            .find(|(_, data)| *data == value)
            .map(|(node, _)| node)
    }

    /// Returns the last node (from the tail) whose data equals `value`.
    pub fn find_last(&self, value: &T) -> Option<NodeId>
    where
        T: PartialEq,
    {
        self.iter()
            .rev()
            .find(|(_, data)| *data == value)
            .map(|(node, _)| node)
    }

    /// Finds the next node after `node` that satisfies `predicate`.
    ///
    /// The search runs from `node` to the tail, then wraps to the head and
    /// stops just before `node`. `node` itself is never tested, so `None`
    /// means no *other* node matches.
    pub fn find_next_matching<F>(&self, node: NodeId, mut predicate: F) -> Option<NodeId>
    where
        F: FnMut(&T) -> bool,
    {
        let start = self.index_of(node);

        let mut cursor = self.node(start).next;
        while let Some(index) = cursor {
            let n = self.node(index);
            if predicate(&n.data) {
                return Some(self.handle(index));
            }
            cursor = n.next;
        }

        let mut cursor = self.head;
        while let Some(index) = cursor {
            if index == start {
                break;
            }
            let n = self.node(index);
            if predicate(&n.data) {
                return Some(self.handle(index));
            }
            cursor = n.next;
        }

        None
    }

    /// Iterates `(handle, data)` pairs from head to tail (or backwards via `rev`).
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            front: self.head,
            back: self.tail,
            remaining: self.count,
        }
    }

    /// Walks the whole list and panics on any broken link or count mismatch.
    pub fn validate(&self) {
        if self.count == 0 {
            assert!(
                self.head.is_none() && self.tail.is_none(),
                "list: empty list still has a head or tail"
            );
            return;
        }

        let (Some(head), Some(tail)) = (self.head, self.tail) else {
            panic!("list: non-empty list without head or tail");
        };
        if self.count > 1 {
            assert!(head != tail, "list: head equals tail with count {}", self.count);
        }
        assert!(self.node(head).prev.is_none(), "list: head has a previous link");
        assert!(self.node(tail).next.is_none(), "list: tail has a next link");

        let mut forward = 0usize;
        let mut last = None;
        let mut cursor = Some(head);
        while let Some(index) = cursor {
            forward += 1;
            assert!(
                forward <= self.count,
                "list: forward walk exceeds count {}",
                self.count
            );
            let n = self.node(index);
            assert!(n.list == self.id, "list: node back-reference names another list");
            if let Some(next) = n.next {
                assert!(
                    self.node(next).prev == Some(index),
                    "list: next node does not link back"
                );
            }
            last = Some(index);
            cursor = n.next;
        }
        assert!(forward == self.count, "list: forward walk {} != count {}", forward, self.count);
        assert!(last == Some(tail), "list: forward walk does not end at tail");

        let mut backward = 0usize;
        let mut cursor = Some(tail);
        while let Some(index) = cursor {
            backward += 1;
            assert!(
                backward <= self.count,
                "list: backward walk exceeds count {}",
                self.count
            );
            cursor = self.node(index).prev;
        }
        assert!(
            backward == self.count,
            "list: backward walk {} != count {}",
            backward,
            self.count
        );
    }

    #[inline]
    fn check(&self) {
        #[cfg(debug_assertions)]
        self.validate();
    }

    /// Creates a node between `prev` and `next` and patches both neighbours.
    fn link(&mut self, data: T, prev: Option<u32>, next: Option<u32>) -> NodeId {
        let node = Node {
            data,
            prev,
            next,
            list: self.id,
        };

        let index = match self.free_head {
            Some(index) => {
                let (generation, next_free) = match &self.slots[index as usize] {
                    Slot::Vacant {
                        generation,
                        next_free,
                    } => (*generation, *next_free),
                    Slot::Occupied { .. } => {
                        unreachable!("list: free slot chain points at an occupied slot")
                    }
                };
                self.free_head = next_free;
                self.slots[index as usize] = Slot::Occupied { generation, node };
                index
            }
            None => {
                let index = u32::try_from(self.slots.len())
                    .unwrap_or_else(|_| panic!("list: node arena exhausted"));
                self.slots.push(Slot::Occupied {
                    generation: 0,
                    node,
                });
                index
            }
        };

        match prev {
            Some(prev) => self.node_mut(prev).next = Some(index),
            None => self.head = Some(index),
        }
        match next {
            Some(next) => self.node_mut(next).prev = Some(index),
            None => self.tail = Some(index),
        }
        self.count += 1;

        self.check();
        self.handle(index)
    }

    fn handle(&self, index: u32) -> NodeId {
        match &self.slots[index as usize] {
            Slot::Occupied { generation, .. } => NodeId {
                list: self.id,
                index,
                generation: *generation,
            },
            Slot::Vacant { .. } => unreachable!("list: link points at a vacant slot"),
        }
    }

    fn resolve(&self, node: NodeId) -> Option<u32> {
        if node.list != self.id {
            return None;
        }
        match self.slots.get(node.index as usize)? {
            Slot::Occupied { generation, .. } if *generation == node.generation => Some(node.index),
            _ => None,
        }
    }

    fn index_of(&self, node: NodeId) -> u32 {
        assert!(node.list == self.id, "list: node belongs to a different list");
        self.resolve(node)
            .unwrap_or_else(|| panic!("list: stale node handle (slot {})", node.index))
    }

    fn node(&self, index: u32) -> &Node<T> {
        match &self.slots[index as usize] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => unreachable!("list: link points at a vacant slot"),
        }
    }

    fn node_mut(&mut self, index: u32) -> &mut Node<T> {
        match &mut self.slots[index as usize] {
            Slot::Occupied { node, .. } => node,
            Slot::Vacant { .. } => unreachable!("list: link points at a vacant slot"),
        }
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|(_, data)| data)).finish()
    }
}

/// Borrowing iterator over a [`List`].
pub struct Iter<'a, T> {
    list: &'a List<T>,
    front: Option<u32>,
    back: Option<u32>,
    remaining: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NodeId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.front?;
        let node = self.list.node(index);
        self.front = node.next;
        self.remaining -= 1;
        Some((self.list.handle(index), &node.data))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> DoubleEndedIterator for Iter<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.back?;
        let node = self.list.node(index);
        self.back = node.prev;
        self.remaining -= 1;
        Some((self.list.handle(index), &node.data))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
