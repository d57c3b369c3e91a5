//! Slab-backed doubly-linked FIFO lists.
//!
//! This is the linkage layer under [`PriorityTable`](crate::PriorityTable):
//! a single arena of nodes threading any number of independent FIFO lists.
//! Links are array indices rather than pointers, which keeps every operation
//! safe while preserving the properties an intrusive kernel-style list
//! provides:
//!
//! - O(1) tail append, head pop, and removal from an arbitrary position
//! - removal needs only the entry's own handle, not a scan of its list
//! - emptiness of a list is a structural check on its head index
//!
//! Each entry is addressed by an [`EntryId`] carrying the node index and a
//! generation counter. The generation is bumped when a node is freed, so a
//! handle kept past its entry's removal is detected and treated as a no-op
//! instead of corrupting an unrelated entry that reused the slot.

use alloc::vec::Vec;
use core::fmt;

/// Reserved index meaning "no node" (list end, or no list).
const NIL: u32 = u32::MAX;

// =============================================================================
// ENTRY ID
// =============================================================================

/// Stable handle to an entry stored in a [`LinkedSlab`].
///
/// Handles are cheap to copy and remain valid until the entry is popped,
/// removed, or the slab is cleared. A stale handle is never dangerous; lookup
/// with one simply fails.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

// =============================================================================
// NODE / LIST HEAD
// =============================================================================

#[derive(Debug)]
struct Node<T> {
    /// Index of the previous node in the owning list, or `NIL` at the head.
    prev: u32,
    /// Index of the next node in the owning list, or `NIL` at the tail.
    /// For a free node this chains the free list instead.
    next: u32,
    /// Index of the owning list, or `NIL` when the node is free.
    list: u32,
    /// Bumped each time the node is freed; stale handles fail the match.
    generation: u32,
    /// The stored value; `None` while the node is on the free list.
    value: Option<T>,
}

#[derive(Clone, Copy, Debug)]
struct ListHead {
    head: u32,
    tail: u32,
}

impl ListHead {
    const EMPTY: ListHead = ListHead {
        head: NIL,
        tail: NIL,
    };
}

// =============================================================================
// LINKED SLAB
// =============================================================================

/// An arena of doubly-linked nodes shared by a fixed set of FIFO lists.
///
/// The list count is fixed at construction; nodes are allocated on demand and
/// recycled through an internal free list.
#[derive(Debug)]
pub struct LinkedSlab<T> {
    nodes: Vec<Node<T>>,
    lists: Vec<ListHead>,
    free_head: u32,
    len: usize,
}

impl<T> LinkedSlab<T> {
    /// Create a slab threading `list_count` initially empty lists.
    pub fn new(list_count: usize) -> Self {
        Self {
            nodes: Vec::new(),
            lists: alloc::vec![ListHead::EMPTY; list_count],
            free_head: NIL,
            len: 0,
        }
    }

    /// Number of lists threaded through this slab.
    #[inline]
    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    /// Total number of entries across all lists.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether every list is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the given list holds no entries. Structural and O(1).
    #[inline]
    pub fn list_is_empty(&self, list: usize) -> bool {
        self.lists[list].head == NIL
    }

    /// Whether `id` refers to a live entry.
    pub fn contains(&self, id: EntryId) -> bool {
        self.nodes
            .get(id.index as usize)
            .is_some_and(|node| node.generation == id.generation && node.value.is_some())
    }

    /// Borrow the value of a live entry.
    pub fn get(&self, id: EntryId) -> Option<&T> {
        let node = self.nodes.get(id.index as usize)?;
        if node.generation != id.generation {
            return None;
        }
        node.value.as_ref()
    }

    /// Mutably borrow the value of a live entry.
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut T> {
        let node = self.nodes.get_mut(id.index as usize)?;
        if node.generation != id.generation {
            return None;
        }
        node.value.as_mut()
    }

    /// Append a value to the tail of `list`, returning its handle.
    pub fn push_tail(&mut self, list: usize, value: T) -> EntryId {
        let index = self.allocate(value);
        let list_index = list as u32;
        let tail = self.lists[list].tail;

        {
            let node = &mut self.nodes[index as usize];
            node.prev = tail;
            node.next = NIL;
            node.list = list_index;
        }

        if tail == NIL {
            self.lists[list].head = index;
        } else {
            self.nodes[tail as usize].next = index;
        }
        self.lists[list].tail = index;
        self.len += 1;

        EntryId {
            index,
            generation: self.nodes[index as usize].generation,
        }
    }

    /// Pop the oldest entry of `list`, or `None` if the list is empty.
    pub fn pop_head(&mut self, list: usize) -> Option<T> {
        let head = self.lists[list].head;
        if head == NIL {
            return None;
        }

        let next = self.nodes[head as usize].next;
        self.lists[list].head = next;
        if next == NIL {
            self.lists[list].tail = NIL;
        } else {
            self.nodes[next as usize].prev = NIL;
        }

        Some(self.release(head))
    }

    /// Unlink an entry from wherever it sits in its list.
    ///
    /// Returns the owning list index and the value, or `None` when the handle
    /// is stale or was never valid.
    pub fn remove(&mut self, id: EntryId) -> Option<(usize, T)> {
        if !self.contains(id) {
            return None;
        }

        let index = id.index;
        let (prev, next, list) = {
            let node = &self.nodes[index as usize];
            (node.prev, node.next, node.list as usize)
        };

        if prev == NIL {
            self.lists[list].head = next;
        } else {
            self.nodes[prev as usize].next = next;
        }
        if next == NIL {
            self.lists[list].tail = prev;
        } else {
            self.nodes[next as usize].prev = prev;
        }

        Some((list, self.release(index)))
    }

    /// Empty every list at once, dropping all stored values.
    ///
    /// All outstanding handles become stale. Node storage is retained for
    /// reuse.
    pub fn clear(&mut self) {
        let count = self.nodes.len();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if node.value.is_some() {
                node.value = None;
                node.generation = node.generation.wrapping_add(1);
            }
            node.list = NIL;
            node.prev = NIL;
            node.next = if i + 1 < count { (i + 1) as u32 } else { NIL };
        }
        self.free_head = if count > 0 { 0 } else { NIL };
        self.lists.fill(ListHead::EMPTY);
        self.len = 0;
    }

    // -------------------------------------------------------------------------
    // Node allocation
    // -------------------------------------------------------------------------

    /// Take a node off the free list, or grow the arena by one.
    fn allocate(&mut self, value: T) -> u32 {
        if self.free_head != NIL {
            let index = self.free_head;
            let node = &mut self.nodes[index as usize];
            self.free_head = node.next;
            node.value = Some(value);
            return index;
        }

        assert!(self.nodes.len() < NIL as usize, "linked slab is full");
        let index = self.nodes.len() as u32;
        self.nodes.push(Node {
            prev: NIL,
            next: NIL,
            list: NIL,
            generation: 0,
            value: Some(value),
        });
        index
    }

    /// Return an unlinked node to the free list, yielding its value.
    fn release(&mut self, index: u32) -> T {
        let node = &mut self.nodes[index as usize];
        let value = node.value.take().expect("released node must hold a value");
        node.list = NIL;
        node.generation = node.generation.wrapping_add(1);
        node.next = self.free_head;
        self.free_head = index;
        self.len -= 1;
        value
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_fifo() {
        let mut slab: LinkedSlab<u32> = LinkedSlab::new(1);

        slab.push_tail(0, 10);
        slab.push_tail(0, 20);
        slab.push_tail(0, 30);

        assert_eq!(slab.len(), 3);
        assert_eq!(slab.pop_head(0), Some(10));
        assert_eq!(slab.pop_head(0), Some(20));
        assert_eq!(slab.pop_head(0), Some(30));
        assert_eq!(slab.pop_head(0), None);
        assert!(slab.list_is_empty(0));
    }

    #[test]
    fn test_lists_are_independent() {
        let mut slab: LinkedSlab<&str> = LinkedSlab::new(3);

        slab.push_tail(0, "a");
        slab.push_tail(2, "b");
        slab.push_tail(0, "c");

        assert!(slab.list_is_empty(1));
        assert_eq!(slab.pop_head(2), Some("b"));
        assert!(slab.list_is_empty(2));
        assert_eq!(slab.pop_head(0), Some("a"));
        assert_eq!(slab.pop_head(0), Some("c"));
    }

    #[test]
    fn test_remove_from_middle() {
        let mut slab: LinkedSlab<u32> = LinkedSlab::new(1);

        slab.push_tail(0, 1);
        let middle = slab.push_tail(0, 2);
        slab.push_tail(0, 3);

        assert_eq!(slab.remove(middle), Some((0, 2)));
        assert_eq!(slab.pop_head(0), Some(1));
        assert_eq!(slab.pop_head(0), Some(3));
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut slab: LinkedSlab<u32> = LinkedSlab::new(1);

        let head = slab.push_tail(0, 1);
        slab.push_tail(0, 2);
        let tail = slab.push_tail(0, 3);

        assert_eq!(slab.remove(head), Some((0, 1)));
        assert_eq!(slab.remove(tail), Some((0, 3)));
        assert_eq!(slab.pop_head(0), Some(2));
        assert!(slab.is_empty());
    }

    #[test]
    fn test_stale_handle_is_noop() {
        let mut slab: LinkedSlab<u32> = LinkedSlab::new(1);

        let id = slab.push_tail(0, 7);
        assert_eq!(slab.remove(id), Some((0, 7)));
        assert_eq!(slab.remove(id), None);

        // The slot is recycled with a new generation; the old handle must
        // not alias the new entry.
        let fresh = slab.push_tail(0, 8);
        assert_eq!(slab.remove(id), None);
        assert_eq!(slab.get(fresh), Some(&8));
    }

    #[test]
    fn test_clear_invalidates_handles() {
        let mut slab: LinkedSlab<u32> = LinkedSlab::new(2);

        let a = slab.push_tail(0, 1);
        let b = slab.push_tail(1, 2);
        slab.clear();

        assert!(slab.is_empty());
        assert!(slab.list_is_empty(0));
        assert!(slab.list_is_empty(1));
        assert!(!slab.contains(a));
        assert!(!slab.contains(b));
        assert_eq!(slab.remove(a), None);

        // Still usable after clear.
        slab.push_tail(0, 3);
        assert_eq!(slab.pop_head(0), Some(3));
    }

    #[test]
    fn test_get_and_get_mut() {
        let mut slab: LinkedSlab<u32> = LinkedSlab::new(1);

        let id = slab.push_tail(0, 5);
        assert_eq!(slab.get(id), Some(&5));
        *slab.get_mut(id).unwrap() = 6;
        assert_eq!(slab.pop_head(0), Some(6));
        assert_eq!(slab.get(id), None);
    }
}
