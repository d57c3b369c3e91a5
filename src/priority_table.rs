//! Priority table: O(1) scheduling over a bounded set of priority levels.
//!
//! A priority table is an array of FIFO buckets, one per priority level, plus
//! a 64-bit search vector flagging every bucket that is currently non-empty.
//! New entries are appended to the queue of their priority's bucket. The
//! dequeue operation finds the highest-priority non-empty bucket by locating
//! the highest set bit of the search vector, which a single bit-scan
//! instruction resolves on every modern CPU.
//!
//! The table is used by an I/O scheduler to pick the next unit of pending
//! work: strictly by priority descending, first-in-first-out among entries of
//! equal priority. An entry that is no longer wanted can be withdrawn from
//! any position in O(1) through the handle returned at enqueue time.
//!
//! The table is not internally synchronized. It is intended to be owned by a
//! single worker thread, or guarded by an external lock when shared.

use static_assertions::const_assert;

use crate::error::{Error, Result};
use crate::list::{EntryId, LinkedSlab};

/// The maximum priority level a table can be configured with.
///
/// The search vector is a single 64-bit word, so priorities span 0..=63.
pub const MAX_PRIORITY: u32 = 63;

const_assert!(MAX_PRIORITY < u64::BITS);

// =============================================================================
// PRIORITY TABLE
// =============================================================================

/// A fixed set of FIFO buckets indexed by priority, with a bit vector for
/// O(1) highest-priority lookup.
///
/// Invariant: bit `p` of the search vector is set if and only if bucket `p`
/// is non-empty. Every operation below re-establishes this before returning.
#[derive(Debug)]
pub struct PriorityTable<T> {
    /// The maximum priority of entries that may be stored in this table.
    max_priority: u32,
    /// A bit vector flagging all buckets that are currently non-empty.
    search_vector: u64,
    /// One FIFO list per priority in `0..=max_priority`.
    buckets: LinkedSlab<T>,
}

impl<T> PriorityTable<T> {
    /// Create a table accepting priorities in `0..=max_priority`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when `max_priority` exceeds
    /// [`MAX_PRIORITY`], the width of the search vector.
    pub fn new(max_priority: u32) -> Result<Self> {
        if max_priority > MAX_PRIORITY {
            return Err(Error::InvalidArgument);
        }

        Ok(Self {
            max_priority,
            search_vector: 0,
            buckets: LinkedSlab::new(max_priority as usize + 1),
        })
    }

    /// The maximum priority this table was configured with.
    #[inline]
    pub fn max_priority(&self) -> u32 {
        self.max_priority
    }

    /// Number of entries currently stored, across all priorities.
    #[inline]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the table holds no entries. O(1), no side effects.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.search_vector == 0
    }

    /// Add an entry at the given priority, behind any entries already queued
    /// at that priority.
    ///
    /// Returns a handle that can later be passed to [`remove`](Self::remove)
    /// to withdraw the entry before it is dequeued.
    ///
    /// # Panics
    ///
    /// Panics when `priority` exceeds the table's maximum. An out-of-range
    /// priority is a bug in the calling scheduler, not a runtime condition,
    /// and is rejected loudly in every build profile rather than being
    /// silently clamped.
    pub fn enqueue(&mut self, priority: u32, value: T) -> EntryId {
        assert!(
            priority <= self.max_priority,
            "priority {} exceeds table maximum {}",
            priority,
            self.max_priority
        );

        let id = self.buckets.push_tail(priority as usize, value);
        // Flag the bucket in the search vector; it is now non-empty.
        self.search_vector |= 1 << priority;
        id
    }

    /// Remove and return the oldest entry of the highest non-empty priority.
    ///
    /// Returns `None` when the table is empty. Among entries sharing the
    /// highest priority, the one that has been queued longest is returned.
    pub fn dequeue(&mut self) -> Option<T> {
        if self.search_vector == 0 {
            return None;
        }

        // Highest-order set bit of the search vector names the bucket.
        let top_priority = (u64::BITS - 1 - self.search_vector.leading_zeros()) as usize;

        let value = self.buckets.pop_head(top_priority);
        debug_assert!(value.is_some(), "search vector flagged an empty bucket");

        if self.buckets.list_is_empty(top_priority) {
            self.mark_bucket_empty(top_priority);
        }
        value
    }

    /// Withdraw an entry from wherever it sits in its bucket's queue.
    ///
    /// Returns the entry's value, or `None` when the handle is stale because
    /// the entry was already dequeued or removed. Calling this with a stale
    /// handle is a safe no-op.
    pub fn remove(&mut self, id: EntryId) -> Option<T> {
        let (priority, value) = self.buckets.remove(id)?;
        // The emptiness check is structural, not a rescan, so the whole
        // removal stays O(1).
        if self.buckets.list_is_empty(priority) {
            self.mark_bucket_empty(priority);
        }
        Some(value)
    }

    /// Whether `id` still refers to an entry queued in this table.
    #[inline]
    pub fn contains(&self, id: EntryId) -> bool {
        self.buckets.contains(id)
    }

    /// Empty the table, dropping all stored entries.
    ///
    /// Leaves the table in the same state as when newly constructed; all
    /// outstanding handles become stale.
    pub fn reset(&mut self) {
        if !self.is_empty() {
            log::debug!("priority table reset dropped {} entries", self.len());
        }
        self.search_vector = 0;
        self.buckets.clear();
    }

    #[inline]
    fn mark_bucket_empty(&mut self, priority: usize) {
        self.search_vector &= !(1u64 << priority);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Bit p of the search vector must mirror bucket p's emptiness.
    fn check_invariant<T>(table: &PriorityTable<T>) {
        for p in 0..=table.max_priority() {
            let bit = table.search_vector & (1 << p) != 0;
            let occupied = !table.buckets.list_is_empty(p as usize);
            assert_eq!(bit, occupied, "invariant broken at priority {}", p);
        }
    }

    #[test]
    fn test_bounds() {
        assert!(PriorityTable::<u32>::new(63).is_ok());
        assert_eq!(
            PriorityTable::<u32>::new(64).unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn test_single_level_table() {
        let mut table = PriorityTable::new(0).unwrap();
        assert!(table.is_empty());

        table.enqueue(0, "only");
        assert!(!table.is_empty());
        assert_eq!(table.dequeue(), Some("only"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_priority_order_and_fifo() {
        let mut table = PriorityTable::new(5).unwrap();

        table.enqueue(2, 'x');
        table.enqueue(5, 'y');
        table.enqueue(2, 'z');
        check_invariant(&table);

        assert_eq!(table.dequeue(), Some('y'));
        assert_eq!(table.dequeue(), Some('x'));
        assert_eq!(table.dequeue(), Some('z'));
        assert_eq!(table.dequeue(), None);
        assert!(table.is_empty());
        check_invariant(&table);
    }

    #[test]
    fn test_round_trip_drains_in_order() {
        let mut table = PriorityTable::new(63).unwrap();
        let priorities = [0u32, 63, 17, 17, 63, 1, 42, 0, 42, 42];

        for (i, &p) in priorities.iter().enumerate() {
            table.enqueue(p, (p, i));
            check_invariant(&table);
        }
        assert_eq!(table.len(), priorities.len());

        let mut drained = alloc::vec::Vec::new();
        while let Some(entry) = table.dequeue() {
            drained.push(entry);
            check_invariant(&table);
        }

        assert_eq!(drained.len(), priorities.len());
        assert!(table.is_empty());

        // Priority strictly descending; arrival order preserved within a
        // level.
        for pair in drained.windows(2) {
            let (pa, ia) = pair[0];
            let (pb, ib) = pair[1];
            assert!(pa > pb || (pa == pb && ia < ib));
        }
    }

    #[test]
    fn test_remove_from_middle_of_bucket() {
        let mut table = PriorityTable::new(3).unwrap();

        table.enqueue(1, "a");
        let b = table.enqueue(1, "b");
        table.enqueue(1, "c");

        assert_eq!(table.remove(b), Some("b"));
        // Bucket 1 still has entries, so its bit must still be set.
        check_invariant(&table);
        assert!(!table.is_empty());

        assert_eq!(table.dequeue(), Some("a"));
        assert_eq!(table.dequeue(), Some("c"));
        assert_eq!(table.dequeue(), None);
    }

    #[test]
    fn test_remove_last_entry_clears_bit() {
        let mut table = PriorityTable::new(7).unwrap();

        let id = table.enqueue(4, 99);
        assert_eq!(table.remove(id), Some(99));
        assert!(table.is_empty());
        check_invariant(&table);
    }

    #[test]
    fn test_remove_stale_handle_is_noop() {
        let mut table = PriorityTable::new(7).unwrap();

        let id = table.enqueue(3, 1);
        assert_eq!(table.dequeue(), Some(1));
        assert_eq!(table.remove(id), None);
        check_invariant(&table);
    }

    #[test]
    fn test_reset() {
        let mut table = PriorityTable::new(10).unwrap();

        let id = table.enqueue(2, 'a');
        table.enqueue(9, 'b');
        table.reset();

        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(table.dequeue(), None);
        assert!(!table.contains(id));
        check_invariant(&table);

        // Usable again after reset.
        table.enqueue(0, 'c');
        assert_eq!(table.dequeue(), Some('c'));
    }

    #[test]
    #[should_panic(expected = "exceeds table maximum")]
    fn test_enqueue_out_of_range_panics() {
        let mut table = PriorityTable::new(5).unwrap();
        table.enqueue(6, ());
    }

    #[test]
    fn test_external_lock_contract() {
        // The table is unsynchronized by design; shared access goes through
        // an external lock. Hammer one table from several threads and check
        // nothing is lost or duplicated.
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(spin::Mutex::new(PriorityTable::new(31).unwrap()));
        let producers: alloc::vec::Vec<_> = (0..4)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for i in 0..100u32 {
                        table.lock().enqueue(i % 32, (t, i));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut table = table.lock();
        assert_eq!(table.len(), 400);
        let mut seen = 0;
        let mut last_priority = u32::MAX;
        while let Some((_, i)) = table.dequeue() {
            let priority = i % 32;
            assert!(priority <= last_priority);
            last_priority = priority;
            seen += 1;
        }
        assert_eq!(seen, 400);
        assert!(table.is_empty());
    }
}
