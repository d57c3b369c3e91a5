//! Hopscotch hash map from `u64` keys to owned values.
//!
//! The deduplication path needs to find in-flight work by block number
//! without chasing pointer chains, so this map uses hopscotch hashing
//! (Herlihy, Shavit, and Tzafrir): open addressing where every entry for a
//! hash bucket lives within a fixed-size neighborhood starting at that
//! bucket. Collisions are threaded as a hop list of small biased offsets
//! instead of pointers, so a lookup touches a handful of adjacent cache
//! lines and the worst-case probe length is bounded by the neighborhood
//! size.
//!
//! When no vacancy exists within a neighborhood, empty buckets further out
//! are "hopped" toward it by relocating entries of overlapping
//! neighborhoods. Only when that fails (around 90% load in practice) does
//! the table resize and rehash, which is the one expensive operation here.
//! Removal genuinely empties the bucket, so the table never accumulates
//! tombstones.
//!
//! Like the other structures in this crate, the map is not internally
//! synchronized.

use alloc::vec::Vec;
use core::mem;

use static_assertions::const_assert;

use crate::error::{Error, Result};

/// The number of neighborhoods in a new table.
const DEFAULT_CAPACITY: usize = 16;

/// The number of buckets in each neighborhood.
const NEIGHBORHOOD: usize = 255;

/// Limit on the number of linear probes for a free bucket.
const MAX_PROBES: usize = 1024;

/// The biased hop offset value terminating a hop list.
const NULL_HOP_OFFSET: u8 = 0;

/// Initial load factor in percent, traded off against memory use.
const DEFAULT_LOAD: usize = 75;

// Hop offsets are biased by one and stored in a u8.
const_assert!(NEIGHBORHOOD <= u8::MAX as usize);

// =============================================================================
// HASHING
// =============================================================================

/// The Google CityHash 16-byte mixing function.
#[inline]
fn mix(input1: u64, input2: u64) -> u64 {
    const CITY_MULTIPLIER: u64 = 0x9ddf_ea08_eb38_2d69;

    let mut hash = input1 ^ input2;
    hash = hash.wrapping_mul(CITY_MULTIPLIER);
    hash ^= hash >> 47;
    hash ^= input2;
    hash = hash.wrapping_mul(CITY_MULTIPLIER);
    hash ^= hash >> 47;
    hash.wrapping_mul(CITY_MULTIPLIER)
}

/// A 64-bit non-cryptographic hash of the key, based on CityHash's handling
/// of an 8-byte input.
#[inline]
fn hash_key(key: u64) -> u64 {
    let low = key & 0xFFFF_FFFF;
    let high = key >> 32;
    mix(mem::size_of::<u64>() as u64 + (low << 3), high)
}

// =============================================================================
// BUCKET
// =============================================================================

/// A hash bucket.
///
/// Hop fields are kept next to the key and value so a neighborhood scan
/// stays within the same cache lines.
#[derive(Debug)]
struct Bucket<V> {
    /// Biased offset of the first entry in the hop list of the neighborhood
    /// that hashes to this bucket.
    first_hop: u8,
    /// Biased offset of the next bucket in the hop list.
    next_hop: u8,
    /// The key stored in this bucket; meaningless while `value` is `None`.
    key: u64,
    /// The stored value; `None` marks the bucket empty.
    value: Option<V>,
}

fn new_bucket_array<V>(bucket_count: usize) -> Vec<Bucket<V>> {
    let mut buckets = Vec::with_capacity(bucket_count);
    buckets.resize_with(bucket_count, || Bucket {
        first_hop: NULL_HOP_OFFSET,
        next_hop: NULL_HOP_OFFSET,
        key: 0,
        value: None,
    });
    buckets
}

// =============================================================================
// INT MAP
// =============================================================================

/// A map from `u64` keys to values, using hopscotch collision resolution.
///
/// The bucket array carries `NEIGHBORHOOD - 1` extra buckets past the last
/// neighborhood so no neighborhood ever wraps around the end.
#[derive(Debug)]
pub struct IntMap<V> {
    /// The number of entries stored in the map.
    size: usize,
    /// The number of neighborhoods in the map.
    capacity: usize,
    /// The bucket array, `capacity + NEIGHBORHOOD - 1` long.
    buckets: Vec<Bucket<V>>,
}

impl<V> IntMap<V> {
    /// Create an empty map with the default initial capacity.
    pub fn new() -> Self {
        let capacity = DEFAULT_CAPACITY * 100 / DEFAULT_LOAD;
        Self {
            size: 0,
            capacity,
            buckets: new_bucket_array(capacity + (NEIGHBORHOOD - 1)),
        }
    }

    /// Create an empty map initially able to hold `initial_capacity` entries
    /// without resizing. Zero selects the default capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] when the scaled bucket count does
    /// not fit in a `usize`.
    pub fn with_capacity(initial_capacity: usize) -> Result<Self> {
        let requested = if initial_capacity > 0 {
            initial_capacity
        } else {
            DEFAULT_CAPACITY
        };

        // Scale up by the load factor, so holding `requested` entries does
        // not already sit near the resize threshold.
        let capacity = requested
            .checked_mul(100)
            .map(|scaled| scaled / DEFAULT_LOAD)
            .ok_or(Error::CapacityOverflow)?;
        let bucket_count = capacity
            .checked_add(NEIGHBORHOOD - 1)
            .ok_or(Error::CapacityOverflow)?;

        Ok(Self {
            size: 0,
            capacity,
            buckets: new_bucket_array(bucket_count),
        })
    }

    /// The number of entries stored in the map.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the map holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Retrieve the value associated with `key`, if any.
    pub fn get(&self, key: u64) -> Option<&V> {
        let neighborhood = self.select_bucket(key);
        let (entry, _) = self.search_hop_list(neighborhood, key)?;
        self.buckets[entry].value.as_ref()
    }

    /// Mutably retrieve the value associated with `key`, if any.
    pub fn get_mut(&mut self, key: u64) -> Option<&mut V> {
        let neighborhood = self.select_bucket(key);
        let (entry, _) = self.search_hop_list(neighborhood, key)?;
        self.buckets[entry].value.as_mut()
    }

    /// Whether the map contains a mapping for `key`.
    #[inline]
    pub fn contains_key(&self, key: u64) -> bool {
        self.get(key).is_some()
    }

    /// Associate `value` with `key`, replacing and returning any previous
    /// value for the key.
    pub fn put(&mut self, key: u64, value: V) -> Option<V> {
        let neighborhood = self.select_bucket(key);
        if let Some((entry, _)) = self.search_hop_list(neighborhood, key) {
            return self.buckets[entry].value.replace(value);
        }

        self.insert_new(neighborhood, key, value);
        None
    }

    /// Associate `value` with `key` only if the key is unmapped.
    ///
    /// On success returns `Ok(())`; if the key already has a value, the map
    /// is left unchanged and the rejected value is handed back in the error.
    pub fn try_put(&mut self, key: u64, value: V) -> core::result::Result<(), V> {
        let neighborhood = self.select_bucket(key);
        if self.search_hop_list(neighborhood, key).is_some() {
            return Err(value);
        }

        self.insert_new(neighborhood, key, value);
        Ok(())
    }

    /// Remove the mapping for `key`, returning its value if one existed.
    pub fn remove(&mut self, key: u64) -> Option<V> {
        let neighborhood = self.select_bucket(key);
        let (victim, previous) = self.search_hop_list(neighborhood, key)?;

        self.size -= 1;
        let value = self.buckets[victim].value.take();
        self.buckets[victim].key = 0;

        // The victim bucket is empty but must still be spliced out of the
        // hop list.
        let next = self.buckets[victim].next_hop;
        match previous {
            None => self.buckets[neighborhood].first_hop = next,
            Some(previous) => self.buckets[previous].next_hop = next,
        }
        self.buckets[victim].next_hop = NULL_HOP_OFFSET;

        value
    }

    // -------------------------------------------------------------------------
    // Hop list plumbing
    // -------------------------------------------------------------------------

    /// The index of the bucket starting the neighborhood that must contain
    /// any entry for `key`.
    ///
    /// The hash is truncated to 32 bits and treated as a binary fraction of
    /// the capacity; the multiply and shift beat a modulus and avoid biasing
    /// toward low buckets the way masking a non-power-of-two capacity would.
    #[inline]
    fn select_bucket(&self, key: u64) -> usize {
        let hash = hash_key(key) & 0xFFFF_FFFF;
        ((hash * self.capacity as u64) >> 32) as usize
    }

    /// Convert a biased hop offset within a neighborhood to the index of the
    /// bucket it references, or `None` at the end of the hop list.
    #[inline]
    fn dereference_hop(neighborhood: usize, hop_offset: u8) -> Option<usize> {
        if hop_offset == NULL_HOP_OFFSET {
            return None;
        }
        Some(neighborhood + hop_offset as usize - 1)
    }

    /// Search the hop list of `neighborhood` for `key`.
    ///
    /// Returns the index of the matching bucket and the index of its
    /// predecessor in the hop list (`None` when the match is the list head).
    fn search_hop_list(&self, neighborhood: usize, key: u64) -> Option<(usize, Option<usize>)> {
        let mut previous = None;
        let mut next_hop = self.buckets[neighborhood].first_hop;

        while let Some(entry) = Self::dereference_hop(neighborhood, next_hop) {
            let bucket = &self.buckets[entry];
            if bucket.key == key && bucket.value.is_some() {
                return Some((entry, previous));
            }
            next_hop = bucket.next_hop;
            previous = Some(entry);
        }

        None
    }

    /// Thread `new_entry` into the hop list of `neighborhood`, keeping the
    /// list sorted by hop offset so the head is always the bucket nearest
    /// the neighborhood start.
    fn insert_in_hop_list(&mut self, neighborhood: usize, new_entry: usize) {
        // Zero terminates a hop list, so offsets are biased by one.
        let hop_offset = (new_entry - neighborhood + 1) as u8;

        let mut next_hop = self.buckets[neighborhood].first_hop;
        if next_hop == NULL_HOP_OFFSET || next_hop > hop_offset {
            self.buckets[new_entry].next_hop = next_hop;
            self.buckets[neighborhood].first_hop = hop_offset;
            return;
        }

        loop {
            // next_hop is non-null at every iteration of this loop.
            let entry = neighborhood + next_hop as usize - 1;
            next_hop = self.buckets[entry].next_hop;

            if next_hop == NULL_HOP_OFFSET || next_hop > hop_offset {
                self.buckets[new_entry].next_hop = next_hop;
                self.buckets[entry].next_hop = hop_offset;
                return;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Vacancy search and resizing
    // -------------------------------------------------------------------------

    /// Linearly probe for the next empty bucket at or after `start`,
    /// stopping at the end of the array or after [`MAX_PROBES`] buckets.
    fn find_empty_bucket(&self, start: usize) -> Option<usize> {
        let sentinel = self.buckets.len().min(start + MAX_PROBES);
        (start..sentinel).find(|&index| self.buckets[index].value.is_none())
    }

    /// Move the empty bucket at `hole` one hop closer to the start of the
    /// array by relocating an entry from an overlapping neighborhood into
    /// it.
    ///
    /// Returns the index of the newly vacated bucket, or `None` when no
    /// entry can be moved. The caller guarantees `hole` is at least
    /// `NEIGHBORHOOD` buckets into the array, so the backward scan cannot
    /// underflow.
    fn move_empty_bucket(&mut self, hole: usize) -> Option<usize> {
        for neighborhood in (hole + 1 - NEIGHBORHOOD)..hole {
            // The head of the hop list is the entry nearest the
            // neighborhood start, so it hops the furthest.
            let first_hop = self.buckets[neighborhood].first_hop;
            let new_hole = match Self::dereference_hop(neighborhood, first_hop) {
                Some(entry) => entry,
                // Every bucket here belongs to some overlapping
                // neighborhood instead.
                None => continue,
            };

            // An entry past the hole would move the wrong way.
            if hole < new_hole {
                continue;
            }

            // Unlink the head entry, move it into the hole, and rethread
            // the filled hole into the neighborhood's hop list.
            self.buckets[neighborhood].first_hop = self.buckets[new_hole].next_hop;
            self.buckets[new_hole].next_hop = NULL_HOP_OFFSET;

            self.buckets[hole].key = self.buckets[new_hole].key;
            let moved = self.buckets[new_hole].value.take();
            self.buckets[hole].value = moved;

            self.insert_in_hop_list(neighborhood, hole);
            return Some(new_hole);
        }

        None
    }

    /// Find an empty bucket within `neighborhood`, hopping more distant
    /// vacancies toward it as needed. Returns `None` when no vacancy can be
    /// found or arranged, which forces a resize.
    fn find_or_make_vacancy(&mut self, neighborhood: usize) -> Option<usize> {
        let mut hole = self.find_empty_bucket(neighborhood);

        while let Some(index) = hole {
            if index - neighborhood < NEIGHBORHOOD {
                return Some(index);
            }
            hole = self.move_empty_bucket(index);
        }

        None
    }

    /// Insert a key known to be absent, resizing as needed.
    fn insert_new(&mut self, mut neighborhood: usize, key: u64, value: V) {
        let empty = loop {
            if let Some(empty) = self.find_or_make_vacancy(neighborhood) {
                break empty;
            }
            // No vacancy can be arranged; grow, rehash everything, and
            // retry with the recalculated neighborhood.
            self.resize_buckets();
            neighborhood = self.select_bucket(key);
        };

        self.buckets[empty].key = key;
        self.buckets[empty].value = Some(value);
        self.insert_in_hop_list(neighborhood, empty);
        self.size += 1;
    }

    /// Grow the bucket array by 50% and rehash every entry into it.
    fn resize_buckets(&mut self) {
        let new_capacity = self.capacity / 2 * 3;
        log::debug!(
            "int map resize from {} to {}, current size {}",
            self.capacity,
            new_capacity,
            self.size
        );

        let old_buckets = mem::replace(
            &mut self.buckets,
            new_bucket_array(new_capacity + (NEIGHBORHOOD - 1)),
        );
        self.capacity = new_capacity;
        self.size = 0;

        for mut bucket in old_buckets {
            if let Some(value) = bucket.value.take() {
                let neighborhood = self.select_bucket(bucket.key);
                // The key cannot already be present in the fresh array.
                self.insert_new(neighborhood, bucket.key, value);
            }
        }
    }
}

impl<V> Default for IntMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_map() {
        let map: IntMap<u32> = IntMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.get(0), None);
        assert_eq!(map.get(u64::MAX), None);
    }

    #[test]
    fn test_put_get_remove() {
        let mut map = IntMap::new();

        assert_eq!(map.put(1, "one"), None);
        assert_eq!(map.put(2, "two"), None);
        assert_eq!(map.len(), 2);

        assert_eq!(map.get(1), Some(&"one"));
        assert_eq!(map.get(2), Some(&"two"));
        assert!(map.contains_key(1));
        assert!(!map.contains_key(3));

        assert_eq!(map.remove(1), Some("one"));
        assert_eq!(map.remove(1), None);
        assert_eq!(map.get(1), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_put_replaces_and_returns_old_value() {
        let mut map = IntMap::new();

        assert_eq!(map.put(42, 'a'), None);
        assert_eq!(map.put(42, 'b'), Some('a'));
        assert_eq!(map.get(42), Some(&'b'));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_try_put_rejects_existing_key() {
        let mut map = IntMap::new();

        assert_eq!(map.try_put(7, "first"), Ok(()));
        assert_eq!(map.try_put(7, "second"), Err("second"));
        assert_eq!(map.get(7), Some(&"first"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_get_mut() {
        let mut map = IntMap::new();

        map.put(5, 10u32);
        *map.get_mut(5).unwrap() += 1;
        assert_eq!(map.get(5), Some(&11));
        assert_eq!(map.get_mut(6), None);
    }

    #[test]
    fn test_colliding_keys_share_a_neighborhood() {
        let mut map = IntMap::new();

        // Scan for keys that hash to the same neighborhood so the hop list
        // actually chains.
        let target = map.select_bucket(0);
        let mut colliders = alloc::vec![0u64];
        let mut candidate = 1u64;
        while colliders.len() < 4 {
            if map.select_bucket(candidate) == target {
                colliders.push(candidate);
            }
            candidate += 1;
        }

        for &key in &colliders {
            assert_eq!(map.put(key, key * 10), None);
        }
        for &key in &colliders {
            assert_eq!(map.get(key), Some(&(key * 10)));
        }

        // Splice one out of the middle of the hop list and check the rest
        // stay reachable.
        let middle = colliders[2];
        assert_eq!(map.remove(middle), Some(middle * 10));
        for &key in &colliders {
            if key == middle {
                assert_eq!(map.get(key), None);
            } else {
                assert_eq!(map.get(key), Some(&(key * 10)));
            }
        }
    }

    #[test]
    fn test_growth_past_initial_capacity() {
        const COUNT: u64 = 10_000;
        let mut map = IntMap::new();

        for key in 0..COUNT {
            assert_eq!(map.put(key * 3, key), None);
        }
        assert_eq!(map.len(), COUNT as usize);

        for key in 0..COUNT {
            assert_eq!(map.get(key * 3), Some(&key));
        }
        assert_eq!(map.get(1), None);
    }

    #[test]
    fn test_remove_all_leaves_usable_map() {
        let mut map = IntMap::new();

        for key in 0..500u64 {
            map.put(key, key);
        }
        for key in 0..500u64 {
            assert_eq!(map.remove(key), Some(key));
        }
        assert!(map.is_empty());

        // No tombstone contamination; reinsertion works as in a fresh map.
        for key in 0..500u64 {
            assert_eq!(map.put(key, key + 1), None);
        }
        for key in 0..500u64 {
            assert_eq!(map.get(key), Some(&(key + 1)));
        }
    }

    #[test]
    fn test_with_capacity_avoids_early_resize() {
        let mut map = IntMap::with_capacity(1000).unwrap();
        let capacity_before = map.capacity;

        for key in 0..1000u64 {
            map.put(key, ());
        }
        assert_eq!(map.len(), 1000);
        assert_eq!(map.capacity, capacity_before);
    }

    #[test]
    fn test_with_capacity_overflow() {
        assert_eq!(
            IntMap::<()>::with_capacity(usize::MAX).unwrap_err(),
            Error::CapacityOverflow
        );
    }

    #[test]
    fn test_extreme_keys() {
        let mut map = IntMap::new();

        map.put(0, "zero");
        map.put(u64::MAX, "max");
        assert_eq!(map.get(0), Some(&"zero"));
        assert_eq!(map.get(u64::MAX), Some(&"max"));
        assert_eq!(map.remove(u64::MAX), Some("max"));
        assert_eq!(map.get(0), Some(&"zero"));
    }
}
