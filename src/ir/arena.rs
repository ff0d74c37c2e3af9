//! Arena storage for IR nodes.
//!
//! Nodes live in a dense arena addressed by typed integer ids:
//! - **Stable identity**: an id stays valid for the lifetime of the graph;
//!   ids of deleted nodes are tombstoned, never reused.
//! - **Cache-friendly**: live nodes stay contiguous in memory.
//! - **Zero-cost ids**: `Id<T>` is a `u32` index plus a phantom type.
//!
//! Deletion leaves a tombstone so that secondary maps and bit sets indexed
//! by id never need compaction in the middle of a compilation.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed Id
// =============================================================================

/// A type-safe identifier for arena-allocated items.
///
/// The phantom parameter keeps ids from different arenas apart at compile
/// time. Trait impls are manual so `Id<T>` is `Copy`/`Eq`/`Hash` regardless
/// of `T`.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Create an id from a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    /// Raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Index as `usize`.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }

    /// Sentinel for "no node".
    pub const INVALID: Self = Id {
        index: u32::MAX,
        _marker: PhantomData,
    };

    /// Whether this id is not the sentinel.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "v{}", self.index)
        } else {
            write!(f, "v?")
        }
    }
}

impl<T> std::fmt::Display for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.index)
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Dense arena with tombstoned deletion.
///
/// Allocation is a bump at the end; deletion clears the slot without
/// shifting later ids. `live_count` tracks the number of occupied slots,
/// `id_bound` the exclusive upper bound of ids ever allocated.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

impl<T> Arena<T> {
    #[inline]
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            live: 0,
        }
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            slots: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Allocate a fresh slot. Ids grow monotonically and are never reused.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let index = self.slots.len() as u32;
        self.slots.push(Some(item));
        self.live += 1;
        Id::new(index)
    }

    /// Remove an item, leaving a tombstone. Returns the item if the slot
    /// was occupied.
    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        let slot = self.slots.get_mut(id.as_usize())?;
        let item = slot.take();
        if item.is_some() {
            self.live -= 1;
        }
        item
    }

    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.slots.get(id.as_usize()).and_then(|s| s.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.slots.get_mut(id.as_usize()).and_then(|s| s.as_mut())
    }

    /// Whether the slot for `id` is occupied.
    #[inline]
    pub fn contains(&self, id: Id<T>) -> bool {
        self.get(id).is_some()
    }

    /// Number of live (non-deleted) items.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Exclusive upper bound on ids allocated so far. Secondary maps and
    /// bit sets should be sized by this, not by `live_count`.
    #[inline]
    pub fn id_bound(&self) -> usize {
        self.slots.len()
    }

    /// Iterate live items with their ids.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|item| (Id::new(i as u32), item)))
    }

    /// Iterate live ids.
    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| Id::new(i as u32)))
    }

    #[inline]
    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &Self::Output {
        match self.slots[id.as_usize()].as_ref() {
            Some(item) => item,
            None => panic!("{} is deleted", id),
        }
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut Self::Output {
        match self.slots[id.as_usize()].as_mut() {
            Some(item) => item,
            None => panic!("{} is deleted", id),
        }
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Associates per-id side data with arena items without widening the node
/// struct itself (visit marks, order positions, analysis results).
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _marker: PhantomData<K>,
}

impl<K, V: Default + Clone> SecondaryMap<K, V> {
    pub fn new() -> Self {
        SecondaryMap {
            values: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SecondaryMap {
            values: vec![V::default(); capacity],
            _marker: PhantomData,
        }
    }

    /// Grow to cover ids below `len`.
    pub fn grow(&mut self, len: usize) {
        if len > self.values.len() {
            self.values.resize(len, V::default());
        }
    }

    #[inline]
    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id<K>) -> Option<&mut V> {
        self.values.get_mut(id.as_usize())
    }

    pub fn set(&mut self, id: Id<K>, value: V) {
        let idx = id.as_usize();
        if idx >= self.values.len() {
            self.values.resize(idx + 1, V::default());
        }
        self.values[idx] = value;
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl<K, V: Default + Clone> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Compact bit set over node indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet { words: Vec::new() }
    }

    pub fn with_capacity(bits: usize) -> Self {
        BitSet {
            words: vec![0; bits.div_ceil(64)],
        }
    }

    fn grow_for(&mut self, index: usize) {
        let words = index / 64 + 1;
        if words > self.words.len() {
            self.words.resize(words, 0);
        }
    }

    #[inline]
    pub fn insert(&mut self, index: usize) {
        self.grow_for(index);
        self.words[index / 64] |= 1 << (index % 64);
    }

    #[inline]
    pub fn remove(&mut self, index: usize) {
        if index / 64 < self.words.len() {
            self.words[index / 64] &= !(1 << (index % 64));
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|w| w & (1 << (index % 64)) != 0)
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Iterate set indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            (0..64).filter_map(move |bit| {
                if word & (1 << bit) != 0 {
                    Some(wi * 64 + bit)
                } else {
                    None
                }
            })
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(i32);

    #[test]
    fn test_alloc_and_index() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item(1));
        let b = arena.alloc(Item(2));

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[a].0, 1);
        assert_eq!(arena[b].0, 2);
        assert_eq!(arena.live_count(), 2);
    }

    #[test]
    fn test_tombstones_keep_ids_stable() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item(1));
        let b = arena.alloc(Item(2));

        assert!(arena.remove(a).is_some());
        assert!(!arena.contains(a));
        assert_eq!(arena[b].0, 2);
        assert_eq!(arena.live_count(), 1);
        assert_eq!(arena.id_bound(), 2);

        // New allocations never reuse the freed slot.
        let c = arena.alloc(Item(3));
        assert_eq!(c.index(), 2);
    }

    #[test]
    #[should_panic(expected = "deleted")]
    fn test_index_deleted_panics() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item(1));
        arena.remove(a);
        let _ = &arena[a];
    }

    #[test]
    fn test_iter_skips_tombstones() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item(1));
        arena.alloc(Item(2));
        arena.remove(a);

        let values: Vec<i32> = arena.iter().map(|(_, i)| i.0).collect();
        assert_eq!(values, vec![2]);
    }

    #[test]
    fn test_secondary_map() {
        let mut arena: Arena<Item> = Arena::new();
        let a = arena.alloc(Item(1));
        let b = arena.alloc(Item(2));

        let mut map: SecondaryMap<Item, u32> = SecondaryMap::new();
        map.set(b, 7);
        assert_eq!(map.get(a).copied(), Some(0));
        assert_eq!(map.get(b).copied(), Some(7));
    }

    #[test]
    fn test_bit_set() {
        let mut set = BitSet::new();
        set.insert(0);
        set.insert(63);
        set.insert(64);

        assert!(set.contains(0));
        assert!(set.contains(63));
        assert!(set.contains(64));
        assert!(!set.contains(1));
        assert_eq!(set.count(), 3);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 63, 64]);

        set.remove(63);
        assert!(!set.contains(63));
    }
}
