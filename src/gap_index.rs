use tracing::{debug, warn};

use crate::{
    error::{PoolError, Result},
    node_heap::NodeId,
    utils::{expanded_capacity, exceeds_fill_factor},
};

/// One free block, as seen by the gap index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Gap {
    /// Size of the free block.
    pub size: usize,
    /// Offset of the free block. Only used to order gaps of equal size.
    pub offset: usize,
    /// Descriptor of the free block.
    pub node: NodeId,
}

/// Index of every free block of a pool, sorted by ascending size.
///
/// The node heap is the source of truth about where blocks are. This index
/// is a derived view that lets best-fit find the smallest block that can
/// hold a request without walking the whole block list:
///
/// ```text
///              Gap Index                          Node Heap (address order)
///
///  +------+------+------+             +------+   +------+   +------+   +------+
///  |  50  | 100  | 200  |             | used |-->| free |-->| used |-->| free |
///  +--|---+--|---+--|---+             +------+   +------+   +------+   +------+
///     |      |      +---------------------------------------------------^
///     |      +-------------------------------------^
///     +---> ...
/// ```
///
/// Equal sizes are ordered by offset so best-fit is deterministic and picks
/// the lowest address among equally good candidates.
pub(crate) struct GapIndex {
    entries: Vec<Gap>,
    capacity: usize,
    fill_factor: f32,
    expand_factor: usize,
}

impl GapIndex {
    pub fn new(capacity: usize, fill_factor: f32, expand_factor: usize) -> Result<Self> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(capacity)
            .map_err(|_| PoolError::ResourceExhausted { what: "gap index" })?;

        Ok(Self {
            entries,
            capacity,
            fill_factor,
            expand_factor,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[Gap] {
        &self.entries
    }

    /// Makes sure one more gap can be inserted without growing.
    ///
    /// The index grows once its occupancy reaches the fill factor.
    pub fn reserve(&mut self) -> Result<()> {
        let needed = self.entries.len() + 1;
        if !exceeds_fill_factor(needed, self.capacity, self.fill_factor) {
            return Ok(());
        }

        let mut new_capacity = self.capacity;
        while exceeds_fill_factor(needed, new_capacity, self.fill_factor) {
            let next = expanded_capacity(new_capacity, self.expand_factor);
            if next == new_capacity {
                warn!(capacity = self.capacity, "gap index can't grow any further");
                return Err(PoolError::ResourceExhausted { what: "gap index" });
            }
            new_capacity = next;
        }

        let additional = new_capacity - self.entries.len();
        if let Err(err) = self.entries.try_reserve_exact(additional) {
            warn!(capacity = self.capacity, new_capacity, %err, "gap index growth failed");
            return Err(PoolError::ResourceExhausted { what: "gap index" });
        }

        debug!(from = self.capacity, to = new_capacity, "grew gap index");
        self.capacity = new_capacity;
        Ok(())
    }

    /// Adds a free block to the index and restores the ordering.
    pub fn insert(&mut self, size: usize, offset: usize, node: NodeId) -> Result<()> {
        debug_assert!(
            self.position(node).is_none(),
            "block {node:?} is already indexed"
        );

        self.reserve()?;
        self.entries.push(Gap { size, offset, node });
        self.sort();

        Ok(())
    }

    /// Removes the entry of `node`, shifting the later entries down by one.
    /// Returns the removed entry, or `None` when `node` was not indexed.
    pub fn remove(&mut self, node: NodeId) -> Option<Gap> {
        let position = self.position(node)?;
        let gap = self.entries.remove(position);
        debug_assert!(self.min_at_front());

        Some(gap)
    }

    /// Sorts the entries by size, then by offset.
    ///
    /// `sort_unstable_by_key` is an in-place partitioning sort with no
    /// recursion depth to worry about. Keys are unique (offsets are), so the
    /// result doesn't depend on the sort being unstable.
    pub fn sort(&mut self) {
        self.entries.sort_unstable_by_key(|gap| (gap.size, gap.offset));
        debug_assert!(self.min_at_front());
    }

    /// Smallest gap that can hold `size` bytes.
    pub fn best_fit(&self, size: usize) -> Option<Gap> {
        let position = self.entries.partition_point(|gap| gap.size < size);
        self.entries.get(position).copied()
    }

    /// Entry of `node`, if it is indexed.
    pub fn find(&self, node: NodeId) -> Option<Gap> {
        self.position(node).map(|position| self.entries[position])
    }

    fn position(&self, node: NodeId) -> Option<usize> {
        self.entries.iter().position(|gap| gap.node == node)
    }

    /// Index 0 holds the smallest size of the whole index.
    pub fn min_at_front(&self) -> bool {
        match self.entries.split_first() {
            Some((first, rest)) => rest.iter().all(|gap| first.size <= gap.size),
            None => true,
        }
    }

    /// Every entry is no larger than the one after it.
    pub fn is_sorted(&self) -> bool {
        self.entries.windows(2).all(|pair| pair[0].size <= pair[1].size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(index: usize) -> NodeId {
        NodeId::from_index(index)
    }

    fn sizes(index: &GapIndex) -> Vec<usize> {
        index.entries().iter().map(|gap| gap.size).collect()
    }

    #[test]
    fn insert_keeps_entries_sorted() {
        let mut index = GapIndex::new(8, 0.75, 2).unwrap();
        index.insert(300, 0, node(0)).unwrap();
        index.insert(50, 400, node(1)).unwrap();
        index.insert(120, 800, node(2)).unwrap();

        assert_eq!(sizes(&index), [50, 120, 300]);
        assert!(index.is_sorted());
        assert!(index.min_at_front());
    }

    #[test]
    fn equal_sizes_are_ordered_by_offset() {
        let mut index = GapIndex::new(8, 0.75, 2).unwrap();
        index.insert(64, 900, node(0)).unwrap();
        index.insert(64, 100, node(1)).unwrap();
        index.insert(64, 500, node(2)).unwrap();

        let offsets: Vec<_> = index.entries().iter().map(|gap| gap.offset).collect();
        assert_eq!(offsets, [100, 500, 900]);
        assert_eq!(index.best_fit(10).map(|gap| gap.node), Some(node(1)));
    }

    #[test]
    fn remove_shifts_later_entries_down() {
        let mut index = GapIndex::new(8, 0.75, 2).unwrap();
        index.insert(10, 0, node(0)).unwrap();
        index.insert(20, 100, node(1)).unwrap();
        index.insert(30, 200, node(2)).unwrap();

        let removed = index.remove(node(1)).unwrap();
        assert_eq!(removed.size, 20);
        assert_eq!(sizes(&index), [10, 30]);
        assert!(index.remove(node(1)).is_none());
        assert!(index.find(node(1)).is_none());
        assert_eq!(index.find(node(2)).map(|gap| gap.size), Some(30));
    }

    #[test]
    fn best_fit_picks_smallest_sufficient_gap() {
        let mut index = GapIndex::new(8, 0.75, 2).unwrap();
        index.insert(50, 0, node(0)).unwrap();
        index.insert(200, 100, node(1)).unwrap();
        index.insert(100, 400, node(2)).unwrap();

        assert_eq!(index.best_fit(120).map(|gap| gap.size), Some(200));
        assert_eq!(index.best_fit(100).map(|gap| gap.size), Some(100));
        assert_eq!(index.best_fit(1).map(|gap| gap.size), Some(50));
        assert!(index.best_fit(201).is_none());
    }

    #[test]
    fn grows_once_fill_factor_is_reached() {
        let mut index = GapIndex::new(4, 0.75, 2).unwrap();
        for i in 0..3 {
            index.insert(i + 1, i * 10, node(i)).unwrap();
        }
        assert_eq!(index.capacity(), 4);

        index.insert(100, 100, node(3)).unwrap();
        assert_eq!(index.capacity(), 8);
        assert_eq!(sizes(&index), [1, 2, 3, 100]);
    }

    #[test]
    fn failed_growth_leaves_index_untouched() {
        let mut index = GapIndex::new(1, 1e-30, 2).unwrap();

        let err = index.insert(10, 0, node(0)).unwrap_err();
        assert_eq!(err, PoolError::ResourceExhausted { what: "gap index" });
        assert_eq!(index.len(), 0);
        assert_eq!(index.capacity(), 1);
    }

    #[test]
    fn failed_growth_keeps_existing_entries() {
        // An expand factor of 1 never gets past the first capacity.
        let mut index = GapIndex::new(4, 0.75, 1).unwrap();
        for i in 0..3 {
            index.insert(30 - i, i * 100, node(i)).unwrap();
        }

        let err = index.insert(5, 900, node(3)).unwrap_err();
        assert_eq!(err, PoolError::ResourceExhausted { what: "gap index" });
        assert_eq!(index.capacity(), 4);
        assert_eq!(sizes(&index), [28, 29, 30]);
        assert!(index.find(node(3)).is_none());
    }
}
