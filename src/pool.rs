use std::{
    fmt,
    ops::Range,
    sync::atomic::{AtomicU64, Ordering},
};

use tracing::{debug, trace};

use crate::{
    block::Block,
    config::PoolConfig,
    error::{PoolError, Result},
    gap_index::GapIndex,
    kernel::Arena,
    node_heap::{NodeHeap, NodeId},
};

/// Distinguishes pools so a handle from one pool is refused by every other.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// How a pool picks the free block an allocation is carved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitPolicy {
    /// First free block large enough, in address order.
    FirstFit,
    /// Smallest free block large enough. Ties go to the lowest address.
    BestFit,
}

/// Handle to a live allocation, returned by [`Pool::allocate`].
///
/// The handle stays valid until it is passed to [`Pool::deallocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    pool: u64,
    node: NodeId,
    offset: usize,
    size: usize,
    serial: u64,
}

impl Allocation {
    /// Offset of the allocation inside the pool's arena.
    #[inline]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.size
    }

    /// Allocations are never empty, this is always `false`.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    #[inline]
    pub const fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }
}

/// One block of a pool as reported by [`Pool::inspect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub len: usize,
    pub in_use: bool,
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Size of the arena.
    pub total_size: usize,
    /// Bytes currently handed out.
    pub alloc_size: usize,
    /// Live allocations.
    pub num_allocs: usize,
    /// Free blocks.
    pub num_gaps: usize,
    pub policy: FitPolicy,
}

/// A fixed-size arena carved into variably sized allocations.
///
/// The pool keeps two views of its arena in sync. The node heap holds one
/// descriptor per block, linked in address order, and always covers the
/// whole arena. The gap index holds one entry per free block, sorted by
/// size:
///
/// ```text
///                       Gap Index
///                  +------+------+
///                  | 100  | 700  |
///                  +--|---+--|---+
///                     |      +-------------------------+
///                     v                                v
/// +-------------+-------------+-------------+---------------------------+
/// | A (used)    | free        | B (used)    | free                      |
/// | 0..100      | 100..200    | 200..300    | 300..1000                 |
/// +-------------+-------------+-------------+---------------------------+
/// ```
///
/// Allocating splits a free block, freeing merges the block with its free
/// neighbours, so two free blocks are never adjacent. Every operation either
/// completes or leaves the pool exactly as it found it.
///
/// The pool is not thread safe. Use one pool per thread or wrap it in a
/// mutex.
pub struct Pool {
    id: u64,
    arena: Arena,
    nodes: NodeHeap<Block>,
    gaps: GapIndex,
    policy: FitPolicy,
    alloc_size: usize,
    num_allocs: usize,
    next_serial: u64,
}

impl Pool {
    /// Opens a pool of `total_size` bytes with the default [`PoolConfig`].
    pub fn open(total_size: usize, policy: FitPolicy) -> Result<Self> {
        Self::open_with(total_size, policy, &PoolConfig::default())
    }

    /// Opens a pool of `total_size` bytes. The whole arena starts out as a
    /// single free block.
    pub fn open_with(total_size: usize, policy: FitPolicy, config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        if total_size == 0 {
            return Err(PoolError::ZeroSize);
        }

        let arena = Arena::reserve(total_size)?;
        let mut nodes = NodeHeap::new(
            config.node_heap_capacity,
            config.fill_factor,
            config.expand_factor,
        )?;
        let mut gaps = GapIndex::new(
            config.gap_index_capacity,
            config.fill_factor,
            config.expand_factor,
        )?;

        let head = nodes.add_node(None, Block::free(0, total_size))?;
        gaps.insert(total_size, 0, head)?;

        let id = NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed);
        debug!(pool = id, total_size, ?policy, "opened pool");

        Ok(Self {
            id,
            arena,
            nodes,
            gaps,
            policy,
            alloc_size: 0,
            num_allocs: 0,
            next_serial: 1,
        })
    }

    /// Tears the pool down, giving the arena back.
    ///
    /// A pool with live allocations is handed back unchanged together with
    /// [`PoolError::NotEmpty`].
    pub fn close(self) -> std::result::Result<(), (Self, PoolError)> {
        if !self.is_closeable() {
            let allocations = self.num_allocs;
            return Err((self, PoolError::NotEmpty { allocations }));
        }

        debug!(pool = self.id, total_size = self.total_size(), "closed pool");
        Ok(())
    }

    /// Whether the pool has no live allocations.
    #[inline]
    pub fn is_closeable(&self) -> bool {
        self.num_allocs == 0
    }

    #[inline]
    pub fn policy(&self) -> FitPolicy {
        self.policy
    }

    #[inline]
    pub fn total_size(&self) -> usize {
        self.arena.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_size: self.total_size(),
            alloc_size: self.alloc_size,
            num_allocs: self.num_allocs,
            num_gaps: self.gaps.len(),
            policy: self.policy,
        }
    }

    /// Number of blocks, free or not, currently covering the arena.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.nodes.len()
    }

    /// Current capacity of the block descriptor array.
    #[inline]
    pub fn node_capacity(&self) -> usize {
        self.nodes.capacity()
    }

    /// Current capacity of the gap index.
    #[inline]
    pub fn gap_capacity(&self) -> usize {
        self.gaps.capacity()
    }

    /// Hands out `size` bytes of the arena.
    ///
    /// The block is chosen according to the pool's [`FitPolicy`]. If it is
    /// larger than `size`, the front of it is allocated and the rest stays
    /// free as a new block right after it.
    pub fn allocate(&mut self, size: usize) -> Result<Allocation> {
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }

        let Some(chosen) = self.find_fit(size) else {
            trace!(pool = self.id, size, "no block large enough");
            return Err(PoolError::OutOfSpace { requested: size });
        };

        let block = *self.nodes.data(chosen);
        debug_assert!(block.is_free && block.size >= size);
        let remainder = block.size - size;

        // Grow everything a split needs before touching anything.
        if remainder > 0 {
            self.nodes.reserve(1)?;
            self.gaps.reserve()?;
        }

        let removed = self.gaps.remove(chosen);
        debug_assert!(removed.is_some(), "free block {chosen:?} was not indexed");

        let serial = self.next_serial;
        self.next_serial += 1;

        let allocated = self.nodes.data_mut(chosen);
        allocated.size = size;
        allocated.is_free = false;
        allocated.serial = serial;

        if remainder > 0 {
            let offset = block.offset + size;
            // Both reservations above make these infallible.
            let rest = self.nodes.add_node(Some(chosen), Block::free(offset, remainder))?;
            self.gaps.insert(remainder, offset, rest)?;
        }

        self.alloc_size += size;
        self.num_allocs += 1;

        trace!(pool = self.id, offset = block.offset, size, remainder, "allocated");

        Ok(Allocation {
            pool: self.id,
            node: chosen,
            offset: block.offset,
            size,
            serial,
        })
    }

    /// Picks the block an allocation of `size` bytes is carved from.
    fn find_fit(&self, size: usize) -> Option<NodeId> {
        match self.policy {
            FitPolicy::FirstFit => self
                .nodes
                .iter()
                .find(|(_, block)| block.is_free && block.size >= size)
                .map(|(id, _)| id),
            // The index is sorted by size, so the first sufficient entry is
            // the smallest sufficient block.
            FitPolicy::BestFit => self.gaps.best_fit(size).map(|gap| gap.node),
        }
    }

    /// Gives an allocation back to the pool.
    ///
    /// The block is merged with its next neighbour, then with its previous
    /// one, whichever of them is free. The resulting free block gets exactly
    /// one gap index entry.
    pub fn deallocate(&mut self, allocation: Allocation) -> Result<()> {
        let id = self.resolve(&allocation)?;

        // Only a block without free neighbours adds a gap. A merge removes
        // at least one entry before the single insert below.
        let has_free_neighbour = [self.nodes.prev(id), self.nodes.next(id)]
            .into_iter()
            .flatten()
            .any(|neighbour| self.nodes.data(neighbour).is_free);
        if !has_free_neighbour {
            self.gaps.reserve()?;
        }

        let freed = self.nodes.data_mut(id);
        freed.is_free = true;
        freed.serial = 0;

        self.alloc_size -= allocation.size;
        self.num_allocs -= 1;

        let absorbed_next = self.merge_with_next(id);
        let merged = self.merge_with_prev(id);

        let absorbed_prev = merged != id;
        let block = *self.nodes.data(merged);
        // Reserved above, or made room for by a merge.
        self.gaps.insert(block.size, block.offset, merged)?;

        trace!(
            pool = self.id,
            offset = allocation.offset,
            size = allocation.size,
            absorbed_next,
            absorbed_prev,
            gap = block.size,
            "deallocated"
        );

        Ok(())
    }

    /// Tries to merge the free block `id` with the next one in address
    /// order. This can be performed if that next block is free.
    fn merge_with_next(&mut self, id: NodeId) -> bool {
        let Some(next) = self.nodes.next(id) else {
            return false;
        };

        let next_block = *self.nodes.data(next);
        if !next_block.is_free {
            return false;
        }

        // The next block is going away, so is its gap.
        self.gaps.remove(next);
        self.nodes.data_mut(id).size += next_block.size;
        self.nodes.remove(next);

        true
    }

    /// Tries to merge the free block `id` into the previous one in address
    /// order. Returns the block that now holds the merged space.
    fn merge_with_prev(&mut self, id: NodeId) -> NodeId {
        let Some(prev) = self.nodes.prev(id) else {
            return id;
        };

        if !self.nodes.data(prev).is_free {
            return id;
        }

        // The previous block changes size, its gap is re-inserted by the caller.
        self.gaps.remove(prev);
        let size = self.nodes.data(id).size;
        self.nodes.data_mut(prev).size += size;
        self.nodes.remove(id);

        prev
    }

    /// Looks up the live in-use block behind `allocation`.
    fn resolve(&self, allocation: &Allocation) -> Result<NodeId> {
        if allocation.pool != self.id {
            return Err(PoolError::InvalidHandle);
        }

        let node = self
            .nodes
            .get(allocation.node)
            .ok_or(PoolError::InvalidHandle)?;
        let block = &node.data;

        let live = !block.is_free
            && block.serial == allocation.serial
            && block.offset == allocation.offset
            && block.size == allocation.size;

        if live {
            Ok(allocation.node)
        } else {
            Err(PoolError::InvalidHandle)
        }
    }

    /// Bytes of a live allocation.
    pub fn bytes(&self, allocation: &Allocation) -> Result<&[u8]> {
        self.resolve(allocation)?;
        Ok(self.arena.slice(allocation.range()))
    }

    /// Bytes of a live allocation, for writing.
    pub fn bytes_mut(&mut self, allocation: &Allocation) -> Result<&mut [u8]> {
        self.resolve(allocation)?;
        Ok(self.arena.slice_mut(allocation.range()))
    }

    /// Snapshot of every block in address order.
    pub fn inspect(&self) -> Vec<Segment> {
        self.nodes
            .iter()
            .map(|(_, block)| Segment {
                len: block.size,
                in_use: !block.is_free,
            })
            .collect()
    }

    /// Walks both structures and reports the first inconsistency found.
    ///
    /// Meant for tests and diagnostics; it is linear in the number of blocks
    /// and quadratic in the number of gaps.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let mut expected_offset = 0;
        let mut expected_prev = None;
        let mut blocks = 0;
        let mut free_blocks = 0;
        let mut used_blocks = 0;
        let mut used_bytes = 0;
        let mut prev_free = false;

        for (id, block) in &self.nodes {
            if block.offset != expected_offset {
                return Err(format!(
                    "block {id:?} starts at {} instead of {expected_offset}",
                    block.offset
                ));
            }
            if block.size == 0 {
                return Err(format!("block {id:?} at {} is empty", block.offset));
            }
            if self.nodes.prev(id) != expected_prev {
                return Err(format!("block {id:?} has a broken prev link"));
            }

            if block.is_free {
                if prev_free {
                    return Err(format!("free block at {} follows a free block", block.offset));
                }
                match self.gaps.find(id) {
                    Some(gap) if gap.size == block.size && gap.offset == block.offset => {}
                    Some(gap) => {
                        return Err(format!(
                            "gap of block at {} says {}@{}, block is {}@{}",
                            block.offset, gap.size, gap.offset, block.size, block.offset
                        ));
                    }
                    None => {
                        return Err(format!("free block at {} is not indexed", block.offset));
                    }
                }
                free_blocks += 1;
            } else {
                if self.gaps.find(id).is_some() {
                    return Err(format!("used block at {} is indexed", block.offset));
                }
                used_blocks += 1;
                used_bytes += block.size;
            }

            prev_free = block.is_free;
            expected_offset = block.end();
            expected_prev = Some(id);
            blocks += 1;
        }

        if expected_offset != self.total_size() {
            return Err(format!(
                "blocks cover {expected_offset} of {} bytes",
                self.total_size()
            ));
        }
        if self.nodes.last() != expected_prev {
            return Err("tail does not match the last block".to_owned());
        }
        if blocks != self.nodes.len() {
            return Err(format!("{blocks} blocks linked, {} live", self.nodes.len()));
        }
        // Every free block found its own entry above, so equal counts rule out
        // duplicates and stale entries.
        if free_blocks != self.gaps.len() {
            return Err(format!(
                "{free_blocks} free blocks, {} gap entries",
                self.gaps.len()
            ));
        }
        if used_blocks != self.num_allocs {
            return Err(format!(
                "{used_blocks} used blocks, {} allocations counted",
                self.num_allocs
            ));
        }
        if used_bytes != self.alloc_size {
            return Err(format!(
                "{used_bytes} bytes in use, {} counted",
                self.alloc_size
            ));
        }
        if !self.gaps.min_at_front() || !self.gaps.is_sorted() {
            return Err("gap index is not sorted by size".to_owned());
        }

        Ok(())
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("stats", &self.stats())
            .field("blocks", &self.nodes.len())
            .finish_non_exhaustive()
    }
}
