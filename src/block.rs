/// This is the structure of a block descriptor. It describes one contiguous
/// region of a pool's arena, either handed out to a caller or free.
///
/// Descriptors never live inside the arena itself. They are stored in the
/// pool's [`crate::node_heap::NodeHeap`], wrapped in a
/// [`crate::node_heap::Node`] that links them in address order:
///
/// ```text
///              offset                  offset + size
///                 |                         |
/// +---------------v-------------------------v---------------+
/// |   ...  | prev |          this           | next |  ...   |
/// +---------------------------------------------------------+
/// ```
///
/// The successor of a block always starts at `offset + size`, there is no
/// padding between blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    /// Offset of the first byte of the block inside the arena.
    pub offset: usize,
    /// Size of the block.
    pub size: usize,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
    /// Serial stamped when the block was handed out. Allocation handles carry
    /// it so a stale handle to a recycled descriptor is told apart.
    pub serial: u64,
}

impl Block {
    pub const fn free(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            is_free: true,
            serial: 0,
        }
    }

    /// First byte past the end of the block.
    #[inline]
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_block_spans_its_range() {
        let block = Block::free(100, 200);

        assert!(block.is_free);
        assert_eq!(300, block.end());
    }
}
