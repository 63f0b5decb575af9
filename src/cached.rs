use crate::{
    block::MemoryBlock,
    block_allocator::BlockAllocator,
    cache::{MIN_CACHED_BLOCK_SIZE, MemoryBlockCache},
    error::{Error, Result},
};

/// Keeps deallocated blocks around instead of giving them back.
///
/// Getting a block from a real source (a syscall, the heap) is expensive, and
/// all blocks of a source have the same size, so a freed block is as good as
/// a new one. Blocks only go back to the wrapped allocator when the cache is
/// dropped or [`shrink_to_fit`](Self::shrink_to_fit) is called.
///
/// A freed block holds its own cache link, so the source has to hand out
/// blocks of at least [`MIN_CACHED_BLOCK_SIZE`] bytes.
pub struct CachedBlockAllocator<A: BlockAllocator> {
    underlying: A,
    cache: MemoryBlockCache,
}

impl<A: BlockAllocator> CachedBlockAllocator<A> {
    pub fn new(underlying: A) -> Result<Self> {
        let size = underlying.block_size();
        if size < MIN_CACHED_BLOCK_SIZE {
            return Err(Error::BlockTooSmall {
                size,
                min: MIN_CACHED_BLOCK_SIZE,
            });
        }

        Ok(Self {
            underlying,
            cache: MemoryBlockCache::new(),
        })
    }

    /// Number of blocks waiting to be reused.
    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }

    pub fn underlying(&self) -> &A {
        &self.underlying
    }

    /// Gives every cached block back to the wrapped allocator.
    pub fn shrink_to_fit(&mut self) {
        for block in self.cache.drain() {
            // SAFETY: only blocks from `underlying` are ever cached.
            unsafe { self.underlying.deallocate_block(block) };
        }
    }
}

impl<A: BlockAllocator> BlockAllocator for CachedBlockAllocator<A> {
    #[inline]
    fn allocate_block(&mut self) -> MemoryBlock {
        self.cache.request_block_from(&mut self.underlying)
    }

    #[inline]
    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        unsafe { self.cache.store_block(block) }
    }

    fn block_size(&self) -> usize {
        self.underlying.block_size()
    }

    fn block_align(&self) -> usize {
        self.underlying.block_align()
    }

    fn owns_block(&self, block: &MemoryBlock) -> bool {
        self.underlying.owns_block(block)
    }
}

impl<A: BlockAllocator> Drop for CachedBlockAllocator<A> {
    fn drop(&mut self) {
        self.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block_allocator::HeapBlockAllocator, testing::CountingBlockAllocator};

    #[test]
    fn freed_block_is_reused() {
        let mut source = CountingBlockAllocator::new(128);
        {
            let mut cached = CachedBlockAllocator::new(&mut source).unwrap();

            let first = cached.allocate_block();
            unsafe { cached.deallocate_block(first) };
            let second = cached.allocate_block();

            assert_eq!(first.address, second.address);
            assert_eq!(cached.underlying().allocations(), 1);

            unsafe { cached.deallocate_block(second) };
            assert_eq!(cached.cached_blocks(), 1);
            assert_eq!(cached.underlying().deallocations(), 0);
        }

        assert_eq!(source.allocations(), 1);
        assert_eq!(source.deallocations(), 1);
    }

    #[test]
    fn shrink_returns_every_block() {
        let mut cached = CachedBlockAllocator::new(CountingBlockAllocator::new(64)).unwrap();

        let blocks: Vec<_> = (0..3).map(|_| cached.allocate_block()).collect();
        for block in blocks {
            unsafe { cached.deallocate_block(block) };
        }
        assert_eq!(cached.cached_blocks(), 3);

        cached.shrink_to_fit();
        assert_eq!(cached.cached_blocks(), 0);
        assert_eq!(cached.underlying().deallocations(), 3);
    }

    #[test]
    fn word_sized_source_is_rejected() {
        let words = HeapBlockAllocator::new(8, 8).unwrap();

        assert!(matches!(
            CachedBlockAllocator::new(words),
            Err(Error::BlockTooSmall { size: 8, min: MIN_CACHED_BLOCK_SIZE })
        ));
    }

    #[test]
    fn smallest_cacheable_block_round_trips() {
        let source = HeapBlockAllocator::new(MIN_CACHED_BLOCK_SIZE, 8).unwrap();
        let mut cached = CachedBlockAllocator::new(source).unwrap();

        let first = cached.allocate_block();
        unsafe { cached.deallocate_block(first) };
        let second = cached.allocate_block();

        assert_eq!(second, first);
        unsafe { cached.deallocate_block(second) };
    }
}
