use std::{mem, ptr};

use crate::{block::MemoryBlock, block_allocator::BlockAllocator};

/// Link written into the first bytes of every cached block.
///
/// ```text
/// +------------------------+ <--------+
/// |       next: *Node      |          |
/// +------------------------+          |-------> Node (inside the block)
/// |       size: usize      |          |
/// +------------------------+ <--------+
/// |                        |
/// |     Unused payload     |
/// |          ...           |
/// +------------------------+
/// ```
#[repr(C)]
struct Node {
    next: *mut Node,
    size: usize,
}

/// Smallest block the cache can hold: it needs room for its link.
pub const MIN_CACHED_BLOCK_SIZE: usize = mem::size_of::<Node>();

/// Intrusive free list of [`MemoryBlock`].
///
/// The cache doesn't allocate anything itself. As the blocks it holds are free,
/// their own storage is used to keep the list:
///
/// ```text
///        head                                            tail
///         |                                               |
///   +-----v------+       +------------+       +-----------v+
///   | Node |     | ----> | Node |     | ----> | Node |     | ----> null
///   +------------+       +------------+       +------------+
/// ```
///
/// Only the link at the start of a block is ever read or written. Blocks of
/// different sizes can be mixed, but an adapter recycling blocks assumes all of
/// them came from the same source.
///
/// Whoever owns a cache has to [`drain`](Self::drain) it back into the blocks'
/// origin before dropping it, otherwise that memory is stranded.
pub struct MemoryBlockCache {
    head: *mut Node,
    tail: *mut Node,
    len: usize,
    size_bytes: usize,
}

// The cache exclusively owns the free blocks linked into it.
unsafe impl Send for MemoryBlockCache {}

impl MemoryBlockCache {
    /// Creates a new empty cache.
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            len: 0,
            size_bytes: 0,
        }
    }

    /// Number of blocks in the cache.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Sum of the sizes of every cached block.
    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Pushes `block` on top of the cache.
    ///
    /// # Panics
    ///
    /// Panics if `block` is null or can't hold the link (see [`MIN_CACHED_BLOCK_SIZE`]).
    ///
    /// # Safety
    ///
    /// `block` must be valid for writes for its whole size, must not be in use
    /// anymore and must not already be in this or any other cache.
    pub unsafe fn store_block(&mut self, block: MemoryBlock) {
        assert!(!block.is_null(), "can't cache the null block");
        assert!(
            block.size >= MIN_CACHED_BLOCK_SIZE,
            "block of {} bytes can't hold a cache link",
            block.size
        );

        let node = block.address.cast::<Node>();
        unsafe {
            node.write_unaligned(Node {
                next: self.head,
                size: block.size,
            });
        }

        if self.head.is_null() {
            self.tail = node;
        }
        self.head = node;
        self.len += 1;
        self.size_bytes += block.size;
    }

    /// Pops the block on top of the cache, or the null block if it is empty.
    pub fn request_block(&mut self) -> MemoryBlock {
        if self.head.is_null() {
            return MemoryBlock::NULL;
        }

        let node = self.head;
        // SAFETY: every node was written by `store_block` into a block we own.
        let Node { next, size } = unsafe { node.read_unaligned() };

        self.head = next;
        if next.is_null() {
            self.tail = ptr::null_mut();
        }
        self.len -= 1;
        self.size_bytes -= size;

        MemoryBlock::new(node.cast(), size)
    }

    /// Pops a cached block or, if there is none, asks `allocator` for a new one.
    pub fn request_block_from<A>(&mut self, allocator: &mut A) -> MemoryBlock
    where
        A: BlockAllocator + ?Sized,
    {
        if self.is_empty() {
            allocator.allocate_block()
        } else {
            self.request_block()
        }
    }

    /// Moves every block of `other` on top of this cache. `other` is left empty.
    pub fn steal_blocks(&mut self, other: &mut Self) {
        if other.is_empty() {
            return;
        }

        // SAFETY: `other.tail` is the last node of a non-empty chain.
        unsafe {
            let mut tail = other.tail.read_unaligned();
            tail.next = self.head;
            other.tail.write_unaligned(tail);
        }

        if self.head.is_null() {
            self.tail = other.tail;
        }
        self.head = other.head;
        self.len += other.len;
        self.size_bytes += other.size_bytes;

        other.head = ptr::null_mut();
        other.tail = ptr::null_mut();
        other.len = 0;
        other.size_bytes = 0;
    }

    /// Whether `ptr` points inside any cached block. This walks the whole
    /// list, so keep it for assertions and debugging.
    pub fn contains(&self, ptr: *const u8) -> bool {
        self.iter().any(|block| block.contains(ptr))
    }

    /// Iterates over the cached blocks, top first.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.head,
            remaining: self.len,
            _cache: self,
        }
    }

    /// Pops every block. Blocks not consumed by the caller are simply
    /// unlinked, not released anywhere.
    pub fn drain(&mut self) -> Drain<'_> {
        Drain { cache: self }
    }
}

impl Default for MemoryBlockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryBlockCache {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::warn!(
                "dropping block cache with {} blocks ({} bytes) still linked",
                self.len,
                self.size_bytes
            );
        }
    }
}

pub struct Iter<'a> {
    current: *mut Node,
    remaining: usize,
    _cache: &'a MemoryBlockCache,
}

impl Iterator for Iter<'_> {
    type Item = MemoryBlock;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_null() {
            return None;
        }

        let node = self.current;
        let Node { next, size } = unsafe { node.read_unaligned() };
        self.current = next;
        self.remaining -= 1;

        Some(MemoryBlock::new(node.cast(), size))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

pub struct Drain<'a> {
    cache: &'a mut MemoryBlockCache,
}

impl Iterator for Drain<'_> {
    type Item = MemoryBlock;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.cache.request_block();
        (!block.is_null()).then_some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.cache.len, Some(self.cache.len))
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        while self.next().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingBlockAllocator, Storage};
    use std::collections::HashSet;

    #[test]
    fn new_cache_is_empty() {
        let mut cache = MemoryBlockCache::new();

        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
        assert!(cache.request_block().is_null());
    }

    #[test]
    fn stored_block_comes_back() {
        let storage = Storage::new(4, 64);
        let mut cache = MemoryBlockCache::new();
        let block = storage.block(2);

        unsafe { cache.store_block(block) };
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 64);

        assert_eq!(cache.request_block(), block);
        assert!(cache.is_empty());
    }

    #[test]
    fn draining_returns_every_block() {
        let storage = Storage::new(8, 32);
        let mut cache = MemoryBlockCache::new();
        let stored: HashSet<_> = (0..8).map(|i| storage.block(i)).collect();

        for block in &stored {
            unsafe { cache.store_block(*block) };
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(cache.size_bytes(), 8 * 32);

        let requested: HashSet<_> = (0..8).map(|_| cache.request_block()).collect();

        assert_eq!(requested, stored);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn mixed_sizes_keep_their_size() {
        let small = Storage::new(1, 16);
        let large = Storage::new(1, 128);
        let mut cache = MemoryBlockCache::new();

        unsafe {
            cache.store_block(small.block(0));
            cache.store_block(large.block(0));
        }

        assert_eq!(cache.request_block().size, 128);
        assert_eq!(cache.request_block().size, 16);
    }

    #[test]
    fn steal_splices_whole_chain() {
        let storage = Storage::new(5, 32);
        let mut mine = MemoryBlockCache::new();
        let mut theirs = MemoryBlockCache::new();

        unsafe {
            mine.store_block(storage.block(0));
            theirs.store_block(storage.block(1));
            theirs.store_block(storage.block(2));
            theirs.store_block(storage.block(3));
        }

        mine.steal_blocks(&mut theirs);

        assert!(theirs.is_empty());
        assert_eq!(theirs.size_bytes(), 0);
        assert_eq!(mine.len(), 4);
        assert_eq!(mine.size_bytes(), 4 * 32);

        // Stolen blocks sit on top, the old chain follows.
        let order: Vec<_> = mine.drain().collect();
        assert_eq!(
            order,
            vec![
                storage.block(3),
                storage.block(2),
                storage.block(1),
                storage.block(0)
            ]
        );

        // Both lists have to remain usable after the splice.
        unsafe { theirs.store_block(storage.block(4)) };
        mine.steal_blocks(&mut theirs);
        assert_eq!(mine.request_block(), storage.block(4));
        assert!(mine.is_empty());
    }

    #[test]
    fn contains_scans_every_block() {
        let storage = Storage::new(3, 64);
        let mut cache = MemoryBlockCache::new();
        unsafe {
            cache.store_block(storage.block(0));
            cache.store_block(storage.block(2));
        }

        assert!(cache.contains(storage.block(0).address.wrapping_add(40)));
        assert!(cache.contains(storage.block(2).address));
        assert!(!cache.contains(storage.block(1).address));

        drop(cache.drain());
    }

    #[test]
    fn request_from_only_hits_allocator_when_empty() {
        let mut source = CountingBlockAllocator::new(64);
        let mut cache = MemoryBlockCache::new();

        let block = cache.request_block_from(&mut source);
        assert_eq!(source.allocations(), 1);

        unsafe { cache.store_block(block) };
        assert_eq!(cache.request_block_from(&mut source), block);
        assert_eq!(source.allocations(), 1);

        unsafe { source.deallocate_block(block) };
    }
}
