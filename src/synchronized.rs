use parking_lot::lock_api::{Mutex, RawMutex};

use crate::{block::MemoryBlock, block_allocator::BlockAllocator, lock::DefaultMutex};

/// Serializes every call to the wrapped block allocator.
///
/// The lock is held for the duration of one call and released on every way
/// out of it. Calls are not reentrant: an allocator calling back into its own
/// wrapper deadlocks.
///
/// `&SynchronizedBlockAllocator` is a [`BlockAllocator`] too, so a single
/// instance can be used from several threads at once.
pub struct SynchronizedBlockAllocator<A: BlockAllocator, L: RawMutex = DefaultMutex> {
    inner: Mutex<L, A>,
    block_size: usize,
    block_align: usize,
}

impl<A: BlockAllocator, L: RawMutex> SynchronizedBlockAllocator<A, L> {
    pub fn new(inner: A) -> Self {
        Self {
            block_size: inner.block_size(),
            block_align: inner.block_align(),
            inner: Mutex::new(inner),
        }
    }

    pub fn allocate_block(&self) -> MemoryBlock {
        self.inner.lock().allocate_block()
    }

    /// # Safety
    ///
    /// See [`BlockAllocator::deallocate_block`].
    pub unsafe fn deallocate_block(&self, block: MemoryBlock) {
        unsafe { self.inner.lock().deallocate_block(block) }
    }

    pub fn owns_block(&self, block: &MemoryBlock) -> bool {
        self.inner.lock().owns_block(block)
    }

    pub fn into_inner(self) -> A {
        self.inner.into_inner()
    }
}

impl<A: BlockAllocator, L: RawMutex> BlockAllocator for SynchronizedBlockAllocator<A, L> {
    fn allocate_block(&mut self) -> MemoryBlock {
        self.inner.get_mut().allocate_block()
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        unsafe { self.inner.get_mut().deallocate_block(block) }
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_align(&self) -> usize {
        self.block_align
    }

    fn owns_block(&self, block: &MemoryBlock) -> bool {
        self.inner.lock().owns_block(block)
    }
}

impl<A: BlockAllocator, L: RawMutex> BlockAllocator for &SynchronizedBlockAllocator<A, L> {
    fn allocate_block(&mut self) -> MemoryBlock {
        (**self).allocate_block()
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        unsafe { (**self).deallocate_block(block) }
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_align(&self) -> usize {
        self.block_align
    }

    fn owns_block(&self, block: &MemoryBlock) -> bool {
        (**self).owns_block(block)
    }
}
