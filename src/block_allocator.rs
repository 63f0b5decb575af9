use std::alloc::{self, Layout};

use crate::{
    block::MemoryBlock,
    error::{Error, Result},
};

/// Something that hands out memory in blocks of a fixed, allocator specific
/// granularity.
///
/// Every adapter in this crate ([`crate::CachedBlockAllocator`],
/// [`crate::FallbackBlockAllocator`], [`crate::SynchronizedBlockAllocator`],
/// [`crate::DebugBlockAllocator`]) is itself a `BlockAllocator`, so they stack.
///
/// The trait is object safe, see [`AnyBlockAllocator`].
pub trait BlockAllocator {
    /// Returns a new block, or [`MemoryBlock::NULL`] if the allocator can't
    /// provide one.
    fn allocate_block(&mut self) -> MemoryBlock;

    /// Gives `block` back.
    ///
    /// # Safety
    ///
    /// `block` must have been returned by `allocate_block` of this very
    /// instance, unmodified, and must not have been deallocated already.
    unsafe fn deallocate_block(&mut self, block: MemoryBlock);

    /// Size of the blocks returned by `allocate_block`.
    fn block_size(&self) -> usize;

    /// Alignment of the blocks returned by `allocate_block`.
    fn block_align(&self) -> usize;

    /// Whether `block` was handed out by this allocator. Allocators that
    /// can't tell answer `false`.
    fn owns_block(&self, _block: &MemoryBlock) -> bool {
        false
    }
}

impl<A: BlockAllocator + ?Sized> BlockAllocator for &mut A {
    #[inline]
    fn allocate_block(&mut self) -> MemoryBlock {
        (**self).allocate_block()
    }

    #[inline]
    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        unsafe { (**self).deallocate_block(block) }
    }

    #[inline]
    fn block_size(&self) -> usize {
        (**self).block_size()
    }

    #[inline]
    fn block_align(&self) -> usize {
        (**self).block_align()
    }

    #[inline]
    fn owns_block(&self, block: &MemoryBlock) -> bool {
        (**self).owns_block(block)
    }
}

/// Type erased, non-owning view of a [`BlockAllocator`].
///
/// The view borrows the allocator for `'a`, so it can't outlive it.
pub struct AnyBlockAllocator<'a> {
    inner: &'a mut dyn BlockAllocator,
}

impl<'a> AnyBlockAllocator<'a> {
    pub fn new<A: BlockAllocator>(allocator: &'a mut A) -> Self {
        Self { inner: allocator }
    }
}

impl<'a, A: BlockAllocator> From<&'a mut A> for AnyBlockAllocator<'a> {
    fn from(allocator: &'a mut A) -> Self {
        Self::new(allocator)
    }
}

impl BlockAllocator for AnyBlockAllocator<'_> {
    #[inline]
    fn allocate_block(&mut self) -> MemoryBlock {
        self.inner.allocate_block()
    }

    #[inline]
    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        unsafe { self.inner.deallocate_block(block) }
    }

    #[inline]
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    #[inline]
    fn block_align(&self) -> usize {
        self.inner.block_align()
    }

    #[inline]
    fn owns_block(&self, block: &MemoryBlock) -> bool {
        self.inner.owns_block(block)
    }
}

/// Fixed size blocks straight from the global heap.
#[derive(Debug, Clone, Copy)]
pub struct HeapBlockAllocator {
    layout: Layout,
}

impl HeapBlockAllocator {
    pub fn new(block_size: usize, block_align: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::ZeroSized { what: "block size" });
        }
        let layout = Layout::from_size_align(block_size, block_align)
            .map_err(|_| Error::InvalidAlignment { align: block_align })?;

        Ok(Self { layout })
    }
}

impl BlockAllocator for HeapBlockAllocator {
    fn allocate_block(&mut self) -> MemoryBlock {
        // SAFETY: the layout has a non-zero size.
        let address = unsafe { alloc::alloc(self.layout) };
        if address.is_null() {
            return MemoryBlock::NULL;
        }
        MemoryBlock::new(address, self.layout.size())
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        debug_assert_eq!(block.size, self.layout.size());
        unsafe { alloc::dealloc(block.address, self.layout) }
    }

    fn block_size(&self) -> usize {
        self.layout.size()
    }

    fn block_align(&self) -> usize {
        self.layout.align()
    }
}
