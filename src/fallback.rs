use std::ptr::NonNull;

use crate::{
    allocator::{ExtendedAllocator, Owns},
    block::MemoryBlock,
    block_allocator::{AnyBlockAllocator, BlockAllocator},
};

/// Tries a chain of block allocators in order.
///
/// The members are borrowed, not owned. A request goes to the first member,
/// then to the next one each time a member returns the null block.
///
/// A block being deallocated goes to the first member that
/// [claims it](BlockAllocator::owns_block). If nobody does, it goes to the
/// last member, so allocators that can't tell ownership belong at the end of
/// the chain.
pub struct FallbackBlockAllocator<'a, const N: usize> {
    members: [AnyBlockAllocator<'a>; N],
}

impl<'a, const N: usize> FallbackBlockAllocator<'a, N> {
    pub fn new(members: [AnyBlockAllocator<'a>; N]) -> Self {
        const { assert!(N > 0, "a fallback chain needs at least one allocator") };
        Self { members }
    }

    pub fn members(&self) -> &[AnyBlockAllocator<'a>] {
        &self.members
    }
}

impl<const N: usize> BlockAllocator for FallbackBlockAllocator<'_, N> {
    fn allocate_block(&mut self) -> MemoryBlock {
        self.members
            .iter_mut()
            .map(|member| member.allocate_block())
            .find(|block| !block.is_null())
            .unwrap_or(MemoryBlock::NULL)
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        let Some((last, rest)) = self.members.split_last_mut() else {
            return;
        };

        let owner = rest
            .iter_mut()
            .find(|member| member.owns_block(&block))
            .unwrap_or(last);

        unsafe { owner.deallocate_block(block) }
    }

    /// Smallest block size of the chain, every block is at least this big.
    fn block_size(&self) -> usize {
        self.members
            .iter()
            .map(BlockAllocator::block_size)
            .min()
            .unwrap_or(0)
    }

    /// Smallest alignment of the chain.
    fn block_align(&self) -> usize {
        self.members
            .iter()
            .map(BlockAllocator::block_align)
            .min()
            .unwrap_or(1)
    }

    fn owns_block(&self, block: &MemoryBlock) -> bool {
        self.members.iter().any(|member| member.owns_block(block))
    }
}

/// Byte allocator falling back to `S` when `P` can't serve a request.
///
/// Deallocation is routed by asking the primary whether it owns the pointer.
/// That only works if the two allocators never hand out addresses from the
/// same range: a secondary drawing from memory the primary also claims (say,
/// both nested inside one block) would get its pointers sent to the primary.
/// Debug builds check every pointer coming from the secondary for this.
pub struct FallbackAllocator<P, S> {
    primary: P,
    secondary: S,
}

impl<P: ExtendedAllocator + Owns, S: ExtendedAllocator> FallbackAllocator<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn secondary(&self) -> &S {
        &self.secondary
    }
}

impl<P: ExtendedAllocator + Owns, S: ExtendedAllocator> ExtendedAllocator
    for FallbackAllocator<P, S>
{
    fn try_allocate_offset(
        &mut self,
        size: usize,
        align: usize,
        offset: usize,
    ) -> Option<NonNull<u8>> {
        self.try_allocate_padded(size, align, offset).map(|(ptr, _)| ptr)
    }

    fn try_allocate_padded(
        &mut self,
        size: usize,
        align: usize,
        offset: usize,
    ) -> Option<(NonNull<u8>, usize)> {
        if let Some(padded) = self.primary.try_allocate_padded(size, align, offset) {
            return Some(padded);
        }

        let (ptr, skip) = self.secondary.try_allocate_padded(size, align, offset)?;
        debug_assert!(
            !self.primary.owns(ptr),
            "secondary returned {ptr:p}, which the primary claims as its own"
        );
        Some((ptr, skip))
    }

    unsafe fn deallocate_offset(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        align: usize,
        offset: usize,
    ) {
        unsafe {
            if self.primary.owns(ptr) {
                self.primary.deallocate_offset(ptr, size, align, offset);
            } else {
                self.secondary.deallocate_offset(ptr, size, align, offset);
            }
        }
    }
}

impl<P: ExtendedAllocator + Owns, S: ExtendedAllocator + Owns> Owns for FallbackAllocator<P, S> {
    fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.primary.owns(ptr) || self.secondary.owns(ptr)
    }
}
