use std::slice;

use crate::{
    block::MemoryBlock,
    block_allocator::BlockAllocator,
    handler::{AllocatorInfo, Diagnostics, GlobalHandlers},
};

/// Byte patterns written into memory at each point of its life.
///
/// Looking at a byte in a debugger tells which event touched it last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DebugMagic {
    /// Block handed out by a block allocator.
    AllocatedBlock = 0xCB,
    /// Block given back to a block allocator.
    FreedBlock = 0xFB,
    /// Bytes handed out by a byte allocator.
    AllocatorAllocated = 0xCD,
    /// Bytes given back to a byte allocator.
    AllocatorFreed = 0xDD,
    /// Bytes skipped to satisfy an alignment.
    Padding = 0xED,
    /// Fence in front of an allocation.
    FenceStart = 0xFD,
    /// Fence behind an allocation.
    FenceEnd = 0xFE,
}

impl DebugMagic {
    #[inline]
    pub const fn byte(self) -> u8 {
        self as u8
    }
}

/// Writes `magic` over `size` bytes starting at `ptr`.
///
/// # Safety
///
/// `ptr` must be valid for writes of `size` bytes.
#[inline]
pub unsafe fn fill(ptr: *mut u8, size: usize, magic: DebugMagic) {
    unsafe { ptr.write_bytes(magic.byte(), size) }
}

/// Index of the first byte in `ptr..ptr + size` that isn't `magic`.
///
/// # Safety
///
/// `ptr` must be valid for reads of `size` bytes.
pub unsafe fn first_mismatch(ptr: *const u8, size: usize, magic: DebugMagic) -> Option<usize> {
    let bytes = unsafe { slice::from_raw_parts(ptr, size) };
    bytes.iter().position(|&b| b != magic.byte())
}

/// Index of the last byte in `ptr..ptr + size` that isn't `magic`.
///
/// # Safety
///
/// `ptr` must be valid for reads of `size` bytes.
pub unsafe fn last_mismatch(ptr: *const u8, size: usize, magic: DebugMagic) -> Option<usize> {
    let bytes = unsafe { slice::from_raw_parts(ptr, size) };
    bytes.iter().rposition(|&b| b != magic.byte())
}

/// Block allocator wrapper that stamps every block and keeps count of what is
/// outstanding.
///
/// Blocks are filled with [`DebugMagic::AllocatedBlock`] when handed out and
/// with [`DebugMagic::FreedBlock`] before going back to the wrapped allocator.
/// Giving back more than is outstanding is reported as a double free, and
/// dropping the wrapper while blocks are still out is reported as a leak.
pub struct DebugBlockAllocator<A: BlockAllocator, D: Diagnostics = GlobalHandlers> {
    inner: A,
    diagnostics: D,
    size: usize,
    allocations: usize,
}

impl<A: BlockAllocator> DebugBlockAllocator<A> {
    pub fn new(inner: A) -> Self {
        Self::with_diagnostics(inner, GlobalHandlers)
    }
}

impl<A: BlockAllocator, D: Diagnostics> DebugBlockAllocator<A, D> {
    pub fn with_diagnostics(inner: A, diagnostics: D) -> Self {
        Self {
            inner,
            diagnostics,
            size: 0,
            allocations: 0,
        }
    }

    /// Bytes currently handed out.
    pub fn outstanding_size(&self) -> usize {
        self.size
    }

    /// Blocks currently handed out.
    pub fn outstanding_blocks(&self) -> usize {
        self.allocations
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    fn info(&self) -> AllocatorInfo {
        AllocatorInfo::new("memcompose::DebugBlockAllocator", self)
    }
}

impl<A: BlockAllocator, D: Diagnostics> BlockAllocator for DebugBlockAllocator<A, D> {
    fn allocate_block(&mut self) -> MemoryBlock {
        let block = self.inner.allocate_block();
        if block.is_null() {
            return block;
        }

        // SAFETY: a fresh block is ours to write.
        unsafe { fill(block.address, block.size, DebugMagic::AllocatedBlock) };
        self.size += block.size;
        self.allocations += 1;

        block
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        if self.allocations == 0 || self.size < block.size {
            let info = self.info();
            self.diagnostics.double_free(&info, block.address, block.size);
            return;
        }

        unsafe {
            fill(block.address, block.size, DebugMagic::FreedBlock);
            self.inner.deallocate_block(block);
        }
        self.size -= block.size;
        self.allocations -= 1;
    }

    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn block_align(&self) -> usize {
        self.inner.block_align()
    }

    fn owns_block(&self, block: &MemoryBlock) -> bool {
        self.inner.owns_block(block)
    }
}

impl<A: BlockAllocator, D: Diagnostics> Drop for DebugBlockAllocator<A, D> {
    fn drop(&mut self) {
        if self.allocations != 0 {
            let info = self.info();
            log::debug!(
                "{} blocks still outstanding when dropping debug block allocator",
                self.allocations
            );
            self.diagnostics.leak(&info, std::ptr::null(), self.size as isize);
        }
    }
}
