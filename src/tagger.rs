use crate::debug::{DebugMagic, fill};

/// Marks memory as it changes hands.
pub trait MemoryTagger {
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `size` bytes.
    unsafe fn tag_allocation(&self, ptr: *mut u8, size: usize);

    /// # Safety
    ///
    /// `ptr` must be valid for writes of `size` bytes.
    unsafe fn tag_deallocation(&self, ptr: *mut u8, size: usize);

    /// # Safety
    ///
    /// `ptr` must be valid for writes of `size` bytes.
    unsafe fn tag_padding(&self, _ptr: *mut u8, _size: usize) {}
}

/// Leaves memory alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTagger;

impl MemoryTagger for NullTagger {
    #[inline(always)]
    unsafe fn tag_allocation(&self, _ptr: *mut u8, _size: usize) {}

    #[inline(always)]
    unsafe fn tag_deallocation(&self, _ptr: *mut u8, _size: usize) {}
}

/// Fills memory with [`DebugMagic`] patterns.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugTagger;

impl MemoryTagger for DebugTagger {
    unsafe fn tag_allocation(&self, ptr: *mut u8, size: usize) {
        unsafe { fill(ptr, size, DebugMagic::AllocatorAllocated) }
    }

    unsafe fn tag_deallocation(&self, ptr: *mut u8, size: usize) {
        unsafe { fill(ptr, size, DebugMagic::AllocatorFreed) }
    }

    unsafe fn tag_padding(&self, ptr: *mut u8, size: usize) {
        unsafe { fill(ptr, size, DebugMagic::Padding) }
    }
}
