use std::{
    alloc::{self, Layout},
    ptr::{self, NonNull},
};

use crate::{
    block_allocator::BlockAllocator,
    cache::{MIN_CACHED_BLOCK_SIZE, MemoryBlockCache},
    utils::{align_offset, check_align},
};

/// Byte granular allocation.
pub trait RawAllocator {
    /// Returns `None` if the request can't be served.
    fn try_allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must come from `try_allocate` of this instance with the same
    /// `size` and `align`, and must not be deallocated twice.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize, align: usize);
}

/// Byte allocator able to align a pointer at an offset.
///
/// `try_allocate_offset(size, align, offset)` returns `ptr` such that
/// `ptr + offset` is a multiple of `align`. This is what lets a wrapper put a
/// header (or a fence) in front of the memory it hands out and still honor
/// the alignment the caller asked for:
///
/// ```text
///  ptr            ptr + offset (aligned)
///   |                  |
///   v                  v
///   +------------------+---------------------------+
///   |      header      |        caller memory      |
///   +------------------+---------------------------+
///   <---------------------- size ----------------->
/// ```
///
/// Every extended allocator is a [`RawAllocator`] with an offset of zero.
pub trait ExtendedAllocator {
    /// Returns `None` if the request can't be served.
    fn try_allocate_offset(
        &mut self,
        size: usize,
        align: usize,
        offset: usize,
    ) -> Option<NonNull<u8>>;

    /// Same as [`try_allocate_offset`](Self::try_allocate_offset), but also
    /// returns how many bytes right in front of the pointer were skipped to
    /// honor the alignment. They are part of the allocation and may be
    /// written to.
    fn try_allocate_padded(
        &mut self,
        size: usize,
        align: usize,
        offset: usize,
    ) -> Option<(NonNull<u8>, usize)> {
        self.try_allocate_offset(size, align, offset).map(|ptr| (ptr, 0))
    }

    /// # Safety
    ///
    /// `ptr` must come from `try_allocate_offset` of this instance with the
    /// same `size`, `align` and `offset`, and must not be deallocated twice.
    unsafe fn deallocate_offset(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        align: usize,
        offset: usize,
    );
}

impl<A: ExtendedAllocator + ?Sized> RawAllocator for A {
    #[inline]
    fn try_allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        self.try_allocate_offset(size, align, 0)
    }

    #[inline]
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize, align: usize) {
        unsafe { self.deallocate_offset(ptr, size, align, 0) }
    }
}

/// An allocator that can drop everything it handed out in one go.
pub trait TruncatingAllocator: ExtendedAllocator {
    /// # Safety
    ///
    /// Nothing allocated so far may be used afterwards.
    unsafe fn deallocate_all(&mut self);
}

/// An allocator that can tell whether a pointer is one of its own.
pub trait Owns {
    fn owns(&self, ptr: NonNull<u8>) -> bool;
}

impl<A: ExtendedAllocator + ?Sized> ExtendedAllocator for &mut A {
    #[inline]
    fn try_allocate_offset(
        &mut self,
        size: usize,
        align: usize,
        offset: usize,
    ) -> Option<NonNull<u8>> {
        (**self).try_allocate_offset(size, align, offset)
    }

    #[inline]
    fn try_allocate_padded(
        &mut self,
        size: usize,
        align: usize,
        offset: usize,
    ) -> Option<(NonNull<u8>, usize)> {
        (**self).try_allocate_padded(size, align, offset)
    }

    #[inline]
    unsafe fn deallocate_offset(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        align: usize,
        offset: usize,
    ) {
        unsafe { (**self).deallocate_offset(ptr, size, align, offset) }
    }
}

impl<A: TruncatingAllocator + ?Sized> TruncatingAllocator for &mut A {
    #[inline]
    unsafe fn deallocate_all(&mut self) {
        unsafe { (**self).deallocate_all() }
    }
}

impl<A: Owns + ?Sized> Owns for &mut A {
    #[inline]
    fn owns(&self, ptr: NonNull<u8>) -> bool {
        (**self).owns(ptr)
    }
}

/// The global heap, with offset support.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl HeapAllocator {
    /// Layout to ask the heap for and the number of bytes skipped at its start.
    fn layout(size: usize, align: usize, offset: usize) -> Option<(Layout, usize)> {
        check_align(align);
        let skip = (align - offset % align) % align;
        let total = size.checked_add(skip)?.max(1);
        let layout = Layout::from_size_align(total, align).ok()?;
        Some((layout, skip))
    }
}

impl ExtendedAllocator for HeapAllocator {
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
        let (layout, skip) = Self::layout(size, align, offset)?;
        // SAFETY: the layout is never zero sized.
        let base = unsafe { alloc::alloc(layout) };
        if base.is_null() {
            return None;
        }
        NonNull::new(base.wrapping_add(skip)).map(|ptr| (ptr, skip))
    }

    unsafe fn deallocate_offset(
        &mut self,
        ptr: NonNull<u8>,
        size: usize,
        align: usize,
        offset: usize,
    ) {
        let Some((layout, skip)) = Self::layout(size, align, offset) else {
            return;
        };
        unsafe { alloc::dealloc(ptr.as_ptr().sub(skip), layout) }
    }
}

/// Bump allocator carving memory out of blocks of a [`BlockAllocator`].
///
/// Blocks in use are kept in a [`MemoryBlockCache`], which means the first
/// bytes of each block hold the link to the previous one:
///
/// ```text
///          current block                         previous block
///   +------+-------+-------+--------+      +------+----------------+
///   | link | alloc | alloc |  free  | ---> | link |  alloc | alloc |
///   +------+-------+-------+--------+      +------+----------------+
///                          ^        ^
///                        cursor    end
/// ```
///
/// Single deallocations do nothing; everything goes back to the block source
/// in [`deallocate_all`](TruncatingAllocator::deallocate_all) or on drop.
pub struct LinearAllocator<B: BlockAllocator> {
    source: B,
    used: MemoryBlockCache,
    cursor: *mut u8,
    end: *mut u8,
}

// Blocks in use are exclusively owned by the allocator.
unsafe impl<B: BlockAllocator + Send> Send for LinearAllocator<B> {}

impl<B: BlockAllocator> LinearAllocator<B> {
    pub fn new(source: B) -> Self {
        Self {
            source,
            used: MemoryBlockCache::new(),
            cursor: ptr::null_mut(),
            end: ptr::null_mut(),
        }
    }

    /// Number of blocks taken from the source.
    pub fn used_blocks(&self) -> usize {
        self.used.len()
    }

    pub fn source(&self) -> &B {
        &self.source
    }

    fn bump(
        &mut self,
        size: usize,
        align: usize,
        offset: usize,
    ) -> Option<(NonNull<u8>, usize)> {
        if self.cursor.is_null() {
            return None;
        }

        let skip = align_offset(self.cursor as usize, offset, align);
        let available = self.end as usize - self.cursor as usize;
        if skip.checked_add(size)? > available {
            return None;
        }

        let ptr = self.cursor.wrapping_add(skip);
        self.cursor = ptr.wrapping_add(size);
        NonNull::new(ptr).map(|ptr| (ptr, skip))
    }
}

impl<B: BlockAllocator> ExtendedAllocator for LinearAllocator<B> {
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
        check_align(align);

        if let Some(bumped) = self.bump(size, align, offset) {
            return Some(bumped);
        }

        let block = self.source.allocate_block();
        if block.is_null() {
            return None;
        }
        if block.size <= MIN_CACHED_BLOCK_SIZE {
            // SAFETY: the block is fresh from the source.
            unsafe { self.source.deallocate_block(block) };
            return None;
        }

        let previous = (self.cursor, self.end);
        // SAFETY: the block is fresh from the source and big enough for the link.
        unsafe { self.used.store_block(block) };
        self.cursor = block.address.wrapping_add(MIN_CACHED_BLOCK_SIZE);
        self.end = block.end();

        if let Some(bumped) = self.bump(size, align, offset) {
            return Some(bumped);
        }

        // Doesn't fit even in a whole block, give it back untouched.
        let block = self.used.request_block();
        unsafe { self.source.deallocate_block(block) };
        (self.cursor, self.end) = previous;
        None
    }

    unsafe fn deallocate_offset(
        &mut self,
        ptr: NonNull<u8>,
        _size: usize,
        _align: usize,
        _offset: usize,
    ) {
        debug_assert!(self.owns(ptr), "{ptr:p} was not allocated here");
    }
}

impl<B: BlockAllocator> TruncatingAllocator for LinearAllocator<B> {
    unsafe fn deallocate_all(&mut self) {
        for block in self.used.drain() {
            // SAFETY: only blocks from `source` are in `used`.
            unsafe { self.source.deallocate_block(block) };
        }
        self.cursor = ptr::null_mut();
        self.end = ptr::null_mut();
    }
}

impl<B: BlockAllocator> Owns for LinearAllocator<B> {
    fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.used.contains(ptr.as_ptr())
    }
}

impl<B: BlockAllocator> Drop for LinearAllocator<B> {
    fn drop(&mut self) {
        unsafe { self.deallocate_all() }
    }
}
