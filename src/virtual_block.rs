use std::{io, ptr::NonNull};

use crate::{
    block::MemoryBlock,
    block_allocator::BlockAllocator,
    cache::MemoryBlockCache,
    error::{Error, Result},
    kernel::{Kernel, VirtualMemory},
};

/// Block allocator handing out single pages of a virtual memory reservation.
///
/// The whole range is reserved up front, which only costs address space.
/// Pages are committed one at a time, front to back, the first time they are
/// needed:
///
/// ```text
///  base                                                    base + pages * page_size
///   |                                                                  |
///   v                                                                  v
///   +--------+--------+--------+--------+--------+--------+-----------+
///   |  used  |  free  |  used  |  free  |        reserved only        |
///   +--------+--------+--------+--------+--------+--------+-----------+
///   <----------- committed ------------>^
///                                       next page to commit
/// ```
///
/// Deallocated pages are not decommitted. They go to a [`MemoryBlockCache`]
/// and are the first thing handed out again. Decommitting and releasing
/// happens once, when the allocator is dropped.
///
/// There is no locking in here, wrap it in a
/// [`crate::SynchronizedBlockAllocator`] to share it between threads.
pub struct VirtualBlockAllocator<V: VirtualMemory = Kernel> {
    memory: V,
    base: NonNull<u8>,
    page_size: usize,
    pages: usize,
    committed: usize,
    free: MemoryBlockCache,
}

// The reservation is exclusively owned by the allocator.
unsafe impl<V: VirtualMemory + Send> Send for VirtualBlockAllocator<V> {}

impl VirtualBlockAllocator {
    /// Reserves `pages` pages of address space.
    pub fn new(pages: usize) -> Result<Self> {
        Self::with_memory(Kernel, pages)
    }
}

impl<V: VirtualMemory> VirtualBlockAllocator<V> {
    /// Same as [`VirtualBlockAllocator::new`] on top of any [`VirtualMemory`].
    pub fn with_memory(memory: V, pages: usize) -> Result<Self> {
        if pages == 0 {
            return Err(Error::ZeroSized { what: "page count" });
        }

        let base = memory.reserve(pages).ok_or_else(|| Error::Reserve {
            pages,
            source: io::Error::last_os_error(),
        })?;
        let page_size = memory.page_size();

        log::debug!(
            "reserved {pages} pages of {page_size} bytes at {:p}",
            base.as_ptr()
        );

        Ok(Self {
            memory,
            base,
            page_size,
            pages,
            committed: 0,
            free: MemoryBlockCache::new(),
        })
    }

    /// Number of pages in the reservation.
    pub fn capacity(&self) -> usize {
        self.pages
    }

    /// Number of pages committed so far, in use or not.
    pub fn committed_pages(&self) -> usize {
        self.committed
    }

    /// Number of committed pages waiting in the free cache.
    pub fn free_pages(&self) -> usize {
        self.free.len()
    }

    pub fn memory(&self) -> &V {
        &self.memory
    }

    fn end(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.pages * self.page_size)
    }
}

impl<V: VirtualMemory> BlockAllocator for VirtualBlockAllocator<V> {
    fn allocate_block(&mut self) -> MemoryBlock {
        let cached = self.free.request_block();
        if !cached.is_null() {
            return cached;
        }

        if self.committed == self.pages {
            return MemoryBlock::NULL;
        }

        // SAFETY: `committed < pages`, so the page is inside the reservation.
        let page = unsafe {
            let next = self.base.add(self.committed * self.page_size);
            self.memory.commit(next, 1)
        };

        match page {
            Some(page) => {
                self.committed += 1;
                MemoryBlock::new(page.as_ptr(), self.page_size)
            }
            None => {
                log::warn!(
                    "failed to commit page {} of {} at {:p}",
                    self.committed,
                    self.pages,
                    self.base.as_ptr()
                );
                MemoryBlock::NULL
            }
        }
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        debug_assert!(self.owns_block(&block), "page {:p} is not ours", block.address);
        debug_assert_eq!(block.size, self.page_size);

        unsafe { self.free.store_block(block) };
    }

    fn block_size(&self) -> usize {
        self.page_size
    }

    fn block_align(&self) -> usize {
        self.page_size
    }

    fn owns_block(&self, block: &MemoryBlock) -> bool {
        let addr = block.address;
        addr >= self.base.as_ptr() && addr < self.end()
    }
}

impl<V: VirtualMemory> Drop for VirtualBlockAllocator<V> {
    fn drop(&mut self) {
        // Cached pages go away with the decommit below.
        drop(self.free.drain());

        if self.committed > 0 {
            unsafe { self.memory.decommit(self.base, self.committed) };
        }
        unsafe { self.memory.release(self.base, self.pages) };

        log::debug!(
            "released {} pages at {:p} ({} committed)",
            self.pages,
            self.base.as_ptr(),
            self.committed
        );
    }
}
