//! Instrumented doubles shared by the unit tests.

use std::{
    alloc::{self, Layout},
    cell::Cell,
    ptr::NonNull,
};

use parking_lot::Mutex;

use crate::{
    block::MemoryBlock,
    block_allocator::{BlockAllocator, HeapBlockAllocator},
    handler::{AllocatorInfo, Diagnostics},
    kernel::{Kernel, VirtualMemory},
};

/// A heap buffer cut into equally sized blocks.
pub struct Storage {
    base: *mut u8,
    layout: Layout,
    block_size: usize,
}

impl Storage {
    pub fn new(blocks: usize, block_size: usize) -> Self {
        let layout = Layout::from_size_align(blocks * block_size, 16).unwrap();
        let base = unsafe { alloc::alloc_zeroed(layout) };
        assert!(!base.is_null());
        Self {
            base,
            layout,
            block_size,
        }
    }

    pub fn block(&self, index: usize) -> MemoryBlock {
        assert!((index + 1) * self.block_size <= self.layout.size());
        MemoryBlock::new(self.base.wrapping_add(index * self.block_size), self.block_size)
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base, self.layout) }
    }
}

/// Heap block source counting how often it is called.
pub struct CountingBlockAllocator {
    heap: HeapBlockAllocator,
    allocations: usize,
    deallocations: usize,
}

impl CountingBlockAllocator {
    pub fn new(block_size: usize) -> Self {
        Self {
            heap: HeapBlockAllocator::new(block_size, 16).unwrap(),
            allocations: 0,
            deallocations: 0,
        }
    }

    pub fn allocations(&self) -> usize {
        self.allocations
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations
    }
}

impl BlockAllocator for CountingBlockAllocator {
    fn allocate_block(&mut self) -> MemoryBlock {
        self.allocations += 1;
        self.heap.allocate_block()
    }

    unsafe fn deallocate_block(&mut self, block: MemoryBlock) {
        self.deallocations += 1;
        unsafe { self.heap.deallocate_block(block) }
    }

    fn block_size(&self) -> usize {
        self.heap.block_size()
    }

    fn block_align(&self) -> usize {
        self.heap.block_align()
    }
}

/// Block source that never has anything to give.
#[derive(Default)]
pub struct FailingBlockAllocator {
    attempts: usize,
}

impl FailingBlockAllocator {
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl BlockAllocator for FailingBlockAllocator {
    fn allocate_block(&mut self) -> MemoryBlock {
        self.attempts += 1;
        MemoryBlock::NULL
    }

    unsafe fn deallocate_block(&mut self, _block: MemoryBlock) {
        panic!("nothing was ever allocated from a failing allocator");
    }

    fn block_size(&self) -> usize {
        64
    }

    fn block_align(&self) -> usize {
        16
    }
}

/// The real OS primitives, with every call counted.
#[derive(Default)]
pub struct CountingMemory {
    pub reserves: Cell<usize>,
    pub commits: Cell<usize>,
    pub decommits: Cell<usize>,
    pub releases: Cell<usize>,
    /// Fail every commit once this many succeeded.
    pub commit_limit: Cell<Option<usize>>,
}

impl VirtualMemory for CountingMemory {
    fn page_size(&self) -> usize {
        Kernel.page_size()
    }

    fn reserve(&self, pages: usize) -> Option<NonNull<u8>> {
        self.reserves.set(self.reserves.get() + 1);
        Kernel.reserve(pages)
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, pages: usize) -> Option<NonNull<u8>> {
        if self.commit_limit.get().is_some_and(|limit| self.commits.get() >= limit) {
            return None;
        }
        self.commits.set(self.commits.get() + 1);
        unsafe { Kernel.commit(ptr, pages) }
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, pages: usize) {
        self.decommits.set(self.decommits.get() + 1);
        unsafe { Kernel.decommit(ptr, pages) }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, pages: usize) {
        self.releases.set(self.releases.get() + 1);
        unsafe { Kernel.release(ptr, pages) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Leak { ptr: usize, size: isize },
    BufferOverflow { ptr: usize, size: usize },
    DoubleFree { ptr: usize, size: usize },
    OutOfMemory { size: usize },
}

/// Diagnostics that remember every report instead of acting on it.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl Diagnostics for Recorder {
    fn leak(&self, _info: &AllocatorInfo, ptr: *const u8, size: isize) {
        self.events.lock().push(Event::Leak {
            ptr: ptr as usize,
            size,
        });
    }

    fn buffer_overflow(&self, _info: &AllocatorInfo, ptr: *const u8, size: usize) {
        self.events.lock().push(Event::BufferOverflow {
            ptr: ptr as usize,
            size,
        });
    }

    fn double_free(&self, _info: &AllocatorInfo, ptr: *const u8, size: usize) {
        self.events.lock().push(Event::DoubleFree {
            ptr: ptr as usize,
            size,
        });
    }

    fn out_of_memory(&self, _info: &AllocatorInfo, size: usize) {
        self.events.lock().push(Event::OutOfMemory { size });
    }
}
