//! Stacks a debug allocator on top of a cached page source and prints what
//! each request gets back.

use memcompose::{
    CachedBlockAllocator, DebugAllocator, LinearAllocator, VirtualBlockAllocator, page_size,
};

fn log_alloc(ptr: *mut u8, size: usize, align: usize) {
    println!("Requested {size} bytes aligned to {align}");
    println!("Received this address: {ptr:?}");
}

fn main() -> memcompose::Result<()> {
    println!("Page size is {} bytes", page_size());

    let pages = VirtualBlockAllocator::new(16)?;
    let allocator: DebugAllocator<_> =
        DebugAllocator::new(LinearAllocator::new(CachedBlockAllocator::new(pages)?));

    let requests = [(8, 8), (24, 16), (100, 64)];
    let mut live = Vec::new();

    for (size, align) in requests {
        match allocator.allocate(size, align) {
            Ok(ptr) => {
                log_alloc(ptr.as_ptr(), size, align);
                live.push((ptr, size, align));
            }
            Err(err) => println!("{err}"),
        }
    }

    for (ptr, size, align) in live {
        unsafe { allocator.deallocate(ptr, size, align) };
    }

    allocator.with_tracker(|tracker| println!("{} allocations still live", tracker.live()));
    Ok(())
}
