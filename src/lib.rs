//! Composable memory allocators.
//!
//! Allocators here are small pieces meant to be stacked. At the bottom there
//! are block sources handing out fixed size [`MemoryBlock`]s: pages of a
//! virtual memory reservation ([`VirtualBlockAllocator`]) or chunks of the
//! global heap ([`HeapBlockAllocator`]). Adapters add behavior on top of any
//! block source:
//!
//! - [`CachedBlockAllocator`] keeps freed blocks around for reuse.
//! - [`FallbackBlockAllocator`] tries a chain of sources in order.
//! - [`SynchronizedBlockAllocator`] puts a lock around a source.
//! - [`DebugBlockAllocator`] stamps blocks and counts what's outstanding.
//!
//! Byte allocators ([`HeapAllocator`], [`LinearAllocator`]) serve arbitrary
//! sizes, and [`PolicyAllocator`] wraps one of them with tagging, tracking,
//! bounds checking and locking policies chosen at compile time. Every policy
//! has a null variant that compiles away to nothing.
//!
//! ```no_run
//! use memcompose::{
//!     CachedBlockAllocator, DebugAllocator, LinearAllocator, VirtualBlockAllocator,
//! };
//!
//! let pages = VirtualBlockAllocator::new(256)?;
//! let allocator: DebugAllocator<_> =
//!     DebugAllocator::new(LinearAllocator::new(CachedBlockAllocator::new(pages)?));
//!
//! let ptr = allocator.try_allocate(64, 8).expect("out of pages");
//! unsafe { allocator.deallocate(ptr, 64, 8) };
//! # Ok::<(), memcompose::Error>(())
//! ```
//!
//! Leaks, buffer overflows, double frees and exhausted memory are reported
//! through [`Diagnostics`]; see the [`handler`] module.

mod allocator;
mod block;
mod block_allocator;
mod bounds;
mod cache;
mod cached;
mod debug;
mod error;
mod fallback;
pub mod handler;
mod kernel;
mod lock;
mod policy;
mod synchronized;
mod tagger;
mod tracker;
mod utils;
mod virtual_block;

#[cfg(test)]
mod testing;

pub use allocator::{
    ExtendedAllocator, HeapAllocator, LinearAllocator, Owns, RawAllocator, TruncatingAllocator,
};
pub use block::MemoryBlock;
pub use block_allocator::{AnyBlockAllocator, BlockAllocator, HeapBlockAllocator};
pub use bounds::{BoundsChecker, DebugBoundsChecker, NullBoundsChecker};
pub use cache::{MIN_CACHED_BLOCK_SIZE, MemoryBlockCache};
pub use cached::CachedBlockAllocator;
pub use debug::{DebugBlockAllocator, DebugMagic};
pub use error::{AllocError, Error, Result};
pub use fallback::{FallbackAllocator, FallbackBlockAllocator};
pub use handler::{AllocatorInfo, Diagnostics, GlobalHandlers};
pub use kernel::{Kernel, VirtualMemory, page_size};
pub use lock::{DefaultMutex, NoLock};
pub use policy::{DebugAllocator, PolicyAllocator};
pub use synchronized::SynchronizedBlockAllocator;
pub use tagger::{DebugTagger, MemoryTagger, NullTagger};
pub use tracker::{
    DetailedTracker, LeakTracker, MemoryTracker, NullTracker, StatRecordingTracker, Stats,
};
pub use utils::{align, align_offset, is_aligned};
pub use virtual_block::VirtualBlockAllocator;
