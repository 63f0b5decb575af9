use std::ptr::NonNull;

use parking_lot::lock_api::{Mutex, RawMutex};

use crate::{
    allocator::{ExtendedAllocator, RawAllocator, TruncatingAllocator},
    bounds::{BoundsChecker, DebugBoundsChecker, NullBoundsChecker},
    error::AllocError,
    handler::{AllocatorInfo, Diagnostics, GlobalHandlers},
    lock::NoLock,
    tagger::{DebugTagger, MemoryTagger, NullTagger},
    tracker::{DetailedTracker, MemoryTracker, NullTracker},
    utils::check_align,
};

/// State touched on every call, kept behind the lock.
struct Parts<A, T> {
    allocator: A,
    tracker: T,
}

/// A byte allocator assembled from policies.
///
/// Every request goes through the same steps:
///
/// 1. The lock `L` is taken.
/// 2. The allocator `A` is asked for the caller's size plus both fences of
///    the bounds checker `B`, aligned so that the caller memory right after
///    the front fence gets the alignment that was asked for.
/// 3. The fences are written, the tagger `G` marks the caller memory and the
///    tracker `T` records the allocation. Bytes the allocator skipped in
///    front of the fence for alignment are tagged as padding.
///
/// Deallocation checks both fences, tags the memory as freed and tells the
/// tracker before handing the whole region back to `A`. When the policy
/// allocator is dropped the tracker reports whatever is still outstanding.
///
/// Every policy defaults to its null variant, which takes no room and does
/// nothing, so `PolicyAllocator<A>` costs the same as `A` alone. Requests the
/// allocator can't serve through [`allocate`](Self::allocate) are reported to
/// `D`.
pub struct PolicyAllocator<
    A: ExtendedAllocator,
    G: MemoryTagger = NullTagger,
    T: MemoryTracker = NullTracker,
    B: BoundsChecker = NullBoundsChecker,
    L: RawMutex = NoLock,
    D: Diagnostics = GlobalHandlers,
> {
    name: &'static str,
    parts: Mutex<L, Parts<A, T>>,
    tagger: G,
    bounds: B,
    diagnostics: D,
}

/// A policy allocator with every debugging aid turned on.
pub type DebugAllocator<A, L = NoLock> =
    PolicyAllocator<A, DebugTagger, DetailedTracker, DebugBoundsChecker<16, 16>, L>;

impl<A, G, T, B, L, D> PolicyAllocator<A, G, T, B, L, D>
where
    A: ExtendedAllocator,
    G: MemoryTagger + Default,
    T: MemoryTracker + Default,
    B: BoundsChecker + Default,
    L: RawMutex,
    D: Diagnostics + Default,
{
    pub fn new(allocator: A) -> Self {
        Self::with_name("memcompose::PolicyAllocator", allocator)
    }

    /// `name` shows up in every diagnostic of this allocator.
    pub fn with_name(name: &'static str, allocator: A) -> Self {
        Self::with_parts(name, allocator, G::default(), T::default(), B::default())
    }
}

impl<A, G, T, B, L, D> PolicyAllocator<A, G, T, B, L, D>
where
    A: ExtendedAllocator,
    G: MemoryTagger,
    T: MemoryTracker,
    B: BoundsChecker,
    L: RawMutex,
    D: Diagnostics + Default,
{
    pub fn with_parts(name: &'static str, allocator: A, tagger: G, tracker: T, bounds: B) -> Self {
        Self::with_diagnostics(name, allocator, tagger, tracker, bounds, D::default())
    }
}

impl<A, G, T, B, L, D> PolicyAllocator<A, G, T, B, L, D>
where
    A: ExtendedAllocator,
    G: MemoryTagger,
    T: MemoryTracker,
    B: BoundsChecker,
    L: RawMutex,
    D: Diagnostics,
{
    pub fn with_diagnostics(
        name: &'static str,
        allocator: A,
        tagger: G,
        tracker: T,
        bounds: B,
        diagnostics: D,
    ) -> Self {
        log::debug!(
            "creating {name} with fences of {} and {} bytes",
            B::FRONT_SIZE,
            B::BACK_SIZE
        );

        Self {
            name,
            parts: Mutex::new(Parts { allocator, tracker }),
            tagger,
            bounds,
            diagnostics,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn info(&self) -> AllocatorInfo {
        AllocatorInfo::new(self.name, self)
    }

    /// Total size asked to the allocator for `size` bytes of caller memory.
    fn padded_size(size: usize) -> Option<usize> {
        B::FRONT_SIZE.checked_add(size)?.checked_add(B::BACK_SIZE)
    }

    /// Returns `None` if the underlying allocator can't serve the request.
    ///
    /// # Panics
    ///
    /// If `align` is not a power of two.
    pub fn try_allocate(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        check_align(align);
        let total = Self::padded_size(size)?;

        let mut parts = self.parts.lock();
        let (base, skip) = parts.allocator.try_allocate_padded(total, align, B::FRONT_SIZE)?;
        let base = base.as_ptr();

        // SAFETY: `base` is valid for `total` bytes, which covers both fences
        // and the caller memory in between. The `skip` bytes in front of it
        // belong to the same allocation.
        let ptr = unsafe {
            let ptr = base.add(B::FRONT_SIZE);
            self.tagger.tag_padding(base.sub(skip), skip);
            self.bounds.prepare_front_fence(base);
            self.bounds.prepare_back_fence(ptr.add(size));
            self.tagger.tag_allocation(ptr, size);
            ptr
        };
        parts.tracker.on_allocate(ptr, size, align);

        NonNull::new(ptr)
    }

    /// Like [`try_allocate`](Self::try_allocate), but failures are errors and
    /// running out of memory is reported to the diagnostics first.
    pub fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment { align });
        }

        self.try_allocate(size, align).ok_or_else(|| {
            self.diagnostics.out_of_memory(&self.info(), size);
            AllocError::OutOfMemory { size, align }
        })
    }

    /// # Safety
    ///
    /// `ptr` must come from this allocator with the same `size` and `align`
    /// and must not be used afterwards.
    ///
    /// # Panics
    ///
    /// If the tracker remembers `ptr` with a different size. Nothing around
    /// `ptr` has been read or touched at that point.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        let info = self.info();
        let mut parts = self.parts.lock();

        if let Some(allocated) = parts.tracker.allocated_size(ptr.as_ptr()) {
            assert!(
                allocated == size,
                "[{}] deallocating {ptr:p} with {size} bytes, it was allocated with {allocated}",
                self.name
            );
        }

        let ptr = ptr.as_ptr();
        // SAFETY: the fences around `ptr` were written by `try_allocate`.
        let base = unsafe {
            let base = ptr.sub(B::FRONT_SIZE);
            self.bounds.check_front_fence(&info, base);
            self.bounds.check_back_fence(&info, ptr.add(size));
            self.tagger.tag_deallocation(ptr, size);
            base
        };
        parts.tracker.on_deallocate(&info, ptr, size);

        let Some(total) = Self::padded_size(size) else {
            return;
        };
        unsafe {
            parts.allocator.deallocate_offset(
                NonNull::new_unchecked(base),
                total,
                align,
                B::FRONT_SIZE,
            );
        }
    }

    /// Runs `f` on the underlying allocator with the lock held.
    pub fn with_allocator<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.parts.lock().allocator)
    }

    /// Runs `f` on the tracker with the lock held.
    pub fn with_tracker<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.parts.lock().tracker)
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.parts.get_mut().allocator
    }

    pub fn tracker_mut(&mut self) -> &mut T {
        &mut self.parts.get_mut().tracker
    }

    pub fn tagger(&self) -> &G {
        &self.tagger
    }

    pub fn bounds_checker(&self) -> &B {
        &self.bounds
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }
}

impl<A, G, T, B, L, D> PolicyAllocator<A, G, T, B, L, D>
where
    A: TruncatingAllocator,
    G: MemoryTagger,
    T: MemoryTracker,
    B: BoundsChecker,
    L: RawMutex,
    D: Diagnostics,
{
    /// Releases everything at once.
    ///
    /// # Safety
    ///
    /// No memory from this allocator may be used afterwards.
    pub unsafe fn deallocate_all(&self) {
        let mut parts = self.parts.lock();
        parts.tracker.on_deallocate_all();
        unsafe { parts.allocator.deallocate_all() }
    }
}

impl<A, G, T, B, L, D> RawAllocator for PolicyAllocator<A, G, T, B, L, D>
where
    A: ExtendedAllocator,
    G: MemoryTagger,
    T: MemoryTracker,
    B: BoundsChecker,
    L: RawMutex,
    D: Diagnostics,
{
    fn try_allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        PolicyAllocator::try_allocate(self, size, align)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize, align: usize) {
        unsafe { PolicyAllocator::deallocate(self, ptr, size, align) }
    }
}

impl<A, G, T, B, L, D> Drop for PolicyAllocator<A, G, T, B, L, D>
where
    A: ExtendedAllocator,
    G: MemoryTagger,
    T: MemoryTracker,
    B: BoundsChecker,
    L: RawMutex,
    D: Diagnostics,
{
    fn drop(&mut self) {
        let info = self.info();
        self.parts.get_mut().tracker.finalize(&info);
        log::debug!("dropped {}", self.name);
    }
}
