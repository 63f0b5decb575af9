use crate::{
    debug::{DebugMagic, fill, first_mismatch, last_mismatch},
    handler::{AllocatorInfo, Diagnostics, GlobalHandlers},
};

/// Guards the bytes around an allocation.
///
/// An allocation wrapped by a bounds checker is laid out as
///
/// ```text
///   +-------------+--------------------+------------+
///   | front fence |   caller memory    | back fence |
///   +-------------+--------------------+------------+
///   <-FRONT_SIZE->                     <-BACK_SIZE-->
/// ```
///
/// Fences are written on allocation and checked on deallocation.
pub trait BoundsChecker {
    const FRONT_SIZE: usize;
    const BACK_SIZE: usize;

    /// # Safety
    ///
    /// `fence` must be valid for writes of `FRONT_SIZE` bytes.
    unsafe fn prepare_front_fence(&self, fence: *mut u8);

    /// # Safety
    ///
    /// `fence` must be valid for writes of `BACK_SIZE` bytes.
    unsafe fn prepare_back_fence(&self, fence: *mut u8);

    /// # Safety
    ///
    /// `fence` must be valid for reads of `FRONT_SIZE` bytes.
    unsafe fn check_front_fence(&self, info: &AllocatorInfo, fence: *const u8);

    /// # Safety
    ///
    /// `fence` must be valid for reads of `BACK_SIZE` bytes.
    unsafe fn check_back_fence(&self, info: &AllocatorInfo, fence: *const u8);
}

/// No fences at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBoundsChecker;

impl BoundsChecker for NullBoundsChecker {
    const FRONT_SIZE: usize = 0;
    const BACK_SIZE: usize = 0;

    #[inline(always)]
    unsafe fn prepare_front_fence(&self, _fence: *mut u8) {}

    #[inline(always)]
    unsafe fn prepare_back_fence(&self, _fence: *mut u8) {}

    #[inline(always)]
    unsafe fn check_front_fence(&self, _info: &AllocatorInfo, _fence: *const u8) {}

    #[inline(always)]
    unsafe fn check_back_fence(&self, _info: &AllocatorInfo, _fence: *const u8) {}
}

/// Fills fences with [`DebugMagic::FenceStart`] and [`DebugMagic::FenceEnd`].
///
/// A damaged fence is reported once, with the corrupted byte closest to the
/// start of the fence and the number of bytes the caller wrote past its
/// memory. The front fence is damaged from its end, so for it that's the
/// distance from the first bad byte to the caller memory.
#[derive(Debug, Clone, Copy)]
pub struct DebugBoundsChecker<
    const FRONT: usize = 16,
    const BACK: usize = 16,
    D: Diagnostics = GlobalHandlers,
> {
    diagnostics: D,
}

impl<const FRONT: usize, const BACK: usize> DebugBoundsChecker<FRONT, BACK> {
    pub fn new() -> Self {
        Self::with_diagnostics(GlobalHandlers)
    }
}

impl<const FRONT: usize, const BACK: usize, D: Diagnostics> DebugBoundsChecker<FRONT, BACK, D> {
    pub fn with_diagnostics(diagnostics: D) -> Self {
        const { assert!(FRONT >= 1 && BACK >= 1, "fences must not be empty") };
        Self { diagnostics }
    }
}

impl<const FRONT: usize, const BACK: usize, D: Diagnostics + Default> Default
    for DebugBoundsChecker<FRONT, BACK, D>
{
    fn default() -> Self {
        Self::with_diagnostics(D::default())
    }
}

impl<const FRONT: usize, const BACK: usize, D: Diagnostics> BoundsChecker
    for DebugBoundsChecker<FRONT, BACK, D>
{
    const FRONT_SIZE: usize = FRONT;
    const BACK_SIZE: usize = BACK;

    unsafe fn prepare_front_fence(&self, fence: *mut u8) {
        unsafe { fill(fence, FRONT, DebugMagic::FenceStart) }
    }

    unsafe fn prepare_back_fence(&self, fence: *mut u8) {
        unsafe { fill(fence, BACK, DebugMagic::FenceEnd) }
    }

    unsafe fn check_front_fence(&self, info: &AllocatorInfo, fence: *const u8) {
        if let Some(first) = unsafe { first_mismatch(fence, FRONT, DebugMagic::FenceStart) } {
            self.diagnostics.buffer_overflow(info, fence.wrapping_add(first), FRONT - first);
        }
    }

    unsafe fn check_back_fence(&self, info: &AllocatorInfo, fence: *const u8) {
        if let Some(first) = unsafe { first_mismatch(fence, BACK, DebugMagic::FenceEnd) } {
            // `first` found a bad byte, so there's a last one too.
            let last = unsafe { last_mismatch(fence, BACK, DebugMagic::FenceEnd) }.unwrap_or(first);
            self.diagnostics.buffer_overflow(info, fence.wrapping_add(first), last + 1);
        }
    }
}
