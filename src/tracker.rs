use std::{collections::HashMap, ptr};

use crate::handler::{AllocatorInfo, Diagnostics, GlobalHandlers};

/// Follows allocations as they come and go.
///
/// The tracker sees the memory handed to the caller, fences excluded.
pub trait MemoryTracker {
    fn on_allocate(&mut self, ptr: *const u8, size: usize, align: usize);

    fn on_deallocate(&mut self, info: &AllocatorInfo, ptr: *const u8, size: usize);

    /// Size `ptr` was allocated with, if the tracker remembers it.
    fn allocated_size(&self, _ptr: *const u8) -> Option<usize> {
        None
    }

    /// Everything was released at once.
    fn on_deallocate_all(&mut self);

    /// Called once, when the owning allocator goes away.
    fn finalize(&mut self, info: &AllocatorInfo);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl MemoryTracker for NullTracker {
    #[inline(always)]
    fn on_allocate(&mut self, _ptr: *const u8, _size: usize, _align: usize) {}

    #[inline(always)]
    fn on_deallocate(&mut self, _info: &AllocatorInfo, _ptr: *const u8, _size: usize) {}

    #[inline(always)]
    fn on_deallocate_all(&mut self) {}

    #[inline(always)]
    fn finalize(&mut self, _info: &AllocatorInfo) {}
}

/// Counts outstanding bytes.
///
/// Cheap, but a leak is only reported as a total.
#[derive(Debug, Default)]
pub struct LeakTracker<D: Diagnostics = GlobalHandlers> {
    diagnostics: D,
    outstanding: isize,
}

impl LeakTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: Diagnostics> LeakTracker<D> {
    pub fn with_diagnostics(diagnostics: D) -> Self {
        Self {
            diagnostics,
            outstanding: 0,
        }
    }

    pub fn outstanding(&self) -> isize {
        self.outstanding
    }
}

impl<D: Diagnostics> MemoryTracker for LeakTracker<D> {
    fn on_allocate(&mut self, _ptr: *const u8, size: usize, _align: usize) {
        self.outstanding += size as isize;
    }

    fn on_deallocate(&mut self, info: &AllocatorInfo, ptr: *const u8, size: usize) {
        self.outstanding -= size as isize;
        if self.outstanding < 0 {
            self.diagnostics.double_free(info, ptr, size);
            self.outstanding += size as isize;
        }
    }

    fn on_deallocate_all(&mut self) {
        self.outstanding = 0;
    }

    fn finalize(&mut self, info: &AllocatorInfo) {
        if self.outstanding != 0 {
            self.diagnostics.leak(info, ptr::null(), self.outstanding);
        }
    }
}

/// Remembers every live allocation so leaks can be reported one by one.
#[derive(Debug, Default)]
pub struct DetailedTracker<D: Diagnostics = GlobalHandlers> {
    diagnostics: D,
    allocations: HashMap<usize, usize>,
}

impl DetailedTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: Diagnostics> DetailedTracker<D> {
    pub fn with_diagnostics(diagnostics: D) -> Self {
        Self {
            diagnostics,
            allocations: HashMap::new(),
        }
    }

    /// Number of live allocations.
    pub fn live(&self) -> usize {
        self.allocations.len()
    }

    pub fn outstanding(&self) -> usize {
        self.allocations.values().sum()
    }
}

impl<D: Diagnostics> MemoryTracker for DetailedTracker<D> {
    fn on_allocate(&mut self, ptr: *const u8, size: usize, _align: usize) {
        self.allocations.insert(ptr as usize, size);
    }

    fn on_deallocate(&mut self, info: &AllocatorInfo, ptr: *const u8, size: usize) {
        match self.allocations.remove(&(ptr as usize)) {
            Some(allocated) => assert_eq!(
                allocated, size,
                "[{}] {ptr:p} deallocated with a different size",
                info.name
            ),
            None => self.diagnostics.double_free(info, ptr, size),
        }
    }

    fn allocated_size(&self, ptr: *const u8) -> Option<usize> {
        self.allocations.get(&(ptr as usize)).copied()
    }

    fn on_deallocate_all(&mut self) {
        self.allocations.clear();
    }

    fn finalize(&mut self, info: &AllocatorInfo) {
        let mut leaks: Vec<_> = self.allocations.drain().collect();
        leaks.sort_unstable();
        for (address, size) in leaks {
            self.diagnostics.leak(info, address as *const u8, size as isize);
        }
    }
}

/// Numbers gathered by a [`StatRecordingTracker`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub allocations: usize,
    pub deallocations: usize,
    pub largest_request: usize,
    /// Zero until the first allocation.
    pub smallest_request: usize,
    pub largest_align: usize,
    pub smallest_align: usize,
    pub outstanding: usize,
    pub peak_outstanding: usize,
}

/// Records [`Stats`] on top of another tracker.
#[derive(Debug, Default)]
pub struct StatRecordingTracker<T: MemoryTracker = NullTracker> {
    inner: T,
    stats: Stats,
}

impl<T: MemoryTracker> StatRecordingTracker<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            stats: Stats::default(),
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: MemoryTracker> MemoryTracker for StatRecordingTracker<T> {
    fn on_allocate(&mut self, ptr: *const u8, size: usize, align: usize) {
        let stats = &mut self.stats;
        if stats.allocations == 0 {
            stats.smallest_request = size;
            stats.smallest_align = align;
        } else {
            stats.smallest_request = stats.smallest_request.min(size);
            stats.smallest_align = stats.smallest_align.min(align);
        }
        stats.largest_request = stats.largest_request.max(size);
        stats.largest_align = stats.largest_align.max(align);
        stats.allocations += 1;
        stats.outstanding += size;
        stats.peak_outstanding = stats.peak_outstanding.max(stats.outstanding);

        self.inner.on_allocate(ptr, size, align);
    }

    fn on_deallocate(&mut self, info: &AllocatorInfo, ptr: *const u8, size: usize) {
        self.stats.deallocations += 1;
        self.stats.outstanding = self.stats.outstanding.saturating_sub(size);
        self.inner.on_deallocate(info, ptr, size);
    }

    fn allocated_size(&self, ptr: *const u8) -> Option<usize> {
        self.inner.allocated_size(ptr)
    }

    fn on_deallocate_all(&mut self) {
        self.stats.outstanding = 0;
        self.inner.on_deallocate_all();
    }

    fn finalize(&mut self, info: &AllocatorInfo) {
        self.inner.finalize(info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Event, Recorder};
    use std::sync::Arc;

    fn info() -> AllocatorInfo {
        AllocatorInfo::new("tracker-test", &0u8)
    }

    #[test]
    fn leak_tracker_balances() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = LeakTracker::with_diagnostics(Arc::clone(&recorder));

        tracker.on_allocate(0x1000 as *const u8, 32, 8);
        tracker.on_allocate(0x2000 as *const u8, 16, 8);
        tracker.on_deallocate(&info(), 0x1000 as *const u8, 32);
        assert_eq!(tracker.outstanding(), 16);

        tracker.on_deallocate(&info(), 0x2000 as *const u8, 16);
        tracker.finalize(&info());
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn leak_tracker_reports_total() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = LeakTracker::with_diagnostics(Arc::clone(&recorder));

        tracker.on_allocate(0x1000 as *const u8, 32, 8);
        tracker.on_allocate(0x2000 as *const u8, 16, 8);
        tracker.finalize(&info());

        assert_eq!(recorder.events(), vec![Event::Leak { ptr: 0, size: 48 }]);
    }

    #[test]
    fn leak_tracker_catches_going_negative() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = LeakTracker::with_diagnostics(Arc::clone(&recorder));

        tracker.on_allocate(0x1000 as *const u8, 8, 8);
        tracker.on_deallocate(&info(), 0x1000 as *const u8, 8);
        tracker.on_deallocate(&info(), 0x1000 as *const u8, 8);

        assert_eq!(
            recorder.events(),
            vec![Event::DoubleFree {
                ptr: 0x1000,
                size: 8
            }]
        );
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn detailed_tracker_reports_each_leak() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = DetailedTracker::with_diagnostics(Arc::clone(&recorder));

        tracker.on_allocate(0x3000 as *const u8, 24, 8);
        tracker.on_allocate(0x1000 as *const u8, 8, 8);
        tracker.on_allocate(0x2000 as *const u8, 16, 8);
        tracker.on_deallocate(&info(), 0x2000 as *const u8, 16);
        assert_eq!(tracker.live(), 2);
        assert_eq!(tracker.outstanding(), 32);

        tracker.finalize(&info());
        assert_eq!(
            recorder.events(),
            vec![
                Event::Leak {
                    ptr: 0x1000,
                    size: 8
                },
                Event::Leak {
                    ptr: 0x3000,
                    size: 24
                },
            ]
        );
    }

    #[test]
    fn detailed_tracker_remembers_sizes() {
        let mut tracker = StatRecordingTracker::new(DetailedTracker::new());
        tracker.on_allocate(0x1000 as *const u8, 40, 8);

        assert_eq!(tracker.allocated_size(0x1000 as *const u8), Some(40));
        assert_eq!(tracker.allocated_size(0x2000 as *const u8), None);
        assert_eq!(LeakTracker::new().allocated_size(0x1000 as *const u8), None);

        tracker.on_deallocate(&info(), 0x1000 as *const u8, 40);
        assert_eq!(tracker.allocated_size(0x1000 as *const u8), None);
    }

    #[test]
    #[should_panic(expected = "deallocated with a different size")]
    fn detailed_tracker_panics_on_size_mismatch() {
        let mut tracker = DetailedTracker::new();
        tracker.on_allocate(0x1000 as *const u8, 40, 8);
        tracker.on_deallocate(&info(), 0x1000 as *const u8, 16);
    }

    #[test]
    fn detailed_tracker_rejects_unknown_address() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker = DetailedTracker::with_diagnostics(Arc::clone(&recorder));

        tracker.on_allocate(0x1000 as *const u8, 8, 8);
        tracker.on_deallocate(&info(), 0x1008 as *const u8, 8);

        assert_eq!(
            recorder.events(),
            vec![Event::DoubleFree {
                ptr: 0x1008,
                size: 8
            }]
        );

        tracker.on_deallocate_all();
        tracker.finalize(&info());
        assert_eq!(recorder.events().len(), 1);
    }

    #[test]
    fn stats_follow_requests() {
        let mut tracker = StatRecordingTracker::new(NullTracker);

        tracker.on_allocate(0x1000 as *const u8, 64, 16);
        tracker.on_allocate(0x2000 as *const u8, 8, 4);
        tracker.on_deallocate(&info(), 0x1000 as *const u8, 64);
        tracker.on_allocate(0x3000 as *const u8, 32, 64);

        assert_eq!(
            tracker.stats(),
            Stats {
                allocations: 3,
                deallocations: 1,
                largest_request: 64,
                smallest_request: 8,
                largest_align: 64,
                smallest_align: 4,
                outstanding: 40,
                peak_outstanding: 72,
            }
        );
    }

    #[test]
    fn stats_forward_to_inner_tracker() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker =
            StatRecordingTracker::new(LeakTracker::with_diagnostics(Arc::clone(&recorder)));

        tracker.on_allocate(0x1000 as *const u8, 12, 4);
        assert_eq!(tracker.inner().outstanding(), 12);

        tracker.finalize(&info());
        assert_eq!(recorder.events(), vec![Event::Leak { ptr: 0, size: 12 }]);
    }
}
