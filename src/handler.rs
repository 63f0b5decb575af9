//! Reporting of leaks, buffer overflows, double frees and exhausted memory.
//!
//! There are two layers. The process wide registry holds one replaceable
//! function per category; installing a handler returns the previous one so it
//! can be restored. On top of it, [`Diagnostics`] is the channel trackers and
//! bounds checkers actually report through. It is a type parameter of those
//! policies, so a test (or a service that wants telemetry) can hand its own
//! implementation to a single allocator without touching global state.
//! [`GlobalHandlers`] forwards to the registry and is the default everywhere.

use std::{
    mem,
    ptr,
    sync::{
        Arc,
        atomic::{AtomicPtr, Ordering},
    },
};

/// Identifies the allocator a diagnostic is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorInfo {
    pub name: &'static str,
    /// Address of the allocator instance at the time of the report.
    pub address: usize,
}

impl AllocatorInfo {
    pub fn new<T: ?Sized>(name: &'static str, allocator: &T) -> Self {
        Self {
            name,
            address: ptr::from_ref(allocator).cast::<()>() as usize,
        }
    }
}

/// Called with the leaked address (null for cumulative reports) and the
/// number of leaked bytes.
pub type LeakHandler = fn(&AllocatorInfo, *const u8, isize);
/// Called with the first corrupted byte and the size of the stomp.
pub type BufferOverflowHandler = fn(&AllocatorInfo, *const u8, usize);
/// Called with the address that was freed without being allocated and its size.
pub type DoubleFreeHandler = fn(&AllocatorInfo, *const u8, usize);
/// Called with the size of the request that couldn't be served.
pub type OutOfMemoryHandler = fn(&AllocatorInfo, usize);

fn default_leak_handler(info: &AllocatorInfo, ptr: *const u8, size: isize) {
    if ptr.is_null() {
        log::error!("[{}@{:#x}] leaked {size} bytes", info.name, info.address);
    } else {
        log::error!("[{}@{:#x}] leaked {size} bytes at {ptr:p}", info.name, info.address);
    }
}

fn default_buffer_overflow_handler(info: &AllocatorInfo, ptr: *const u8, size: usize) {
    log::error!(
        "[{}@{:#x}] buffer overflow of {size} bytes detected at {ptr:p}",
        info.name,
        info.address
    );
    std::process::abort();
}

fn default_double_free_handler(info: &AllocatorInfo, ptr: *const u8, size: usize) {
    log::error!(
        "[{}@{:#x}] deallocation of {size} bytes at {ptr:p} that is not allocated",
        info.name,
        info.address
    );
    std::process::abort();
}

fn default_out_of_memory_handler(info: &AllocatorInfo, size: usize) {
    log::error!(
        "[{}@{:#x}] out of memory while allocating {size} bytes",
        info.name,
        info.address
    );
}

/// One registry slot. A null pointer stands for the default handler.
macro_rules! handler_slot {
    ($(#[$note:meta])* $slot:ident, $ty:ty, $default:ident, $set:ident, $get:ident) => {
        static $slot: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

        #[doc = concat!("Installs a new `", stringify!($ty), "`, `None` restores the default.")]
        ///
        /// Returns the handler that was installed before.
        $(#[$note])*
        pub fn $set(handler: Option<$ty>) -> $ty {
            let new = handler.map_or(ptr::null_mut(), |h| h as *mut ());
            let old = $slot.swap(new, Ordering::AcqRel);
            from_slot(old, $default as $ty)
        }

        #[doc = concat!("Returns the installed `", stringify!($ty), "`.")]
        pub fn $get() -> $ty {
            from_slot($slot.load(Ordering::Acquire), $default as $ty)
        }
    };
}

fn from_slot<F: Copy>(raw: *mut (), default: F) -> F {
    if raw.is_null() {
        default
    } else {
        debug_assert_eq!(mem::size_of::<F>(), mem::size_of::<*mut ()>());
        // SAFETY: non-null values were stored from a handler of type `F` by
        // the matching `set_*` function.
        unsafe { mem::transmute_copy(&raw) }
    }
}

handler_slot!(
    ///
    /// The default handler logs the leak and returns. It does not abort, and
    /// neither does the default out of memory handler.
    LEAK,
    LeakHandler,
    default_leak_handler,
    set_leak_handler,
    get_leak_handler
);
handler_slot!(
    BUFFER_OVERFLOW,
    BufferOverflowHandler,
    default_buffer_overflow_handler,
    set_buffer_overflow_handler,
    get_buffer_overflow_handler
);
handler_slot!(
    DOUBLE_FREE,
    DoubleFreeHandler,
    default_double_free_handler,
    set_double_free_handler,
    get_double_free_handler
);
handler_slot!(
    ///
    /// The default handler logs the failed request and returns, the caller
    /// then sees the allocation fail.
    OUT_OF_MEMORY,
    OutOfMemoryHandler,
    default_out_of_memory_handler,
    set_out_of_memory_handler,
    get_out_of_memory_handler
);

/// Where policies report what they detect.
///
/// Every method defaults to the matching handler of the process wide registry.
pub trait Diagnostics {
    fn leak(&self, info: &AllocatorInfo, ptr: *const u8, size: isize) {
        get_leak_handler()(info, ptr, size);
    }

    fn buffer_overflow(&self, info: &AllocatorInfo, ptr: *const u8, size: usize) {
        get_buffer_overflow_handler()(info, ptr, size);
    }

    fn double_free(&self, info: &AllocatorInfo, ptr: *const u8, size: usize) {
        get_double_free_handler()(info, ptr, size);
    }

    fn out_of_memory(&self, info: &AllocatorInfo, size: usize) {
        get_out_of_memory_handler()(info, size);
    }
}

/// Reports through the process wide registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalHandlers;

impl Diagnostics for GlobalHandlers {}

impl<D: Diagnostics + ?Sized> Diagnostics for &D {
    fn leak(&self, info: &AllocatorInfo, ptr: *const u8, size: isize) {
        (**self).leak(info, ptr, size);
    }

    fn buffer_overflow(&self, info: &AllocatorInfo, ptr: *const u8, size: usize) {
        (**self).buffer_overflow(info, ptr, size);
    }

    fn double_free(&self, info: &AllocatorInfo, ptr: *const u8, size: usize) {
        (**self).double_free(info, ptr, size);
    }

    fn out_of_memory(&self, info: &AllocatorInfo, size: usize) {
        (**self).out_of_memory(info, size);
    }
}

impl<D: Diagnostics + ?Sized> Diagnostics for Arc<D> {
    fn leak(&self, info: &AllocatorInfo, ptr: *const u8, size: isize) {
        (**self).leak(info, ptr, size);
    }

    fn buffer_overflow(&self, info: &AllocatorInfo, ptr: *const u8, size: usize) {
        (**self).buffer_overflow(info, ptr, size);
    }

    fn double_free(&self, info: &AllocatorInfo, ptr: *const u8, size: usize) {
        (**self).double_free(info, ptr, size);
    }

    fn out_of_memory(&self, info: &AllocatorInfo, size: usize) {
        (**self).out_of_memory(info, size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    static OOM_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting_oom(_: &AllocatorInfo, size: usize) {
        OOM_CALLS.fetch_add(size, Ordering::SeqCst);
    }

    // The out of memory slot is only touched by this test, the others are
    // left alone so parallel tests never see a foreign handler.
    #[test]
    fn install_returns_previous_handler() {
        let info = AllocatorInfo::new("test", &0u8);

        set_out_of_memory_handler(Some(counting_oom));
        GlobalHandlers.out_of_memory(&info, 42);
        assert_eq!(OOM_CALLS.load(Ordering::SeqCst), 42);

        // Restoring the default hands back the counting handler.
        let replaced = set_out_of_memory_handler(None);
        replaced(&info, 8);
        assert_eq!(OOM_CALLS.load(Ordering::SeqCst), 50);

        GlobalHandlers.out_of_memory(&info, 100);
        assert_eq!(OOM_CALLS.load(Ordering::SeqCst), 50);
    }

    // Only the defaults are called, the registry is left alone.
    #[test]
    fn default_leak_and_out_of_memory_handlers_return() {
        let info = AllocatorInfo::new("test", &0u8);
        default_leak_handler(&info, ptr::null(), 16);
        default_leak_handler(&info, 0x1000 as *const u8, 16);
        default_out_of_memory_handler(&info, 64);
    }
}
