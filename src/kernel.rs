use std::{ptr::NonNull, sync::OnceLock};

/// This trait provides an abstraction over the virtual memory syscalls. The
/// allocators built on top of it have nothing to do with the concrete APIs
/// offered by each kernel.
///
/// Every count is in pages, and every call succeeds or fails as a whole.
pub trait VirtualMemory {
    /// Returns the virtual memory page size of the computer in bytes.
    fn page_size(&self) -> usize;

    /// Reserves address space for `pages` pages. Nothing is readable or
    /// writable yet and no physical memory is used.
    fn reserve(&self, pages: usize) -> Option<NonNull<u8>>;

    /// Makes `pages` pages starting at `ptr` readable and writable.
    ///
    /// # Safety
    ///
    /// The range must lie inside a reservation returned by [`Self::reserve`].
    unsafe fn commit(&self, ptr: NonNull<u8>, pages: usize) -> Option<NonNull<u8>>;

    /// Gives the physical memory behind `pages` pages back, the address space
    /// stays reserved. This can't fail in a way the caller has to handle.
    ///
    /// # Safety
    ///
    /// The range must have been committed and nothing may use it anymore.
    unsafe fn decommit(&self, ptr: NonNull<u8>, pages: usize);

    /// Returns a whole reservation to the kernel.
    ///
    /// # Safety
    ///
    /// `ptr` and `pages` must be exactly what was passed to and returned by
    /// [`Self::reserve`].
    unsafe fn release(&self, ptr: NonNull<u8>, pages: usize);
}

impl<V: VirtualMemory + ?Sized> VirtualMemory for &V {
    fn page_size(&self) -> usize {
        (**self).page_size()
    }

    fn reserve(&self, pages: usize) -> Option<NonNull<u8>> {
        (**self).reserve(pages)
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, pages: usize) -> Option<NonNull<u8>> {
        unsafe { (**self).commit(ptr, pages) }
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, pages: usize) {
        unsafe { (**self).decommit(ptr, pages) }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, pages: usize) {
        unsafe { (**self).release(ptr, pages) }
    }
}

/// The running kernel's virtual memory.
#[derive(Debug, Default, Clone, Copy)]
pub struct Kernel;

/// Virtual memory page size of the computer. This is usually 4096, but we
/// can only know it at runtime.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Wrapper to query the computer's page size once.
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(os_page_size)
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, VirtualMemory};

    use libc::{c_int, c_void, off_t};

    use std::ptr::{self, NonNull};

    pub(super) fn os_page_size() -> usize {
        unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
    }

    impl VirtualMemory for Kernel {
        fn page_size(&self) -> usize {
            super::page_size()
        }

        fn reserve(&self, pages: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = ptr::null_mut::<c_void>();
            // No access until a page is committed.
            const PROT: c_int = libc::PROT_NONE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            let len = pages.checked_mul(super::page_size())?;

            unsafe {
                let addr = libc::mmap(ADDR, len, PROT, FLAGS, FD, OFFSET);

                if addr == libc::MAP_FAILED {
                    return None;
                }

                NonNull::new(addr.cast::<u8>())
            }
        }

        unsafe fn commit(&self, ptr: NonNull<u8>, pages: usize) -> Option<NonNull<u8>> {
            let len = pages * super::page_size();
            // Read-Write only memory.
            let result = unsafe {
                libc::mprotect(
                    ptr.as_ptr().cast::<c_void>(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            };

            (result == 0).then_some(ptr)
        }

        unsafe fn decommit(&self, ptr: NonNull<u8>, pages: usize) {
            let len = pages * super::page_size();
            unsafe {
                libc::madvise(ptr.as_ptr().cast::<c_void>(), len, libc::MADV_DONTNEED);
                libc::mprotect(ptr.as_ptr().cast::<c_void>(), len, libc::PROT_NONE);
            }
        }

        unsafe fn release(&self, ptr: NonNull<u8>, pages: usize) {
            let len = pages * super::page_size();
            unsafe {
                libc::munmap(ptr.as_ptr().cast::<c_void>(), len);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{ffi::c_void, mem::MaybeUninit, ptr::NonNull};

    use super::{Kernel, VirtualMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    pub(super) fn os_page_size() -> usize {
        unsafe {
            let mut system_info = MaybeUninit::uninit();
            SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

            system_info.assume_init().dwPageSize as usize
        }
    }

    impl VirtualMemory for Kernel {
        fn page_size(&self) -> usize {
            super::page_size()
        }

        fn reserve(&self, pages: usize) -> Option<NonNull<u8>> {
            let len = pages.checked_mul(super::page_size())?;

            unsafe {
                let addr =
                    Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_NOACCESS);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit(&self, ptr: NonNull<u8>, pages: usize) -> Option<NonNull<u8>> {
            let len = pages * super::page_size();
            // Read-Write only.
            unsafe {
                let addr = Memory::VirtualAlloc(
                    Some(ptr.as_ptr().cast::<c_void>().cast_const()),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );

                NonNull::new(addr.cast())
            }
        }

        unsafe fn decommit(&self, ptr: NonNull<u8>, pages: usize) {
            let len = pages * super::page_size();
            unsafe {
                let addr = ptr.as_ptr().cast::<c_void>();
                let _ = Memory::VirtualFree(addr, len, Memory::MEM_DECOMMIT);
            }
        }

        unsafe fn release(&self, ptr: NonNull<u8>, _pages: usize) {
            unsafe {
                let _ = Memory::VirtualFree(ptr.as_ptr().cast::<c_void>(), 0, Memory::MEM_RELEASE);
            }
        }
    }
}

#[cfg(unix)]
use self::unix::os_page_size;
#[cfg(windows)]
use self::windows::os_page_size;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::is_aligned;

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert_eq!(Kernel.page_size(), page_size());
    }

    #[test]
    fn committed_pages_are_writable() {
        let ps = page_size();
        let base = Kernel.reserve(4).unwrap();
        assert!(is_aligned(base.as_ptr() as usize, ps));

        unsafe {
            let second = NonNull::new_unchecked(base.as_ptr().add(ps));
            let page = Kernel.commit(second, 1).unwrap();
            assert_eq!(page, second);

            page.as_ptr().write_bytes(0xAB, ps);
            assert_eq!(*page.as_ptr().add(ps - 1), 0xAB);

            Kernel.decommit(page, 1);
            Kernel.release(base, 4);
        }
    }
}
