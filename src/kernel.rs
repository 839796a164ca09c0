use std::{ptr::NonNull, slice, sync::OnceLock};

use log::debug;

use crate::{
    error::{HeapError, HeapResult},
    source::{DEFAULT_MAX_HEAP, MemorySource},
    utils::align,
};

/// Virtual memory page size of the computer. This is usually 4096.
/// We can't know it at compile time so it is queried once and cached.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Wrapper to calculate the computer's page size.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { Kernel::page_size() })
}

/// Zero-sized handle the platform-specific memory calls hang off.
struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. The memory source itself has nothing to do with the concrete
/// APIs offered by each kernel.
trait PlatformMemory {
    /// Reserves `len` bytes of address space. It returns a pointer to the
    /// start of the reservation or None if the underlying syscall fails.
    unsafe fn reserve_memory(len: usize) -> Option<NonNull<u8>>;

    /// Makes `[addr, addr + len)` of a reservation readable and writable.
    unsafe fn commit_memory(addr: NonNull<u8>, len: usize) -> bool;

    /// Returns a reservation of size `len` starting from `addr` back to the kernel.
    unsafe fn release_memory(addr: NonNull<u8>, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

#[cfg(unix)]
mod unix {
    use super::{Kernel, PlatformMemory};

    use libc::{mmap, munmap, off_t, size_t};

    use std::{
        os::raw::{c_int, c_void},
        ptr::NonNull,
    };

    impl PlatformMemory for Kernel {
        unsafe fn reserve_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                match addr {
                    libc::MAP_FAILED => None,
                    addr => NonNull::new(addr.cast::<u8>()),
                }
            }
        }

        // Anonymous private mappings are already backed on first touch.
        unsafe fn commit_memory(_addr: NonNull<u8>, _len: usize) -> bool {
            true
        }

        unsafe fn release_memory(addr: NonNull<u8>, len: usize) {
            unsafe {
                munmap(addr.as_ptr() as *mut c_void, len as size_t);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe { libc::sysconf(libc::_SC_PAGE_SIZE) as usize }
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use super::{Kernel, PlatformMemory};

    use windows::Win32::System::{Memory, SystemInformation};

    impl PlatformMemory for Kernel {
        unsafe fn reserve_memory(len: usize) -> Option<NonNull<u8>> {
            unsafe {
                let addr = Memory::VirtualAlloc(None, len, Memory::MEM_RESERVE, Memory::PAGE_READWRITE);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn commit_memory(addr: NonNull<u8>, len: usize) -> bool {
            unsafe {
                let committed = Memory::VirtualAlloc(
                    Some(addr.as_ptr() as *const c_void),
                    len,
                    Memory::MEM_COMMIT,
                    Memory::PAGE_READWRITE,
                );

                !committed.is_null()
            }
        }

        unsafe fn release_memory(addr: NonNull<u8>, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.as_ptr() as *mut c_void, 0, Memory::MEM_RELEASE);
            }
        }

        unsafe fn page_size() -> usize {
            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());

                system_info.assume_init().dwPageSize as usize
            }
        }
    }
}

/// A memory source that behaves like `sbrk` over one operating system reservation.
///
/// The whole limit is reserved up front so the region never moves; growing
/// only moves the break (committing pages on platforms that need it).
///
/// ```text
///  base                      brk              committed         base + reserved
///   +-------------------------+-------------------+-------------------+
///   |        heap bytes       |  committed, idle  |    reserved only  |
///   +-------------------------+-------------------+-------------------+
/// ```
pub struct MmapSource {
    base: NonNull<u8>,
    reserved: usize,
    committed: usize,
    brk: usize,
}

// The reservation is owned exclusively by this value.
unsafe impl Send for MmapSource {}

impl MmapSource {
    /// Reserves [`DEFAULT_MAX_HEAP`] bytes.
    pub fn new() -> HeapResult<Self> {
        Self::with_limit(DEFAULT_MAX_HEAP)
    }

    /// Reserves `limit` bytes, rounded up to the page size.
    pub fn with_limit(limit: usize) -> HeapResult<Self> {
        let reserved = align(limit.max(1), page_size());

        let base = unsafe { Kernel::reserve_memory(reserved) }.ok_or(HeapError::OutOfMemory {
            requested: reserved,
            heap_size: 0,
        })?;

        debug!("reserved {reserved} bytes of address space at {:p}", base);

        Ok(Self {
            base,
            reserved,
            committed: 0,
            brk: 0,
        })
    }

    /// Bytes of address space held by this source.
    pub fn reserved(&self) -> usize {
        self.reserved
    }
}

impl MemorySource for MmapSource {
    fn grow(&mut self, increment: usize) -> Option<usize> {
        let old_brk = self.brk;
        let new_brk = old_brk.checked_add(increment)?;

        if new_brk > self.reserved {
            return None;
        }

        if new_brk > self.committed {
            let target = align(new_brk, page_size()).min(self.reserved);
            let start = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.committed)) };

            if !unsafe { Kernel::commit_memory(start, target - self.committed) } {
                return None;
            }

            self.committed = target;
        }

        self.brk = new_brk;
        Some(old_brk)
    }

    fn len(&self) -> usize {
        self.brk
    }

    fn bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.brk) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.brk) }
    }

    fn reset(&mut self) {
        self.brk = 0;
    }
}

impl Drop for MmapSource {
    fn drop(&mut self) {
        unsafe { Kernel::release_memory(self.base, self.reserved) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        assert!(page_size().is_power_of_two());
        assert_eq!(page_size(), page_size());
    }

    #[test]
    fn behaves_like_sbrk() {
        let mut source = MmapSource::with_limit(1 << 16).unwrap();

        assert_eq!(source.grow(100), Some(0));
        assert_eq!(source.grow(28), Some(100));
        assert_eq!(source.len(), 128);

        source.bytes_mut()[127] = 0xAB;
        assert_eq!(source.bytes()[127], 0xAB);
    }

    #[test]
    fn refuses_to_grow_past_reservation() {
        let mut source = MmapSource::with_limit(page_size()).unwrap();
        let reserved = source.reserved();

        assert_eq!(source.grow(reserved), Some(0));
        assert_eq!(source.grow(1), None);
        assert_eq!(source.len(), reserved);
    }

    #[test]
    fn reset_moves_break_to_start() {
        let mut source = MmapSource::with_limit(1 << 16).unwrap();

        source.grow(4096).unwrap();
        source.reset();

        assert!(source.is_empty());
        assert_eq!(source.grow(8), Some(0));
    }
}
