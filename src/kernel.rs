use std::{ops::Range, ptr::NonNull, slice, sync::OnceLock};

use tracing::{debug, warn};

use crate::{
    error::{PoolError, Result},
    utils::align,
};

/// Virtual memory page size of the computer. This is usually 4096, but we
/// only know for sure at runtime.
static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

/// Platform dependent half of arena management. Pools don't care which
/// syscall gives them their bytes, only that they get a private, writable,
/// zero-filled mapping.
struct Kernel;

/// This trait provides an abstraction to handle low level memory operations
/// and syscalls. As the pool manager, our top level view of this has nothing
/// to do with the concrete implementations / APIs offered by each kernel.
trait PlatformMemory {
    /// Request a memory region of size `len`. It returns a Pointer to the
    /// given location or None if the underlying syscall fails.
    unsafe fn request_memory(len: usize) -> Option<NonNull<u8>>;

    /// Returns the memory of size `len` starting from `addr` back to the kernel.
    unsafe fn return_memory(addr: *mut u8, len: usize);

    /// Returns the virtual memory page size of the computer in bytes.
    unsafe fn page_size() -> usize;
}

/// Wrapper to calculate the computer's page size once.
#[inline]
pub(crate) fn page_size() -> usize {
    *PAGE_SIZE.get_or_init(|| unsafe { Kernel::page_size() })
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
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // mmap parameters.
            const ADDR: *mut c_void = std::ptr::null_mut::<c_void>();
            // Read-Write only memory.
            const PROT: c_int = libc::PROT_READ | libc::PROT_WRITE;
            const FLAGS: c_int = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
            const FD: c_int = -1;
            const OFFSET: off_t = 0;

            unsafe {
                let addr = mmap(ADDR, len as size_t, PROT, FLAGS, FD, OFFSET);

                if addr == libc::MAP_FAILED {
                    None
                } else {
                    NonNull::new(addr.cast::<u8>())
                }
            }
        }

        unsafe fn return_memory(addr: *mut u8, len: usize) {
            unsafe {
                munmap(addr.cast::<c_void>(), len as size_t);
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
        unsafe fn request_memory(len: usize) -> Option<NonNull<u8>> {
            // Read-Write only.
            let protection = Memory::PAGE_READWRITE;

            let flags = Memory::MEM_RESERVE | Memory::MEM_COMMIT;

            unsafe {
                let addr = Memory::VirtualAlloc(None, len, flags, protection);

                NonNull::new(addr.cast())
            }
        }

        unsafe fn return_memory(addr: *mut u8, _len: usize) {
            unsafe {
                let _ = Memory::VirtualFree(addr.cast::<c_void>(), 0, Memory::MEM_RELEASE);
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

/// The byte buffer backing one pool.
///
/// The mapping is rounded up to whole pages, but only the first `len` bytes
/// are ever handed out. The memory is zero-filled by the kernel and given
/// back when the arena is dropped.
pub(crate) struct Arena {
    addr: NonNull<u8>,
    len: usize,
    mapped: usize,
}

// SAFETY: the arena exclusively owns its mapping, nothing else points into it.
unsafe impl Send for Arena {}

impl Arena {
    pub fn reserve(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(PoolError::ZeroSize);
        }

        if len > usize::MAX - page_size() {
            return Err(PoolError::ResourceExhausted { what: "arena" });
        }
        let mapped = align(len, page_size());

        let Some(addr) = (unsafe { Kernel::request_memory(mapped) }) else {
            warn!(len, mapped, "arena mapping failed");
            return Err(PoolError::ResourceExhausted { what: "arena" });
        };

        debug!(len, mapped, "mapped arena");
        Ok(Self { addr, len, mapped })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Bytes in `range`, which must lie inside the arena.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        assert!(range.start <= range.end && range.end <= self.len);
        // SAFETY: the range is inside the mapping, which lives as long as
        // `self` and is only reachable through it.
        unsafe { slice::from_raw_parts(self.addr.as_ptr().add(range.start), range.len()) }
    }

    /// Bytes in `range`, which must lie inside the arena.
    pub fn slice_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        assert!(range.start <= range.end && range.end <= self.len);
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.addr.as_ptr().add(range.start), range.len()) }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        unsafe { Kernel::return_memory(self.addr.as_ptr(), self.mapped) };
        debug!(len = self.len, "unmapped arena");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_a_power_of_two() {
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn arena_is_zeroed_and_writable() {
        let mut arena = Arena::reserve(1000).unwrap();
        assert_eq!(arena.len(), 1000);
        assert!(arena.slice(0..1000).iter().all(|byte| *byte == 0));

        arena.slice_mut(10..20).fill(0xAB);
        assert_eq!(arena.slice(9..11), [0, 0xAB]);
        assert_eq!(arena.slice(19..21), [0xAB, 0]);
    }

    #[test]
    fn empty_arena_is_rejected() {
        assert!(matches!(Arena::reserve(0), Err(PoolError::ZeroSize)));
    }

    #[test]
    #[should_panic]
    fn slicing_past_the_end_panics() {
        let arena = Arena::reserve(16).unwrap();
        let _ = arena.slice(8..17);
    }
}
