use crate::source::{Bump, HeapSource};
use crate::AllocErr;
use core::ptr::{self, NonNull};
use memory_units::Bytes;

/// A [`HeapSource`] backed by one anonymous `mmap` reservation.
///
/// The whole reservation is mapped up front; the kernel only backs pages
/// once they are first touched, so a generous capacity costs address space
/// rather than memory.
#[derive(Debug)]
pub struct MmapSource {
    bump: Bump,
}

impl MmapSource {
    /// Reserve `capacity` bytes of address space.
    pub fn reserve(capacity: usize) -> Result<MmapSource, AllocErr> {
        if capacity == 0 {
            return Err(AllocErr);
        }
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                capacity,
                libc::PROT_WRITE | libc::PROT_READ,
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            heap_trace!(warn, capacity, "mmap reservation failed");
            return Err(AllocErr);
        }
        let base = NonNull::new(addr as *mut u8).ok_or(AllocErr)?;
        Ok(MmapSource {
            bump: Bump::new(base, capacity),
        })
    }

    /// Size of the reservation, in bytes.
    pub fn capacity(&self) -> usize {
        self.bump.capacity()
    }
}

unsafe impl HeapSource for MmapSource {
    fn grow(&mut self, bytes: Bytes) -> Result<NonNull<u8>, AllocErr> {
        self.bump.grow(bytes)
    }

    fn low(&self) -> *mut u8 {
        self.bump.low()
    }

    fn high(&self) -> *mut u8 {
        self.bump.high()
    }
}

impl Drop for MmapSource {
    fn drop(&mut self) {
        let code = unsafe { libc::munmap(self.bump.low() as *mut libc::c_void, self.bump.capacity()) };
        extra_assert_eq!(code, 0, "munmap should run OK");
    }
}
