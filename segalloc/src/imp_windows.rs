use crate::source::{Bump, HeapSource};
use crate::AllocErr;
use core::ptr::{self, NonNull};
use memory_units::Bytes;

use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
use winapi::um::winnt::{MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS, PAGE_READWRITE};

/// A [`HeapSource`] that reserves its address range with `VirtualAlloc` and
/// commits pages as the heap grows into them.
#[derive(Debug)]
pub struct VirtualSource {
    bump: Bump,
}

impl VirtualSource {
    /// Reserve `capacity` bytes of address space.
    pub fn reserve(capacity: usize) -> Result<VirtualSource, AllocErr> {
        if capacity == 0 {
            return Err(AllocErr);
        }
        let addr = unsafe { VirtualAlloc(ptr::null_mut(), capacity, MEM_RESERVE, PAGE_NOACCESS) };
        let base = NonNull::new(addr as *mut u8).ok_or(AllocErr)?;
        Ok(VirtualSource {
            bump: Bump::new(base, capacity),
        })
    }

    /// Size of the reservation, in bytes.
    pub fn capacity(&self) -> usize {
        self.bump.capacity()
    }
}

unsafe impl HeapSource for VirtualSource {
    fn grow(&mut self, bytes: Bytes) -> Result<NonNull<u8>, AllocErr> {
        self.bump.grow_with(bytes, |start, len| {
            // Committing an already committed page is a no-op, so the page
            // shared with the previous break needs no special casing.
            let committed = unsafe { VirtualAlloc(start.as_ptr() as _, len, MEM_COMMIT, PAGE_READWRITE) };
            if committed.is_null() {
                heap_trace!(warn, len, "VirtualAlloc commit failed");
                Err(AllocErr)
            } else {
                Ok(())
            }
        })
    }

    fn low(&self) -> *mut u8 {
        self.bump.low()
    }

    fn high(&self) -> *mut u8 {
        self.bump.high()
    }
}

impl Drop for VirtualSource {
    fn drop(&mut self) {
        let code = unsafe { VirtualFree(self.bump.low() as _, 0, MEM_RELEASE) };
        extra_assert!(code != 0, "VirtualFree should return nonzero");
    }
}
