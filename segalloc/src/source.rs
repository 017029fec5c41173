use crate::block::ALIGNMENT;
use crate::AllocErr;
use core::ptr::NonNull;
use memory_units::Bytes;

/// A contiguous, append-only region of memory that a [`Heap`](crate::Heap)
/// grows into.
///
/// # Safety
///
/// Implementations must uphold all of the following:
///
/// * `low()` never changes and is aligned to [`ALIGNMENT`].
///
/// * `high()` is one past the last byte handed out so far, and everything in
///   `low()..high()` is readable and writable memory exclusively owned by the
///   source's user.
///
/// * A successful `grow(n)` returns the previous `high()` and advances
///   `high()` by exactly `n` bytes. A failed `grow` changes nothing.
pub unsafe trait HeapSource {
    /// Extend the region by `bytes`, returning the start of the new memory.
    fn grow(&mut self, bytes: Bytes) -> Result<NonNull<u8>, AllocErr>;

    /// The start of the region.
    fn low(&self) -> *mut u8;

    /// One past the end of the region grown so far.
    fn high(&self) -> *mut u8;
}

/// The bookkeeping shared by every bounded, pre-reserved source: a base
/// address, a break offset and a capacity.
#[derive(Debug)]
pub(crate) struct Bump {
    base: NonNull<u8>,
    brk: usize,
    capacity: usize,
}

impl Bump {
    pub(crate) fn new(base: NonNull<u8>, capacity: usize) -> Bump {
        extra_assert_eq!(base.as_ptr() as usize % ALIGNMENT, 0);
        Bump {
            base,
            brk: 0,
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Advance the break by `bytes`, first giving `commit` the chance to make
    /// the new range usable.
    pub(crate) fn grow_with<F>(&mut self, bytes: Bytes, commit: F) -> Result<NonNull<u8>, AllocErr>
    where
        F: FnOnce(NonNull<u8>, usize) -> Result<(), AllocErr>,
    {
        let end = self.brk.checked_add(bytes.0).ok_or(AllocErr)?;
        if end > self.capacity {
            heap_trace!(warn, requested = bytes.0, capacity = self.capacity, "heap source exhausted");
            return Err(AllocErr);
        }

        let start = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(self.brk)) };
        commit(start, bytes.0)?;
        self.brk = end;
        Ok(start)
    }

    pub(crate) fn grow(&mut self, bytes: Bytes) -> Result<NonNull<u8>, AllocErr> {
        self.grow_with(bytes, |_, _| Ok(()))
    }

    pub(crate) fn low(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub(crate) fn high(&self) -> *mut u8 {
        self.base.as_ptr().wrapping_add(self.brk)
    }
}
