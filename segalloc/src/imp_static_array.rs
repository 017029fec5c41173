use crate::block::ALIGNMENT;
use crate::source::{Bump, HeapSource};
use crate::AllocErr;
use core::cmp;
use core::marker::PhantomData;
use core::ptr::NonNull;
use memory_units::Bytes;

/// A [`HeapSource`] carved out of a caller-provided byte slice.
///
/// The start of the slice is rounded up to [`ALIGNMENT`], so up to
/// `ALIGNMENT - 1` leading bytes may go unused.
#[derive(Debug)]
pub struct SliceSource<'a> {
    bump: Bump,
    _memory: PhantomData<&'a mut [u8]>,
}

impl<'a> SliceSource<'a> {
    /// Use `memory` as the backing store of a heap.
    pub fn new(memory: &'a mut [u8]) -> SliceSource<'a> {
        let start = memory.as_mut_ptr();
        let skip = cmp::min(start.align_offset(ALIGNMENT), memory.len());
        let capacity = memory.len() - skip;
        // A slice pointer is never null, even when the slice is empty.
        let base = unsafe { NonNull::new_unchecked(start.add(skip)) };
        SliceSource {
            bump: Bump::new(base, capacity),
            _memory: PhantomData,
        }
    }

    /// How many bytes this source can hand out in total.
    pub fn capacity(&self) -> usize {
        self.bump.capacity()
    }
}

unsafe impl<'a> HeapSource for SliceSource<'a> {
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

#[cfg(feature = "static_array_backend")]
mod scratch {
    use super::SliceSource;
    use crate::AllocErr;
    use core::cell::UnsafeCell;
    use core::sync::atomic::{AtomicBool, Ordering};

    const SCRATCH_LEN_BYTES: usize = crate::ARENA_BYTES;

    #[repr(C, align(8))]
    struct Scratch(UnsafeCell<[u8; SCRATCH_LEN_BYTES]>);

    // Only ever handed out once, see `TAKEN`.
    unsafe impl Sync for Scratch {}

    static SCRATCH_HEAP: Scratch = Scratch(UnsafeCell::new([0; SCRATCH_LEN_BYTES]));
    static TAKEN: AtomicBool = AtomicBool::new(false);

    /// Hand out the static scratch array. Only the first call succeeds.
    pub(crate) fn take() -> Result<SliceSource<'static>, AllocErr> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            return Err(AllocErr);
        }
        let memory = unsafe { &mut *SCRATCH_HEAP.0.get() };
        Ok(SliceSource::new(memory))
    }
}

#[cfg(feature = "static_array_backend")]
pub(crate) use self::scratch::take as take_scratch;
