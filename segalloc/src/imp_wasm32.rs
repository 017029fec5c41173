use crate::source::HeapSource;
use crate::AllocErr;
use core::arch::wasm32;
use core::ptr::NonNull;
use memory_units::{Bytes, Pages, RoundUpTo};

/// A [`HeapSource`] that grows the module's linear memory.
///
/// The heap starts at the end of linear memory as it was when the source was
/// created. Nothing else may grow memory afterwards; if something does, the
/// next `grow` notices the gap and fails rather than hand out a
/// discontiguous region.
#[derive(Debug)]
pub struct WasmSource {
    base: usize,
    brk: usize,
    committed: usize,
    capacity: usize,
}

impl WasmSource {
    /// A source that will hand out at most `capacity` bytes.
    pub fn new(capacity: usize) -> Result<WasmSource, AllocErr> {
        let end: Bytes = Pages(wasm32::memory_size(0)).into();
        if end.0 == 0 {
            return Err(AllocErr);
        }
        Ok(WasmSource {
            base: end.0,
            brk: 0,
            committed: 0,
            capacity,
        })
    }
}

unsafe impl HeapSource for WasmSource {
    fn grow(&mut self, bytes: Bytes) -> Result<NonNull<u8>, AllocErr> {
        let end = self.brk.checked_add(bytes.0).ok_or(AllocErr)?;
        if end > self.capacity {
            return Err(AllocErr);
        }

        if end > self.committed {
            let missing: Pages = Bytes(end - self.committed).round_up_to();
            let previous = wasm32::memory_grow(0, missing.0);
            if previous == usize::MAX {
                heap_trace!(warn, pages = missing.0, "memory.grow failed");
                return Err(AllocErr);
            }
            let previous: Bytes = Pages(previous).into();
            if previous.0 != self.base + self.committed {
                return Err(AllocErr);
            }
            let grown: Bytes = missing.into();
            self.committed += grown.0;
        }

        let start = self.base + self.brk;
        self.brk = end;
        NonNull::new(start as *mut u8).ok_or(AllocErr)
    }

    fn low(&self) -> *mut u8 {
        self.base as *mut u8
    }

    fn high(&self) -> *mut u8 {
        (self.base + self.brk) as *mut u8
    }
}
