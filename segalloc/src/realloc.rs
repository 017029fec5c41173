use crate::block::{Block, TAGS_OVERHEAD};
use crate::coalesce::Merge;
use crate::heap::{normalize, Heap};
use crate::source::HeapSource;
use crate::AllocErr;
use core::cmp;
use core::ptr::{self, NonNull};

impl<S: HeapSource> Heap<S> {
    /// Resize the allocation at `ptr` to hold at least `new_size` bytes,
    /// keeping the first `min(old usable size, new_size)` bytes of its
    /// contents.
    ///
    /// The allocation grows into free neighbours when it can, and otherwise
    /// moves to a free block or to freshly grown memory. The free lists are
    /// only searched when the allocation and its free neighbours together
    /// are too small, even if they hold a tighter fit. A `new_size` of zero
    /// frees the allocation and returns `Ok(None)`.
    ///
    /// On error the allocation at `ptr` and the rest of the heap are exactly
    /// as they were.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap. On success it must not
    /// be used again; use the returned pointer instead.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, AllocErr> {
        if new_size == 0 {
            self.free(ptr);
            return Ok(None);
        }

        let size = normalize(new_size)?;
        let old = Block::from_payload(self.arena(), ptr);
        extra_assert!(old.is_allocated(), "reallocating freed {:p}", ptr);
        let old_size = old.size();

        let span = self.merge(old, Merge::Soft);
        let resized = if span.size() >= size {
            self.resize_in_place(old, old_size, span, size)
        } else {
            self.relocate(old, old_size, span, size)?
        };

        assert_heap_is_valid!(self);
        Ok(Some(resized.payload()))
    }

    /// The span around `old` is large enough: slide the contents down to the
    /// span's base if it moved left, then hand back the low end.
    unsafe fn resize_in_place(&mut self, old: Block, old_size: u32, span: Block, size: u32) -> Block {
        if span != old {
            let len = cmp::min(old_size, size) - TAGS_OVERHEAD;
            ptr::copy(old.payload().as_ptr(), span.payload().as_ptr(), len as usize);
        }
        self.split_low(span, size)
    }

    unsafe fn relocate(
        &mut self,
        old: Block,
        old_size: u32,
        span: Block,
        size: u32,
    ) -> Result<Block, AllocErr> {
        let target = match self.free_lists.find(size) {
            Some(target) => target,
            None => {
                let grow = cmp::max(size, self.config().realloc_chunk());
                match self.extend(grow) {
                    Ok(target) => target,
                    Err(e) => {
                        self.restore(old, old_size, span);
                        return Err(e);
                    }
                }
            }
        };

        let moved = self.place(target, size);
        // Only reached when the block grows, so the whole old payload fits.
        ptr::copy_nonoverlapping(
            old.payload().as_ptr(),
            moved.payload().as_ptr(),
            (old_size - TAGS_OVERHEAD) as usize,
        );

        span.set_allocated(false);
        self.coalesce(span);
        Ok(moved)
    }

    /// Undo a soft merge: `old` gets its own tags back and whatever was
    /// absorbed on either side becomes a free, indexed block again.
    unsafe fn restore(&mut self, old: Block, old_size: u32, span: Block) {
        let span_end = span.offset() + span.size();
        let old_end = old.offset() + old_size;

        old.write_tags(old_size, true);
        if span != old {
            span.write_tags(old.offset() - span.offset(), false);
            self.index(span);
        }
        if old_end < span_end {
            let right = Block::from_offset(self.arena(), old_end);
            right.write_tags(span_end - old_end, false);
            self.index(right);
        }
    }
}
