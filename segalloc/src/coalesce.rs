use crate::block::Block;
use crate::heap::Heap;
use crate::source::HeapSource;

/// How [`Heap::merge`] treats the block it starts from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Merge {
    /// The block is tagged free and not in the index yet. The merged span is
    /// tagged free and indexed once.
    Normal,
    /// The block is a live allocation being resized. Free neighbours are
    /// absorbed, but the merged span stays tagged allocated and out of the
    /// index so the caller can decide what to do with it.
    Soft,
}

impl<S: HeapSource> Heap<S> {
    /// Absorb the free blocks immediately before and after `block`,
    /// returning the combined span. Its base moves left when the previous
    /// block was free.
    ///
    /// The prologue and the sentinel are allocated, so the walk never leaves
    /// the heap.
    pub(crate) fn merge(&mut self, block: Block, mode: Merge) -> Block {
        extra_assert_eq!(block.is_free(), mode == Merge::Normal);

        let mut start = block;
        let mut size = block.size();

        let next = block.next_adjacent();
        if let Some(next) = next.as_free() {
            self.free_lists.remove(next);
            size += next.size();
        }

        let prev = block.prev_adjacent();
        if let Some(prev) = prev.as_free() {
            self.free_lists.remove(prev);
            size += prev.size();
            start = prev.block();
        }

        match mode {
            Merge::Normal => {
                start.write_tags(size, false);
                self.index(start);
            }
            Merge::Soft => start.write_tags(size, true),
        }
        start
    }
}
