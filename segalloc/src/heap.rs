use crate::block::{
    Arena, Block, FreeBlock, Tag, ALIGNMENT, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, MIN_SPLIT_SIZE,
    TAGS_OVERHEAD,
};
use crate::coalesce::Merge;
use crate::size_classes::FreeLists;
use crate::source::HeapSource;
use crate::AllocErr;
use core::cmp;
use core::ptr::NonNull;
use memory_units::Bytes;

/// Bytes of every heap that never belong to a block: one alignment padding
/// word, the prologue block and the sentinel's header.
pub const HEAP_OVERHEAD: usize = 16;

const PROLOGUE: u32 = 8;
const FIRST_BLOCK: u32 = HEAP_OVERHEAD as u32;

/// Tunables of a [`Heap`].
///
/// ```
/// use segalloc::HeapConfig;
///
/// const SMALL_CHUNKS: HeapConfig = HeapConfig::DEFAULT.with_chunk_size(512);
/// assert_eq!(SMALL_CHUNKS.chunk_size(), 512);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
    chunk_size: u32,
    realloc_chunk: u32,
    large_threshold: u32,
}

impl HeapConfig {
    /// 2 KiB growth chunks, 24 KiB reallocation chunks and a 96 byte
    /// threshold for large blocks.
    pub const DEFAULT: HeapConfig = HeapConfig {
        chunk_size: 1 << 11,
        realloc_chunk: 3 << 13,
        large_threshold: 3 << 5,
    };

    /// The minimum number of bytes the heap grows by when an allocation
    /// misses every free list. Rounded up to [`ALIGNMENT`].
    pub const fn with_chunk_size(mut self, bytes: u32) -> HeapConfig {
        self.chunk_size = round_up(bytes);
        self
    }

    /// The minimum number of bytes the heap grows by when a reallocation
    /// cannot be satisfied in place or from a free list. Rounded up to
    /// [`ALIGNMENT`].
    pub const fn with_realloc_chunk(mut self, bytes: u32) -> HeapConfig {
        self.realloc_chunk = round_up(bytes);
        self
    }

    /// Blocks above this size are carved from the high end of a split free
    /// block, everything else from the low end.
    pub const fn with_large_threshold(mut self, bytes: u32) -> HeapConfig {
        self.large_threshold = bytes;
        self
    }

    /// See [`with_chunk_size`](HeapConfig::with_chunk_size).
    pub const fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// See [`with_realloc_chunk`](HeapConfig::with_realloc_chunk).
    pub const fn realloc_chunk(&self) -> u32 {
        self.realloc_chunk
    }

    /// See [`with_large_threshold`](HeapConfig::with_large_threshold).
    pub const fn large_threshold(&self) -> u32 {
        self.large_threshold
    }
}

impl Default for HeapConfig {
    fn default() -> HeapConfig {
        HeapConfig::DEFAULT
    }
}

const fn round_up(bytes: u32) -> u32 {
    let mask = ALIGNMENT as u32 - 1;
    match bytes.checked_add(mask) {
        Some(bytes) => bytes & !mask,
        None => MAX_BLOCK_SIZE,
    }
}

/// The block size that serves a request for `size` bytes: room for both
/// tags, rounded up to [`ALIGNMENT`], and never below [`MIN_BLOCK_SIZE`].
pub(crate) fn normalize(size: usize) -> Result<u32, AllocErr> {
    if size <= ALIGNMENT {
        return Ok(MIN_BLOCK_SIZE);
    }
    let padded = size
        .checked_add(TAGS_OVERHEAD as usize + ALIGNMENT - 1)
        .ok_or(AllocErr)?
        & !(ALIGNMENT - 1);
    if padded > MAX_BLOCK_SIZE as usize {
        return Err(AllocErr);
    }
    Ok(padded as u32)
}

/// A segregated-fit heap living in the memory of one [`HeapSource`].
///
/// All allocator state lives here, so independent heaps never interfere
/// with each other. The heap never gives memory back to its source.
pub struct Heap<S: HeapSource> {
    source: S,
    arena: Arena,
    pub(crate) free_lists: FreeLists,
    config: HeapConfig,
}

impl<S: HeapSource> Heap<S> {
    /// Lay out an empty heap, with default tunables, at the start of
    /// `source`, which must not have been grown yet.
    pub fn new(source: S) -> Result<Heap<S>, AllocErr> {
        Heap::with_config(source, HeapConfig::DEFAULT)
    }

    /// Lay out an empty heap at the start of `source`, which must not have
    /// been grown yet.
    pub fn with_config(mut source: S, config: HeapConfig) -> Result<Heap<S>, AllocErr> {
        let start = source.grow(Bytes(HEAP_OVERHEAD))?;
        if start.as_ptr() != source.low() {
            return Err(AllocErr);
        }

        // The prologue is smaller than any real block, so its tags are
        // written by hand.
        let arena = Arena::new(start);
        let prologue = Self::expected_prologue().bits();
        unsafe {
            arena.write(0, 0);
            arena.write(PROLOGUE - 4, prologue);
            arena.write(PROLOGUE, prologue);
            Block::from_offset(arena, FIRST_BLOCK).write_header(Tag::SENTINEL);
        }
        heap_trace!(debug, base = ?start, ?config, "initialized heap");

        let heap = Heap {
            source,
            arena,
            free_lists: FreeLists::new(),
            config,
        };
        assert_heap_is_valid!(heap);
        Ok(heap)
    }

    /// The memory this heap grows into.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The tunables this heap was built with.
    pub fn config(&self) -> HeapConfig {
        self.config
    }

    /// Allocate at least `size` bytes, aligned to [`ALIGNMENT`].
    ///
    /// Only fails when the request can't be represented or the source is
    /// exhausted; the heap is left untouched in that case.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocErr> {
        let size = normalize(size)?;
        let block = match self.free_lists.find(size) {
            Some(block) => block,
            None => self.extend(cmp::max(size, self.config.chunk_size))?,
        };
        let allocated = self.place(block, size);

        extra_assert_eq!(allocated.payload().as_ptr() as usize % ALIGNMENT, 0);
        assert_heap_is_valid!(self);
        Ok(allocated.payload())
    }

    /// Allocate at least `size` bytes at an address that is a multiple of
    /// `align`, which must be a power of two.
    ///
    /// Requests for at most [`ALIGNMENT`] are plain [`allocate`] calls.
    /// Otherwise the allocation starts at the first aligned payload of a
    /// free block that leaves room for it, and the skipped front of that
    /// block stays free. [`reallocate`](Heap::reallocate) only keeps
    /// [`ALIGNMENT`], so over-aligned allocations are resized by hand.
    ///
    /// [`allocate`]: Heap::allocate
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, AllocErr> {
        if align <= ALIGNMENT {
            return self.allocate(size);
        }
        if !align.is_power_of_two() {
            return Err(AllocErr);
        }

        let size = normalize(size)?;
        // Enough for any front gap, so a fresh block always fits.
        let padded = (size as usize)
            .checked_add(align)
            .and_then(|padded| padded.checked_add(MIN_BLOCK_SIZE as usize))
            .filter(|&padded| padded <= MAX_BLOCK_SIZE as usize)
            .ok_or(AllocErr)? as u32;

        let fits = |block: FreeBlock| fits_aligned(block.block(), size, align);
        let block = match self.free_lists.find_fitting(size, fits) {
            Some(block) => block,
            None => self.extend(cmp::max(padded, self.config.chunk_size))?,
        };
        extra_assert!(fits(block));

        self.free_lists.remove(block);
        let mut block = block.block();
        let gap = front_gap(block, align) as u32;
        if gap > 0 {
            let total = block.size();
            block.write_tags(gap, false);
            self.index(block);
            block = block.next_adjacent();
            block.write_tags(total - gap, false);
        }
        let allocated = self.split_low(block, size);

        extra_assert_eq!(allocated.payload().as_ptr() as usize % align, 0);
        assert_heap_is_valid!(self);
        Ok(allocated.payload())
    }

    /// Return an allocation to the heap, merging it with free neighbours.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `allocate` or `reallocate` on this heap and
    /// must not have been freed since.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        let block = Block::from_payload(self.arena, ptr);
        extra_assert!(block.is_allocated(), "double free of {:p}", ptr);

        block.set_allocated(false);
        self.coalesce(block);
        assert_heap_is_valid!(self);
    }

    /// How many bytes may be written through `ptr`; at least what was asked
    /// for.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        Block::from_payload(self.arena, ptr).usable_size() as usize
    }

    pub(crate) fn arena(&self) -> Arena {
        self.arena
    }

    /// Current length of the arena, from `low()` to `high()`.
    pub(crate) fn heap_len(&self) -> usize {
        self.source.high() as usize - self.source.low() as usize
    }

    pub(crate) fn prologue(&self) -> Block {
        unsafe { Block::from_offset(self.arena, PROLOGUE) }
    }

    pub(crate) fn first_block(&self) -> Block {
        unsafe { Block::from_offset(self.arena, FIRST_BLOCK) }
    }

    pub(crate) fn expected_prologue() -> Tag {
        Tag::pack(PROLOGUE, true)
    }

    /// Grow the arena by `size` bytes and hand back the new space as one
    /// free, indexed block, merged with a free block that ended the heap.
    pub(crate) fn extend(&mut self, size: u32) -> Result<FreeBlock, AllocErr> {
        let size = round_up(size);
        let heap_len = self.heap_len();
        let new_len = heap_len
            .checked_add(size as usize)
            .filter(|&end| end <= u32::MAX as usize)
            .ok_or(AllocErr)?;

        let region = self.source.grow(Bytes(size as usize))?;
        heap_trace!(debug, grown = size, heap_len = new_len, "extended heap");

        // The old sentinel's header becomes the new block's header.
        let block = unsafe { Block::from_payload(self.arena, region) };
        extra_assert_eq!(block.offset() as usize, heap_len);
        block.write_tags(size, false);
        block.next_adjacent().write_header(Tag::SENTINEL);

        Ok(self.coalesce(block))
    }

    /// Take `block` out of the index and allocate `size` bytes of it,
    /// splitting off the rest when it is worth keeping.
    pub(crate) fn place(&mut self, block: FreeBlock, size: u32) -> Block {
        self.free_lists.remove(block);
        let block = block.block();
        extra_assert!(block.size() >= size);

        if size > self.config.large_threshold {
            self.split_high(block, size)
        } else {
            self.split_low(block, size)
        }
    }

    /// Allocate the low `size` bytes of an unindexed `block` and index the
    /// high remainder, if any.
    pub(crate) fn split_low(&mut self, block: Block, size: u32) -> Block {
        let total = block.size();
        let remainder = total - size;
        if remainder < MIN_SPLIT_SIZE {
            block.write_tags(total, true);
            return block;
        }

        block.write_tags(size, true);
        let rest = block.next_adjacent();
        rest.write_tags(remainder, false);
        self.index(rest);
        block
    }

    /// Allocate the high `size` bytes of an unindexed `block` and index the
    /// low remainder, if any.
    fn split_high(&mut self, block: Block, size: u32) -> Block {
        let total = block.size();
        let remainder = total - size;
        if remainder < MIN_SPLIT_SIZE {
            block.write_tags(total, true);
            return block;
        }

        block.write_tags(remainder, false);
        self.index(block);
        let allocated = block.next_adjacent();
        allocated.write_tags(size, true);
        allocated
    }

    /// Insert a block that is tagged free into its size class.
    pub(crate) fn index(&mut self, block: Block) -> FreeBlock {
        let free = unsafe { FreeBlock::new_unchecked(block) };
        self.free_lists.insert(free);
        free
    }

    /// Merge a free, unindexed block with its free neighbours and index the
    /// result.
    pub(crate) fn coalesce(&mut self, block: Block) -> FreeBlock {
        let merged = self.merge(block, Merge::Normal);
        unsafe { FreeBlock::new_unchecked(merged) }
    }
}

/// Bytes to skip at the front of `block` so that its payload lands on a
/// multiple of `align`. A nonzero gap is always large enough to stand alone
/// as a free block.
fn front_gap(block: Block, align: usize) -> usize {
    let gap = (block.payload().as_ptr() as usize).wrapping_neg() & (align - 1);
    if gap != 0 && gap < MIN_BLOCK_SIZE as usize {
        gap + align
    } else {
        gap
    }
}

fn fits_aligned(block: Block, size: u32, align: usize) -> bool {
    front_gap(block, align)
        .checked_add(size as usize)
        .map_or(false, |needed| needed <= block.size() as usize)
}
