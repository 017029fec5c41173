//! Boundary-tagged blocks.
//!
//! Every block is framed by two identical tag words, one before its payload
//! and one at its very end:
//!
//! ```text
//!           header                                         footer
//!         +--------+------------+------------+-- ... --+--------+
//!         | size|a | prev free  | next free  |         | size|a |
//!         +--------+------------+------------+-- ... --+--------+
//!                  ^
//!                  payload offset (double-word aligned)
//! ```
//!
//! The two link words only exist while the block is free. They hold arena
//! *offsets* of the neighbouring blocks in the same size-class list, never
//! raw addresses, so they stay meaningful only relative to the arena that
//! wrote them.

use core::fmt;
use core::num::NonZeroU32;
use core::ptr::{self, NonNull};

/// Size of a boundary tag, in bytes.
pub(crate) const TAG_SIZE: u32 = 4;

/// Every payload address and every block size is a multiple of this.
pub const ALIGNMENT: usize = 8;

/// Header plus footer.
pub(crate) const TAGS_OVERHEAD: u32 = 2 * TAG_SIZE;

/// The smallest block that can still hold both free-list links.
pub const MIN_BLOCK_SIZE: u32 = TAGS_OVERHEAD + 2 * TAG_SIZE;

/// Leftovers smaller than this are left inside the allocated block instead
/// of becoming a free block of their own.
pub(crate) const MIN_SPLIT_SIZE: u32 = MIN_BLOCK_SIZE + ALIGNMENT as u32;

/// The largest block size a tag can describe.
pub(crate) const MAX_BLOCK_SIZE: u32 = Tag::SIZE_MASK;

/// A packed `(size, allocated)` boundary tag.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag(u32);

impl Tag {
    const ALLOCATED: u32 = 0b001;
    const SIZE_MASK: u32 = !0b111;

    /// The zero-sized, allocated tag closing the heap.
    pub(crate) const SENTINEL: Tag = Tag(Self::ALLOCATED);

    pub(crate) fn pack(size: u32, allocated: bool) -> Tag {
        extra_assert_eq!(size & !Self::SIZE_MASK, 0, "block size {} is not aligned", size);
        Tag(size | allocated as u32)
    }

    pub(crate) fn from_bits(bits: u32) -> Tag {
        Tag(bits)
    }

    pub(crate) fn bits(self) -> u32 {
        self.0
    }

    pub(crate) fn size(self) -> u32 {
        self.0 & Self::SIZE_MASK
    }

    pub(crate) fn is_allocated(self) -> bool {
        self.0 & Self::ALLOCATED != 0
    }

    pub(crate) fn unpack(self) -> (u32, bool) {
        (self.size(), self.is_allocated())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (size, allocated) = self.unpack();
        write!(f, "Tag({}|{})", size, allocated as u8)
    }
}

/// Raw, offset-addressed view of a heap's memory.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Arena {
    base: NonNull<u8>,
}

impl Arena {
    pub(crate) fn new(base: NonNull<u8>) -> Arena {
        extra_assert_eq!(base.as_ptr() as usize % ALIGNMENT, 0);
        Arena { base }
    }

    pub(crate) fn address(self, at: u32) -> NonNull<u8> {
        // The arena never wraps the address space, so neither does `base + at`.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(at as usize)) }
    }

    pub(crate) fn offset_of(self, ptr: NonNull<u8>) -> u32 {
        let offset = ptr.as_ptr() as usize - self.base.as_ptr() as usize;
        extra_assert!(offset <= u32::MAX as usize);
        offset as u32
    }

    /// # Safety
    ///
    /// `at..at + 4` must be committed memory of this arena.
    pub(crate) unsafe fn read(self, at: u32) -> u32 {
        extra_assert_eq!(at % TAG_SIZE, 0);
        ptr::read(self.address(at).as_ptr() as *const u32)
    }

    /// # Safety
    ///
    /// `at..at + 4` must be committed memory of this arena, and must not
    /// overlap a live allocation's payload.
    pub(crate) unsafe fn write(self, at: u32, word: u32) {
        extra_assert_eq!(at % TAG_SIZE, 0);
        ptr::write(self.address(at).as_ptr() as *mut u32, word)
    }
}

/// A block, identified by the arena offset of its payload.
///
/// The sentinel closing the heap is a block too: its size is zero and its
/// payload offset equals the current length of the heap.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block {
    arena: Arena,
    at: u32,
}

impl Block {
    /// # Safety
    ///
    /// A block header must live at `at - 4` in `arena`, inside a heap whose
    /// prologue and sentinel are intact.
    pub(crate) unsafe fn from_offset(arena: Arena, at: u32) -> Block {
        extra_assert_eq!(at as usize % ALIGNMENT, 0);
        Block { arena, at }
    }

    /// # Safety
    ///
    /// Same as `from_offset`; `payload` must have been handed out by the heap
    /// that owns `arena`.
    pub(crate) unsafe fn from_payload(arena: Arena, payload: NonNull<u8>) -> Block {
        Block::from_offset(arena, arena.offset_of(payload))
    }

    pub(crate) fn offset(self) -> u32 {
        self.at
    }

    pub(crate) fn payload(self) -> NonNull<u8> {
        self.arena.address(self.at)
    }

    pub(crate) fn header(self) -> Tag {
        unsafe { Tag::from_bits(self.arena.read(self.at - TAG_SIZE)) }
    }

    pub(crate) fn footer(self) -> Tag {
        let size = self.size();
        extra_assert!(size > 0, "the sentinel has no footer");
        unsafe { Tag::from_bits(self.arena.read(self.at + size - TAGS_OVERHEAD)) }
    }

    pub(crate) fn size(self) -> u32 {
        self.header().size()
    }

    pub(crate) fn is_allocated(self) -> bool {
        self.header().is_allocated()
    }

    pub(crate) fn is_free(self) -> bool {
        !self.is_allocated()
    }

    /// Bytes the user may write through `payload()`.
    pub(crate) fn usable_size(self) -> u32 {
        self.size() - TAGS_OVERHEAD
    }

    /// Rewrite both tags so that this block spans `size` bytes.
    pub(crate) fn write_tags(self, size: u32, allocated: bool) {
        extra_assert!(size >= MIN_BLOCK_SIZE);
        let tag = Tag::pack(size, allocated);
        unsafe {
            self.arena.write(self.at - TAG_SIZE, tag.bits());
            self.arena.write(self.at + size - TAGS_OVERHEAD, tag.bits());
        }
    }

    /// Write only the header; used for the zero-sized sentinel.
    pub(crate) fn write_header(self, tag: Tag) {
        unsafe { self.arena.write(self.at - TAG_SIZE, tag.bits()) }
    }

    pub(crate) fn set_allocated(self, allocated: bool) {
        self.write_tags(self.size(), allocated)
    }

    /// The block immediately after this one in the heap.
    pub(crate) fn next_adjacent(self) -> Block {
        Block {
            arena: self.arena,
            at: self.at + self.size(),
        }
    }

    /// The block immediately before this one, found through its footer.
    pub(crate) fn prev_adjacent(self) -> Block {
        let prev_footer = unsafe { Tag::from_bits(self.arena.read(self.at - TAGS_OVERHEAD)) };
        Block {
            arena: self.arena,
            at: self.at - prev_footer.size(),
        }
    }

    pub(crate) fn as_free(self) -> Option<FreeBlock> {
        if self.is_free() {
            Some(FreeBlock(self))
        } else {
            None
        }
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Block")
            .field("at", &self.at)
            .field("header", &self.header())
            .finish()
    }
}

/// A block whose payload currently holds free-list links.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct FreeBlock(Block);

impl FreeBlock {
    const PREV: u32 = 0;
    const NEXT: u32 = TAG_SIZE;

    /// # Safety
    ///
    /// `block` must be tagged free. Its first eight payload bytes become
    /// list links, so no user data may live there any more.
    pub(crate) unsafe fn new_unchecked(block: Block) -> FreeBlock {
        extra_assert!(block.is_free(), "{:?} is not free", block);
        FreeBlock(block)
    }

    pub(crate) fn block(self) -> Block {
        self.0
    }

    pub(crate) fn offset(self) -> u32 {
        self.0.at
    }

    pub(crate) fn size(self) -> u32 {
        self.0.size()
    }

    /// Raw `(prev, next)` link offsets, zero meaning "none".
    pub(crate) fn raw_links(self) -> (u32, u32) {
        unsafe {
            (
                self.0.arena.read(self.0.at + Self::PREV),
                self.0.arena.read(self.0.at + Self::NEXT),
            )
        }
    }

    pub(crate) fn prev_free(self) -> Option<FreeBlock> {
        self.link(Self::PREV)
    }

    pub(crate) fn next_free(self) -> Option<FreeBlock> {
        self.link(Self::NEXT)
    }

    pub(crate) fn set_prev_free(self, prev: Option<FreeBlock>) {
        self.set_link(Self::PREV, prev)
    }

    pub(crate) fn set_next_free(self, next: Option<FreeBlock>) {
        self.set_link(Self::NEXT, next)
    }

    fn link(self, which: u32) -> Option<FreeBlock> {
        let raw = unsafe { self.0.arena.read(self.0.at + which) };
        NonZeroU32::new(raw).map(|at| {
            FreeBlock(Block {
                arena: self.0.arena,
                at: at.get(),
            })
        })
    }

    fn set_link(self, which: u32, block: Option<FreeBlock>) {
        let raw = block.map_or(0, |b| b.0.at);
        unsafe { self.0.arena.write(self.0.at + which, raw) }
    }
}
