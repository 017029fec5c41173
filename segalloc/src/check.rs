//! Heap consistency checking and inspection.
//!
//! None of this is on the allocation path. `validate` walks every block and
//! every free list, so it costs time linear in the heap and the index.

use crate::block::{Block, FreeBlock, Tag, ALIGNMENT, MIN_BLOCK_SIZE};
use crate::heap::{Heap, HEAP_OVERHEAD};
use crate::size_classes::{size_class, NUM_SIZE_CLASSES};
use crate::source::HeapSource;
use core::cmp;
use core::fmt;
use core::ptr::NonNull;

/// What [`Heap::validate`] found wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ViolationKind {
    /// The prologue block's tags were overwritten.
    BadPrologue,
    /// The zero-sized block ending the heap is not tagged allocated.
    BadSentinel,
    /// A block's header and footer differ.
    TagMismatch,
    /// A block is smaller than [`MIN_BLOCK_SIZE`](crate::MIN_BLOCK_SIZE).
    BlockTooSmall,
    /// A block's size runs past the end of the heap.
    BlockOverrunsHeap,
    /// Two adjacent blocks are both free.
    UncoalescedNeighbors,
    /// A free block is missing from its size class.
    FreeBlockNotIndexed,
    /// An allocated block is linked into a size class.
    AllocatedBlockIndexed,
    /// A free block is linked into a size class its size doesn't belong to.
    WrongSizeClass,
    /// A size class is not in ascending size order.
    BucketOutOfOrder,
    /// A free block's back link doesn't point at its predecessor.
    BrokenLink,
    /// A size class links to an offset that can't be a block in this heap.
    ForeignIndexEntry,
    /// The size classes hold more entries than the heap has free blocks.
    StrayIndexEntry,
    /// The heap walk ended somewhere other than the heap source's high
    /// bound.
    HeapEndMismatch,
}

impl ViolationKind {
    fn describe(self) -> &'static str {
        match self {
            ViolationKind::BadPrologue => "prologue block was overwritten",
            ViolationKind::BadSentinel => "heap sentinel is not allocated",
            ViolationKind::TagMismatch => "header and footer differ",
            ViolationKind::BlockTooSmall => "block is smaller than the minimum block size",
            ViolationKind::BlockOverrunsHeap => "block extends past the end of the heap",
            ViolationKind::UncoalescedNeighbors => "adjacent free blocks were not coalesced",
            ViolationKind::FreeBlockNotIndexed => "free block is missing from the free lists",
            ViolationKind::AllocatedBlockIndexed => "allocated block is on a free list",
            ViolationKind::WrongSizeClass => "free block is on the wrong size class list",
            ViolationKind::BucketOutOfOrder => "free list is not sorted by size",
            ViolationKind::BrokenLink => "free list back link is inconsistent",
            ViolationKind::ForeignIndexEntry => "free list links outside the heap",
            ViolationKind::StrayIndexEntry => "free lists hold more entries than there are free blocks",
            ViolationKind::HeapEndMismatch => "heap walk does not end at the heap's high bound",
        }
    }
}

/// The first inconsistency found in a heap, and where.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapViolation {
    kind: ViolationKind,
    address: usize,
}

impl HeapViolation {
    /// What is wrong.
    pub fn kind(&self) -> ViolationKind {
        self.kind
    }

    /// The payload address of the offending block.
    pub fn address(&self) -> usize {
        self.address
    }
}

impl fmt::Display for HeapViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {:#x}", self.kind.describe(), self.address)
    }
}

/// One block of a heap, as seen by [`Heap::blocks`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Where the block's payload starts.
    pub payload: NonNull<u8>,
    /// The whole block, tags included.
    pub size: usize,
    /// Whether the block is handed out.
    pub allocated: bool,
}

/// Totals over every block of a heap. Sizes include boundary tags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes taken from the heap source so far.
    pub arena_bytes: usize,
    /// Number of live allocations.
    pub allocated_blocks: usize,
    /// Bytes held by live allocations.
    pub allocated_bytes: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Bytes held by free blocks.
    pub free_bytes: usize,
    /// The largest free block, or zero.
    pub largest_free: usize,
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'a, S: HeapSource> {
    heap: &'a Heap<S>,
    next: Block,
}

impl<'a, S: HeapSource> Iterator for Blocks<'a, S> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let block = self.next;
        let (size, allocated) = block.header().unpack();
        if size == 0 || block.offset() as usize + size as usize > self.heap.heap_len() {
            return None;
        }
        self.next = block.next_adjacent();
        Some(BlockInfo {
            payload: block.payload(),
            size: size as usize,
            allocated,
        })
    }
}

impl<S: HeapSource> Heap<S> {
    /// Walk the heap's blocks in address order, from the first block after
    /// the prologue up to the sentinel.
    ///
    /// The walk trusts the tags it reads; on a heap that fails
    /// [`validate`](Heap::validate) it may stop early.
    pub fn blocks(&self) -> Blocks<S> {
        Blocks {
            heap: self,
            next: self.first_block(),
        }
    }

    /// Block counts and byte totals of the whole heap.
    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                arena_bytes: self.heap_len(),
                ..HeapStats::default()
            },
            |mut stats, block| {
                if block.allocated {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += block.size;
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.size;
                    stats.largest_free = cmp::max(stats.largest_free, block.size);
                }
                stats
            },
        )
    }

    /// Check every structural invariant of the heap and its free lists,
    /// reporting the first violation found.
    ///
    /// This never panics on a corrupted heap, as long as the corruption
    /// stays within the heap's own memory.
    pub fn validate(&self) -> Result<(), HeapViolation> {
        self.check_blocks()
            .and_then(|free_blocks| self.check_free_lists(free_blocks))
            .map_err(|violation| {
                heap_trace!(error, %violation, "heap validation failed");
                violation
            })
    }

    fn violation(&self, kind: ViolationKind, at: u32) -> HeapViolation {
        HeapViolation {
            kind,
            address: self.source().low() as usize + at as usize,
        }
    }

    /// Walk from the prologue to the sentinel, returning how many free
    /// blocks there are.
    fn check_blocks(&self) -> Result<usize, HeapViolation> {
        let prologue = self.prologue();
        if prologue.header() != Self::expected_prologue()
            || prologue.footer() != Self::expected_prologue()
        {
            return Err(self.violation(ViolationKind::BadPrologue, prologue.offset()));
        }

        let heap_len = self.heap_len();
        let mut free_blocks = 0;
        let mut prev_free = false;
        let mut block = self.first_block();
        loop {
            let at = block.offset();
            let header = block.header();
            let (size, allocated) = header.unpack();

            if size == 0 {
                if header != Tag::SENTINEL {
                    return Err(self.violation(ViolationKind::BadSentinel, at));
                }
                if at as usize != heap_len {
                    return Err(self.violation(ViolationKind::HeapEndMismatch, at));
                }
                return Ok(free_blocks);
            }
            if size < MIN_BLOCK_SIZE {
                return Err(self.violation(ViolationKind::BlockTooSmall, at));
            }
            if at as usize + size as usize > heap_len {
                return Err(self.violation(ViolationKind::BlockOverrunsHeap, at));
            }
            if block.footer() != header {
                return Err(self.violation(ViolationKind::TagMismatch, at));
            }

            if !allocated {
                if prev_free {
                    return Err(self.violation(ViolationKind::UncoalescedNeighbors, at));
                }
                free_blocks += 1;
            }
            prev_free = !allocated;
            block = block.next_adjacent();
        }
    }

    /// Follow every size class, checking each entry against the heap that
    /// `check_blocks` already vouched for.
    fn check_free_lists(&self, free_blocks: usize) -> Result<(), HeapViolation> {
        let heap_len = self.heap_len();
        let mut indexed = 0;

        for class in 0..NUM_SIZE_CLASSES {
            let mut prev: Option<FreeBlock> = None;
            let mut cursor = self.free_lists.head(class);

            while let Some(entry) = cursor {
                let at = entry.offset();
                indexed += 1;
                if indexed > free_blocks {
                    return Err(self.violation(ViolationKind::StrayIndexEntry, at));
                }
                if (at as usize) < HEAP_OVERHEAD
                    || at as usize >= heap_len
                    || at as usize % ALIGNMENT != 0
                {
                    return Err(self.violation(ViolationKind::ForeignIndexEntry, at));
                }

                let block = entry.block();
                let (size, allocated) = block.header().unpack();
                if allocated {
                    return Err(self.violation(ViolationKind::AllocatedBlockIndexed, at));
                }
                if size < MIN_BLOCK_SIZE || at as usize + size as usize > heap_len {
                    return Err(self.violation(ViolationKind::ForeignIndexEntry, at));
                }
                if block.footer() != block.header() {
                    return Err(self.violation(ViolationKind::TagMismatch, at));
                }
                if size_class(size as usize) != class {
                    return Err(self.violation(ViolationKind::WrongSizeClass, at));
                }
                if prev.map_or(false, |prev| prev.size() > size) {
                    return Err(self.violation(ViolationKind::BucketOutOfOrder, at));
                }
                let (prev_link, _) = entry.raw_links();
                if prev_link != prev.map_or(0, |prev| prev.offset()) {
                    return Err(self.violation(ViolationKind::BrokenLink, at));
                }

                prev = Some(entry);
                cursor = entry.next_free();
            }
        }

        if indexed < free_blocks {
            // Every list is finite and well formed by now, so it is safe to
            // search them.
            let missing = self.blocks().find(|info| {
                if info.allocated {
                    return false;
                }
                let at = self.arena().offset_of(info.payload);
                !self
                    .free_lists
                    .iter(size_class(info.size))
                    .any(|entry| entry.offset() == at)
            });
            if let Some(missing) = missing {
                let at = self.arena().offset_of(missing.payload);
                return Err(self.violation(ViolationKind::FreeBlockNotIndexed, at));
            }
        }

        Ok(())
    }
}
