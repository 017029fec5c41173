use crate::block::FreeBlock;
use core::cmp;

/// Number of segregated free lists.
pub const NUM_SIZE_CLASSES: usize = 20;

/// The size class that free blocks of `size` bytes are kept in.
///
/// Class `k` holds sizes in `2^k..2^(k+1)`; the last class is a catch-all
/// for everything at or above `2^(NUM_SIZE_CLASSES - 1)`.
#[inline]
pub fn size_class(size: usize) -> usize {
    if size <= 1 {
        return 0;
    }
    let log2 = (usize::BITS - 1 - size.leading_zeros()) as usize;
    cmp::min(log2, NUM_SIZE_CLASSES - 1)
}

/// The inclusive lower bound and exclusive upper bound of a size class. The
/// last class has no upper bound.
///
/// # Panics
///
/// Panics if `class >= NUM_SIZE_CLASSES`.
pub fn size_class_bounds(class: usize) -> (usize, Option<usize>) {
    assert!(class < NUM_SIZE_CLASSES, "no size class {}", class);
    let lower = if class == 0 { 0 } else { 1 << class };
    if class == NUM_SIZE_CLASSES - 1 {
        (lower, None)
    } else {
        (lower, Some(1 << (class + 1)))
    }
}

/// The free-list index: one doubly-linked list of free blocks per size
/// class, each kept in ascending size order.
///
/// Keeping the lists sorted makes insertion linear in the length of one
/// list, but turns the first large-enough block found by a scan into the
/// best fit within its class.
pub(crate) struct FreeLists {
    heads: [Option<FreeBlock>; NUM_SIZE_CLASSES],
}

impl FreeLists {
    pub(crate) const fn new() -> FreeLists {
        FreeLists {
            heads: [None; NUM_SIZE_CLASSES],
        }
    }

    pub(crate) fn head(&self, class: usize) -> Option<FreeBlock> {
        self.heads[class]
    }

    pub(crate) fn iter(&self, class: usize) -> Iter {
        Iter {
            next: self.heads[class],
        }
    }

    /// Splice `block` in front of the first entry of its class that is at
    /// least as large, or at the tail.
    pub(crate) fn insert(&mut self, block: FreeBlock) {
        let size = block.size();
        let class = size_class(size as usize);

        let mut prev = None;
        let mut cursor = self.heads[class];
        while let Some(current) = cursor {
            if current.size() >= size {
                break;
            }
            prev = cursor;
            cursor = current.next_free();
        }

        block.set_prev_free(prev);
        block.set_next_free(cursor);
        match prev {
            Some(prev) => prev.set_next_free(Some(block)),
            None => self.heads[class] = Some(block),
        }
        if let Some(next) = cursor {
            next.set_prev_free(Some(block));
        }
    }

    /// Unsplice `block` using its own links. `block` must currently be in
    /// the index.
    pub(crate) fn remove(&mut self, block: FreeBlock) {
        let prev = block.prev_free();
        let next = block.next_free();

        match prev {
            Some(prev) => prev.set_next_free(next),
            None => {
                let class = size_class(block.size() as usize);
                extra_assert_eq!(self.heads[class], Some(block), "{:?} is not indexed", block);
                self.heads[class] = next;
            }
        }
        if let Some(next) = next {
            next.set_prev_free(prev);
        }
    }

    /// The smallest-class, first-in-order free block of at least `size`
    /// bytes.
    pub(crate) fn find(&self, size: u32) -> Option<FreeBlock> {
        self.find_fitting(size, |_| true)
    }

    /// Like [`find`](FreeLists::find), but skips blocks that `fits`
    /// rejects.
    pub(crate) fn find_fitting<F>(&self, size: u32, fits: F) -> Option<FreeBlock>
    where
        F: Fn(FreeBlock) -> bool,
    {
        (size_class(size as usize)..NUM_SIZE_CLASSES)
            .filter_map(|class| {
                self.iter(class)
                    .find(|&block| block.size() >= size && fits(block))
            })
            .next()
    }
}

/// Walks one size class in ascending size order.
pub(crate) struct Iter {
    next: Option<FreeBlock>,
}

impl Iterator for Iter {
    type Item = FreeBlock;

    fn next(&mut self) -> Option<FreeBlock> {
        let current = self.next?;
        self.next = current.next_free();
        Some(current)
    }
}
