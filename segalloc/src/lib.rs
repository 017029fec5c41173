/*!

`segalloc`: a **seg**regated-fit, boundary-tag **alloc**ator.

- **Segregated fit:** free blocks are kept in twenty size classes, one per
  power of two, and every class is sorted by size. The first large enough
  block found when scanning upward from a request's own class is close to
  the best fit, without searching the whole heap.

- **Boundary tags:** every block carries its size and allocation bit both
  before and after its payload, so freeing a block merges it with free
  neighbours on either side in constant time.

- **Explicit heaps:** all allocator state lives in a [`Heap`] value that
  grows into a [`HeapSource`]. Independent heaps never interfere with each
  other, which makes them easy to test. [`SegAlloc`] wraps one lazily built
  heap behind a lock for use as the `#[global_allocator]`.

- [Using a `Heap` directly](#using-a-heap-directly)
- [Using `SegAlloc` as the Global Allocator](#using-segalloc-as-the-global-allocator)
- [`cargo` Features](#cargo-features)
- [Configuration](#configuration)
- [Implementation Notes and Constraints](#implementation-notes-and-constraints)

## Using a `Heap` directly

```
use segalloc::{Heap, SliceSource};

let mut memory = vec![0u8; 64 * 1024];
let mut heap = Heap::new(SliceSource::new(&mut memory))?;

let a = heap.allocate(100)?;
let b = unsafe { heap.reallocate(a, 400)? }.unwrap();
unsafe { heap.free(b) };

assert!(heap.validate().is_ok());
# Ok::<(), segalloc::AllocErr>(())
```

## Using `SegAlloc` as the Global Allocator

```
#[global_allocator]
static ALLOC: segalloc::SegAlloc = segalloc::SegAlloc::INIT;

fn main() {
    let v: Vec<u64> = (0..1000).collect();
    assert_eq!(v.iter().sum::<u64>(), 499_500);
}
```

## `cargo` Features

- **extra_assertions**: Enable various extra, expensive integrity assertions,
  including a full [`Heap::validate`] after every allocation, free and
  reallocation. This incurs a large runtime overhead. It is useful when
  debugging a heap corruption in `segalloc` or in code using it.

- **tracing**: Emit [`tracing`](https://docs.rs/tracing) events when a heap
  is created or grows, when a heap source runs out of memory and when
  validation fails. Events are emitted while the heap is locked, so don't
  install a subscriber that allocates while `SegAlloc` is the global
  allocator.

- **static_array_backend**: Back `SegAlloc` with a static array instead of
  memory requested from the operating system.

## Configuration

- The `SEGALLOC_ARENA_BYTES` environment variable, read at build time, sets
  how much address space `SegAlloc` reserves (or how large the static array
  is, with `static_array_backend`). It defaults to 32 MiB.

- [`HeapConfig`] tunes how much a heap grows at a time, and which requests
  count as large.

## Implementation Notes and Constraints

- Each block costs eight bytes of tags. Blocks are at least sixteen bytes,
  and a block is only split when at least twenty-four bytes would be left
  over.

- Every payload is aligned to eight bytes. Larger alignments are served
  from the first free block with an aligned payload that fits, and the
  skipped front of that block stays free.

- Freeing is *O(1)* plus a sorted insertion into one size class.

- Heaps never give memory back to their source.

- Requests larger than 96 bytes are carved from the top of the free block
  chosen for them, smaller ones from its bottom, so that large and small
  allocations don't interleave.

```text
+------------------------------------------------------------------------------+
| Operating System / WebAssembly Engine / Static Array                         |
+------------------------------------------------------------------------------+
                   |
                   | HeapSource::grow
                   V
+------------------------------------------------------------------------------+
| Heap                                                                         |
|                                                                              |
|  pad  prologue   block       block        block             sentinel        |
| +---+--------+-----------+-----------+------------------+---+               |
| |   | 8 | 8  | h | ... f | h | ... f | h |    ...     f | 0 |               |
| +---+--------+-----------+-----------+------------------+---+               |
|                  alloc       free            alloc                           |
|                                ^                                             |
+--------------------------------|---------------------------------------------+
                                 |
+--------------------------------|---------------------------------------------+
| Size Classes                   |                                             |
|                                |                                             |
| [4]  16..32      --> Block --> Block --> ...                                 |
| [5]  32..64      --> Block --> ...                                           |
| ...                                                                          |
| [19] 512KiB..    --> Block --> Block --> ...                                 |
+------------------------------------------------------------------------------+
```

 */

#![deny(missing_docs)]
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod extra_assert;
#[macro_use]
mod trace;

mod block;
mod check;
mod coalesce;
mod const_init;
mod exclusive;
mod heap;
mod imp_static_array;
mod realloc;
mod size_classes;
mod source;

#[cfg(target_arch = "wasm32")]
mod imp_wasm32;
#[cfg(all(unix, not(target_arch = "wasm32")))]
mod imp_unix;
#[cfg(windows)]
mod imp_windows;

#[cfg(all(not(unix), not(windows), not(target_arch = "wasm32")))]
compile_error! {
    "There is no `segalloc` heap source for this target; want to send a pull request? :)"
}

pub use crate::block::{ALIGNMENT, MIN_BLOCK_SIZE};
pub use crate::check::{BlockInfo, Blocks, HeapStats, HeapViolation, ViolationKind};
pub use crate::heap::{Heap, HeapConfig, HEAP_OVERHEAD};
pub use crate::imp_static_array::SliceSource;
#[cfg(all(unix, not(target_arch = "wasm32")))]
pub use crate::imp_unix::MmapSource;
#[cfg(target_arch = "wasm32")]
pub use crate::imp_wasm32::WasmSource;
#[cfg(windows)]
pub use crate::imp_windows::VirtualSource;
pub use crate::size_classes::{size_class, size_class_bounds, NUM_SIZE_CLASSES};
pub use crate::source::HeapSource;

use crate::const_init::ConstInit;
use crate::exclusive::Exclusive;
use core::alloc::{GlobalAlloc, Layout};
use core::cmp;
use core::fmt;
use core::ptr::{self, NonNull};

/// The heap could not satisfy a request: either its source is exhausted or
/// the request is too large to describe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocErr;

impl fmt::Display for AllocErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("memory allocation failed")
    }
}

/// Bytes of memory `SegAlloc` may grow its heap to.
pub(crate) const ARENA_BYTES: usize =
    include!(concat!(env!("OUT_DIR"), "/segalloc_arena_bytes.txt"));

cfg_if::cfg_if! {
    if #[cfg(feature = "static_array_backend")] {
        type DefaultSource = SliceSource<'static>;

        fn default_source() -> Result<DefaultSource, AllocErr> {
            imp_static_array::take_scratch()
        }
    } else if #[cfg(target_arch = "wasm32")] {
        type DefaultSource = WasmSource;

        fn default_source() -> Result<DefaultSource, AllocErr> {
            WasmSource::new(ARENA_BYTES)
        }
    } else if #[cfg(unix)] {
        type DefaultSource = MmapSource;

        fn default_source() -> Result<DefaultSource, AllocErr> {
            MmapSource::reserve(ARENA_BYTES)
        }
    } else {
        type DefaultSource = VirtualSource;

        fn default_source() -> Result<DefaultSource, AllocErr> {
            VirtualSource::reserve(ARENA_BYTES)
        }
    }
}

/// A segregated-fit global allocator.
///
/// The heap is created on first use, from the platform's default heap
/// source, and every operation takes one global lock.
///
/// # Safety
///
/// When used in unix environments, cannot move in memory. Typically not an
/// issue if you're just using this as a `static` global allocator.
pub struct SegAlloc {
    heap: Exclusive<Option<Heap<DefaultSource>>>,
}

// The heap is only ever touched while `Exclusive` is held.
unsafe impl Sync for SegAlloc {}

impl ConstInit for SegAlloc {
    const INIT: SegAlloc = SegAlloc {
        heap: Exclusive::INIT,
    };
}

impl SegAlloc {
    /// An initial `const` default construction of a `SegAlloc` allocator.
    ///
    /// This is usable for initializing `static`s that get set as the global
    /// allocator.
    pub const INIT: Self = <Self as ConstInit>::INIT;

    fn with_heap<F, T>(&self, f: F) -> Result<T, AllocErr>
    where
        F: FnOnce(&mut Heap<DefaultSource>) -> Result<T, AllocErr>,
    {
        self.heap.with_exclusive_access(|heap| {
            if heap.is_none() {
                *heap = Some(Heap::new(default_source()?)?);
            }
            match heap.as_mut() {
                Some(heap) => f(heap),
                None => Err(AllocErr),
            }
        })
    }

    /// Run [`Heap::validate`] on the global heap. A heap that was never used
    /// is trivially valid.
    pub fn validate(&self) -> Result<(), HeapViolation> {
        self.heap
            .with_exclusive_access(|heap| heap.as_ref().map_or(Ok(()), Heap::validate))
    }

    /// [`Heap::stats`] of the global heap, all zero if it was never used.
    pub fn stats(&self) -> HeapStats {
        self.heap
            .with_exclusive_access(|heap| heap.as_ref().map(Heap::stats).unwrap_or_default())
    }
}

unsafe impl GlobalAlloc for SegAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.with_heap(|heap| heap.allocate_aligned(layout.size(), layout.align()))
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => return,
        };
        // Only a heap that handed out `ptr` can take it back.
        self.heap.with_exclusive_access(|heap| {
            if let Some(heap) = heap.as_mut() {
                heap.free(ptr);
            }
        });
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => return ptr::null_mut(),
        };
        if layout.align() > ALIGNMENT {
            let new_layout = Layout::from_size_align_unchecked(new_size, layout.align());
            let moved = self.alloc(new_layout);
            if !moved.is_null() {
                ptr::copy_nonoverlapping(ptr.as_ptr(), moved, cmp::min(layout.size(), new_size));
                self.dealloc(ptr.as_ptr(), layout);
            }
            return moved;
        }
        match self.with_heap(|heap| heap.reallocate(ptr, new_size)) {
            Ok(Some(moved)) => moved.as_ptr(),
            _ => ptr::null_mut(),
        }
    }
}
