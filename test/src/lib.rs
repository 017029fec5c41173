use cfg_if::cfg_if;
use quickcheck::{Arbitrary, Gen};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use segalloc::{Heap, HeapSource, SegAlloc, SliceSource, ALIGNMENT, HEAP_OVERHEAD};
use std::alloc::{GlobalAlloc, Layout};
use std::cmp;
use std::fs;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    // Allocate this many bytes.
    Alloc(usize),

    // Free the n^th allocation we've made, or no-op if it has already been
    // freed.
    Free(usize),

    // Resize the n^th allocation we've made to this many bytes, keeping its
    // index. Resizing to zero frees it.
    Realloc(usize, usize),
}

pub use Operation::*;

/// Everything above this is a "large" allocation for the generator; requests
/// in between straddle the heap's large threshold.
const MAX_SMALL_ALLOC_SIZE: usize = 2048;

impl Operation {
    fn arbitrary_size(rng: &mut SmallRng) -> usize {
        // Zero sized allocation 1/1000 times.
        if rng.gen_ratio(1, 1000) {
            return 0;
        }

        // Do a large allocation with probability P = 1/20.
        if rng.gen_ratio(1, 20) {
            return rng.gen_range(1..10) * MAX_SMALL_ALLOC_SIZE
                + rng.gen_range(0..MAX_SMALL_ALLOC_SIZE);
        }

        if rng.gen() {
            rng.gen_range(1..=96)
        } else {
            rng.gen_range(97..=MAX_SMALL_ALLOC_SIZE)
        }
    }

    fn arbitrary_alloc(
        rng: &mut SmallRng,
        active_allocs: &mut Vec<usize>,
        num_allocs: &mut usize,
    ) -> Self {
        active_allocs.push(*num_allocs);
        *num_allocs += 1;
        Alloc(Self::arbitrary_size(rng))
    }

    fn arbitrary_free(rng: &mut SmallRng, active_allocs: &mut Vec<usize>) -> Self {
        assert!(!active_allocs.is_empty());
        let i = rng.gen_range(0..active_allocs.len());
        Free(active_allocs.swap_remove(i))
    }

    fn arbitrary_realloc(rng: &mut SmallRng, active_allocs: &mut Vec<usize>) -> Self {
        assert!(!active_allocs.is_empty());
        let i = rng.gen_range(0..active_allocs.len());
        let idx = active_allocs[i];
        let size = Self::arbitrary_size(rng);
        if size == 0 {
            active_allocs.swap_remove(i);
        }
        Realloc(idx, size)
    }
}

fn call_args<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?.strip_prefix('(')?.strip_suffix("),")
}

impl FromStr for Operation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let s = s.trim();

        if let Some(n) = call_args(s, "Alloc") {
            return Ok(Alloc(n.parse().map_err(|_| ())?));
        }

        if let Some(idx) = call_args(s, "Free") {
            return Ok(Free(idx.parse().map_err(|_| ())?));
        }

        if let Some(args) = call_args(s, "Realloc") {
            let (idx, n) = args.split_once(',').ok_or(())?;
            let idx = idx.trim().parse().map_err(|_| ())?;
            let n = n.trim().parse().map_err(|_| ())?;
            return Ok(Realloc(idx, n));
        }

        Err(())
    }
}

#[derive(Debug, Clone)]
pub struct Operations(pub Vec<Operation>);

impl FromStr for Operations {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let mut ops = vec![];
        for line in s.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            ops.push(line.parse()?);
        }
        Ok(Operations(ops))
    }
}

cfg_if! {
    if #[cfg(feature = "extra_assertions")] {
        const NUM_OPERATIONS: usize = 500;
    } else {
        const NUM_OPERATIONS: usize = 5_000;
    }
}

impl Arbitrary for Operations {
    #[inline(never)]
    fn arbitrary(g: &mut Gen) -> Self {
        // Our tests spend more time generating operations than running them
        // through the allocator. Speed things up a little with a small RNG
        // seeded from quickcheck's.
        let mut rng = SmallRng::seed_from_u64(u64::arbitrary(g));
        let rng = &mut rng;

        let mut num_allocs = 0;
        let mut active_allocs = vec![];
        let mut operations = Vec::with_capacity(NUM_OPERATIONS);

        for _ in 0..NUM_OPERATIONS {
            if active_allocs.is_empty() {
                operations.push(Operation::arbitrary_alloc(
                    rng,
                    &mut active_allocs,
                    &mut num_allocs,
                ));
                continue;
            }

            // Free with P = 1/4 and resize with P = 1/8, so allocation wins
            // out and the heap keeps growing.
            let op = match rng.gen_range(0..8) {
                0 | 1 => Operation::arbitrary_free(rng, &mut active_allocs),
                2 => Operation::arbitrary_realloc(rng, &mut active_allocs),
                _ => Operation::arbitrary_alloc(rng, &mut active_allocs, &mut num_allocs),
            };
            operations.push(op);
        }

        operations.reserve_exact(active_allocs.len());
        while !active_allocs.is_empty() {
            operations.push(Operation::arbitrary_free(rng, &mut active_allocs));
        }

        Operations(operations)
    }

    #[inline(never)]
    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        let ops = self.0.clone();
        let prefixes =
            (0..self.0.len()).map(move |i| Operations(ops.iter().cloned().take(i).collect()));

        let indices_where = |f: fn(&Operation) -> bool| -> Vec<usize> {
            self.0
                .iter()
                .enumerate()
                .filter_map(|(i, op)| if f(op) { Some(i) } else { None })
                .collect()
        };

        // Dropping a free or a resize leaves every allocation index intact.
        let dropped: Vec<_> = indices_where(|op: &Operation| !matches!(op, Alloc(_)));
        let ops = self.0.clone();
        let without_frees_or_reallocs = dropped.into_iter().map(move |i| {
            Operations(
                ops.iter()
                    .enumerate()
                    .filter_map(|(j, op)| if i == j { None } else { Some(*op) })
                    .collect(),
            )
        });

        // Dropping an allocation renumbers everything allocated after it.
        let alloc_indices: Vec<_> = indices_where(|op: &Operation| matches!(op, Alloc(_)));
        let ops = self.0.clone();
        let without_allocs = alloc_indices.into_iter().enumerate().map(move |(nth, i)| {
            let renumber = |k: usize| match k.cmp(&nth) {
                cmp::Ordering::Less => Some(k),
                cmp::Ordering::Equal => None,
                cmp::Ordering::Greater => Some(k - 1),
            };
            Operations(
                ops.iter()
                    .enumerate()
                    .filter_map(|(j, op)| match *op {
                        _ if i == j => None,
                        Free(k) => renumber(k).map(Free),
                        Realloc(k, n) => renumber(k).map(|k| Realloc(k, n)),
                        op => Some(op),
                    })
                    .collect(),
            )
        });

        let sized_indices: Vec<_> = indices_where(|op: &Operation| match *op {
            Alloc(n) | Realloc(_, n) => n > 0,
            Free(_) => false,
        });
        let ops = self.0.clone();
        let smaller_sizes = sized_indices.into_iter().map(move |i| {
            let mut ops = ops.clone();
            ops[i] = match ops[i] {
                Alloc(n) => Alloc(n / 2),
                Realloc(k, n) => Realloc(k, cmp::max(n / 2, 1)),
                op => op,
            };
            Operations(ops)
        });

        Box::new(
            prefixes
                .chain(without_frees_or_reallocs)
                .chain(without_allocs)
                .chain(smaller_sizes),
        )
    }
}

/// The byte every allocation with this index is filled with.
fn pattern(idx: usize) -> u8 {
    (idx as u8).wrapping_mul(31).wrapping_add(7)
}

unsafe fn fill(ptr: NonNull<u8>, from: usize, to: usize, byte: u8) {
    if to > from {
        ptr::write_bytes(ptr.as_ptr().add(from), byte, to - from);
    }
}

unsafe fn check_pattern(ptr: NonNull<u8>, len: usize, byte: u8, idx: usize) {
    let payload = slice::from_raw_parts(ptr.as_ptr(), len);
    if let Some(at) = payload.iter().position(|b| *b != byte) {
        panic!("allocation {} was clobbered at byte {} of {}", idx, at, len);
    }
}

fn check_heap<S: HeapSource>(heap: &Heap<S>, after: &Operation) {
    if let Err(violation) = heap.validate() {
        panic!("heap invalid after {:?}: {}", after, violation);
    }
    let stats = heap.stats();
    assert_eq!(
        stats.allocated_bytes + stats.free_bytes + HEAP_OVERHEAD,
        stats.arena_bytes,
        "blocks don't add up to the arena after {:?}",
        after
    );
}

/// The `SegAlloc` shared by every test that goes through `GlobalAlloc`. The
/// static array backend can only be handed to one allocator per process.
pub static SEG: SegAlloc = SegAlloc::INIT;

/// How much memory `Operations::run` gives each heap.
pub const ARENA_BYTES: usize = 64 << 20;

impl Operations {
    /// Replay against a fresh heap with its own memory.
    pub fn run(&self) {
        let mut memory = vec![0u8; ARENA_BYTES];
        let mut heap = Heap::new(SliceSource::new(&mut memory)).unwrap();
        self.run_on_heap(&mut heap);
    }

    /// Replay against `heap`, validating it and every payload touched after
    /// each operation. Allocations that fail for lack of memory are skipped.
    pub fn run_on_heap<S: HeapSource>(&self, heap: &mut Heap<S>) {
        let mut allocs: Vec<Option<(NonNull<u8>, usize)>> = vec![];
        for op in self.0.iter().cloned() {
            match op {
                Alloc(n) => {
                    let idx = allocs.len();
                    allocs.push(heap.allocate(n).ok().map(|ptr| unsafe {
                        assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
                        assert!(heap.usable_size(ptr) >= n);
                        fill(ptr, 0, n, pattern(idx));
                        (ptr, n)
                    }));
                }
                Free(idx) => {
                    if let Some((ptr, n)) = allocs.get_mut(idx).and_then(Option::take) {
                        unsafe {
                            check_pattern(ptr, n, pattern(idx), idx);
                            heap.free(ptr);
                        }
                    }
                }
                Realloc(idx, new_size) => {
                    let entry = match allocs.get_mut(idx) {
                        Some(entry) => entry,
                        None => continue,
                    };
                    if let Some((ptr, n)) = *entry {
                        unsafe {
                            match heap.reallocate(ptr, new_size) {
                                Ok(Some(moved)) => {
                                    check_pattern(moved, cmp::min(n, new_size), pattern(idx), idx);
                                    assert!(heap.usable_size(moved) >= new_size);
                                    fill(moved, n, new_size, pattern(idx));
                                    *entry = Some((moved, new_size));
                                }
                                Ok(None) => *entry = None,
                                // The old allocation must be untouched.
                                Err(_) => check_pattern(ptr, n, pattern(idx), idx),
                            }
                        }
                    }
                }
            }
            check_heap(heap, &op);
        }
    }

    /// Replay through a `GlobalAlloc`, checking payloads but not the heap.
    pub fn run_with_allocator<A: GlobalAlloc>(&self, a: &A) {
        let mut allocs: Vec<Option<(*mut u8, Layout)>> = vec![];
        for op in self.0.iter().cloned() {
            match op {
                Alloc(n) => {
                    let idx = allocs.len();
                    let layout = Layout::from_size_align(n, ALIGNMENT).unwrap();
                    let ptr = unsafe { a.alloc(layout) };
                    allocs.push(NonNull::new(ptr).map(|ptr| unsafe {
                        fill(ptr, 0, n, pattern(idx));
                        (ptr.as_ptr(), layout)
                    }));
                }
                Free(idx) | Realloc(idx, 0) => {
                    if let Some((ptr, layout)) = allocs.get_mut(idx).and_then(Option::take) {
                        unsafe {
                            check_pattern(NonNull::new_unchecked(ptr), layout.size(), pattern(idx), idx);
                            a.dealloc(ptr, layout);
                        }
                    }
                }
                Realloc(idx, new_size) => {
                    let entry = match allocs.get_mut(idx) {
                        Some(entry) => entry,
                        None => continue,
                    };
                    if let Some((ptr, layout)) = *entry {
                        let moved = unsafe { a.realloc(ptr, layout, new_size) };
                        if let Some(moved) = NonNull::new(moved) {
                            let n = layout.size();
                            unsafe {
                                check_pattern(moved, cmp::min(n, new_size), pattern(idx), idx);
                                fill(moved, n, new_size, pattern(idx));
                            }
                            let layout = Layout::from_size_align(new_size, ALIGNMENT).unwrap();
                            *entry = Some((moved.as_ptr(), layout));
                        }
                    }
                }
            }
        }
    }

    pub fn run_multi_threaded(ops0: Self, ops1: Self, ops2: Self, ops3: Self) {
        use std::thread;

        let handle0 = thread::spawn(move || ops0.run_with_allocator(&SEG));
        let handle1 = thread::spawn(move || ops1.run_with_allocator(&SEG));
        let handle2 = thread::spawn(move || ops2.run_with_allocator(&SEG));
        let handle3 = thread::spawn(move || ops3.run_with_allocator(&SEG));

        handle0.join().expect("Thread 0 Failed");
        handle1.join().expect("Thread 1 Failed");
        handle2.join().expect("Thread 2 Failed");
        handle3.join().expect("Thread 3 Failed");

        if let Err(violation) = SEG.validate() {
            panic!("global heap invalid: {}", violation);
        }
    }

    pub fn read_trace(trace: &str) -> Self {
        let trace_dir = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/traces"));
        let contents = fs::read_to_string(trace_dir.join(trace)).unwrap();
        contents.parse().unwrap()
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
fn init_tracing() {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .with_test_writer()
            .try_init();
    }
}

#[cfg(test)]
macro_rules! run_quickchecks {
    ($name:ident) => {
        #[test]
        fn $name() {
            fn single_heap(ops: Operations) {
                ops.run();
            }

            init_tracing();
            quickcheck::QuickCheck::new()
                .tests(1)
                .quickcheck(single_heap as fn(Operations));
        }
    };
}

// Let the test harness run each of our single heap quickchecks concurrently
// with each other.
#[cfg(test)]
run_quickchecks!(quickchecks_0);
#[cfg(test)]
run_quickchecks!(quickchecks_1);
#[cfg(test)]
run_quickchecks!(quickchecks_2);
#[cfg(test)]
run_quickchecks!(quickchecks_3);

#[test]
fn multi_threaded_quickchecks() {
    init_tracing();
    quickcheck::QuickCheck::new().tests(1).quickcheck(
        Operations::run_multi_threaded as fn(Operations, Operations, Operations, Operations),
    );
}

#[cfg(test)]
static ALIGNS: [usize; 10] = [1, 2, 4, 8, 16, 32, 64, 128, 256, 512];

#[cfg(test)]
quickcheck::quickcheck! {
    fn single_allocation_with_size_and_align(size: usize, align: usize) -> bool {
        let size = size % 65536;
        let align = ALIGNS[align % ALIGNS.len()];
        let layout = Layout::from_size_align(size, align).unwrap();

        let ptr = unsafe { SEG.alloc(layout) };
        if ptr.is_null() || ptr as usize % align != 0 {
            return false;
        }
        unsafe {
            ptr::write_bytes(ptr, 0x3c, size);
            SEG.dealloc(ptr, layout);
        }
        SEG.validate().is_ok()
    }
}

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
macro_rules! test_trace {
    ($name:ident, $trace:expr) => {
        #[test]
        fn $name() {
            init_tracing();
            let ops = Operations::read_trace($trace);
            ops.run();
        }
    };
}

#[cfg(test)]
test_trace!(test_trace_reuse, "reuse.trace");
#[cfg(test)]
test_trace!(test_trace_coalesce, "coalesce.trace");
#[cfg(test)]
test_trace!(test_trace_realloc, "realloc.trace");
#[cfg(test)]
test_trace!(test_trace_binary, "binary.trace");

////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use segalloc::HeapConfig;
    use std::iter;

    fn heap(memory: &mut [u8]) -> Heap<SliceSource> {
        Heap::new(SliceSource::new(memory)).unwrap()
    }

    #[test]
    fn parses_every_operation() {
        let ops: Operations = "# a comment\nAlloc(24),\n\nRealloc(0, 100),\nFree(0),\n"
            .parse()
            .unwrap();
        assert_eq!(ops.0, vec![Alloc(24), Realloc(0, 100), Free(0)]);
        assert!("Alloc(x),".parse::<Operation>().is_err());
        assert!("Realloc(1),".parse::<Operation>().is_err());
        assert!("Frob(1),".parse::<Operation>().is_err());
    }

    #[test]
    fn regression_test_0() {
        Operations(vec![Alloc(1)]).run();
    }

    #[test]
    fn regression_test_1() {
        Operations(vec![Alloc(1414), Free(0), Alloc(1414), Free(1)]).run();
    }

    #[test]
    fn regression_test_2() {
        Operations(vec![Alloc(168), Free(0), Alloc(0), Alloc(168), Free(2)]).run();
    }

    #[test]
    fn regression_test_3() {
        Operations(vec![Alloc(13672), Free(0), Alloc(1)]).run();
    }

    #[test]
    fn realloc_of_a_freed_index_is_a_no_op() {
        Operations(vec![Alloc(8), Free(0), Realloc(0, 64), Realloc(7, 64)]).run();
    }

    #[test]
    fn allocate_size_zero() {
        Operations(
            iter::repeat(Alloc(0))
                .take(1000)
                .chain((0..1000).map(Free))
                .collect(),
        )
        .run();
    }

    #[test]
    fn allocate_many_small() {
        Operations(
            iter::repeat(Alloc(16))
                .take(100)
                .chain((0..100).map(Free))
                .chain(iter::repeat(Alloc(96)).take(100))
                .chain((0..100).map(|i| Free(i + 100)))
                .collect(),
        )
        .run();
    }

    #[test]
    fn allocate_many_large() {
        Operations(
            iter::repeat(Alloc(2056))
                .take(100)
                .chain((0..100).map(Free))
                .chain(iter::repeat(Alloc(8192)).take(100))
                .chain((0..100).map(|i| Free(i + 100)))
                .collect(),
        )
        .run();
    }

    #[test]
    fn grow_every_allocation_step_by_step() {
        Operations(
            iter::repeat(Alloc(8))
                .take(50)
                .chain((1..40).flat_map(|step| (0..50).map(move |i| Realloc(i, step * 24))))
                .chain((0..50).map(Free))
                .collect(),
        )
        .run();
    }

    #[test]
    fn reuses_the_block_just_freed() {
        let mut memory = vec![0u8; 1 << 16];
        let mut heap = heap(&mut memory);

        let a = heap.allocate(24).unwrap();
        let _b = heap.allocate(24).unwrap();
        let arena = heap.stats().arena_bytes;
        unsafe { heap.free(a) };

        assert_eq!(heap.allocate(16), Ok(a));
        assert_eq!(heap.stats().arena_bytes, arena);
    }

    #[test]
    fn realloc_into_free_successor_keeps_the_pointer() {
        let mut memory = vec![0u8; 1 << 16];
        let mut heap = heap(&mut memory);

        let a = heap.allocate(24).unwrap();
        let b = heap.allocate(80).unwrap();
        let _c = heap.allocate(24).unwrap();
        unsafe {
            heap.free(b);
            ptr::write_bytes(a.as_ptr(), 0xee, 24);
            let grown = heap.reallocate(a, 100).unwrap().unwrap();
            assert_eq!(grown, a);
            check_pattern(grown, 24, 0xee, 0);
        }
        assert_eq!(heap.validate(), Ok(()));
    }

    #[test]
    fn fragmentation_is_bounded_for_a_fixed_working_set() {
        const SIZES: [usize; 8] = [24, 500, 40, 3000, 16, 1200, 96, 97];
        const WINDOW: usize = 32;

        let mut memory = vec![0u8; 16 << 20];
        let mut heap = heap(&mut memory);
        let mut live = std::collections::VecDeque::new();
        let mut peak_allocated = 0;
        let mut arena_after_warm_up = 0;

        for step in 0..20_000 {
            live.push_back(heap.allocate(SIZES[step % SIZES.len()]).unwrap());
            if live.len() > WINDOW {
                let oldest = live.pop_front().unwrap();
                unsafe { heap.free(oldest) };
            }

            let stats = heap.stats();
            peak_allocated = cmp::max(peak_allocated, stats.allocated_bytes);
            if step == 1_000 {
                arena_after_warm_up = stats.arena_bytes;
            }
        }

        let arena = heap.stats().arena_bytes;
        assert!(
            arena <= 2 * arena_after_warm_up,
            "heap kept growing: {} bytes after warm up, {} at the end",
            arena_after_warm_up,
            arena
        );
        assert!(
            arena <= 8 * peak_allocated + HeapConfig::DEFAULT.chunk_size() as usize,
            "{} bytes of heap for at most {} live bytes",
            arena,
            peak_allocated
        );
        assert_eq!(heap.validate(), Ok(()));
    }

    #[test]
    fn small_configs_still_work() {
        let mut memory = vec![0u8; 1 << 20];
        let config = HeapConfig::DEFAULT
            .with_chunk_size(16)
            .with_realloc_chunk(16)
            .with_large_threshold(0);
        let mut heap = Heap::with_config(SliceSource::new(&mut memory), config).unwrap();
        Operations(
            (0..200)
                .map(|i| Alloc(i * 3))
                .chain((0..200).step_by(2).map(|i| Realloc(i, 300)))
                .chain((0..200).map(Free))
                .collect(),
        )
        .run_on_heap(&mut heap);
        assert_eq!(heap.stats().allocated_blocks, 0);
        assert_eq!(heap.stats().free_blocks, 1);
    }

    #[test]
    fn exhausted_heap_reports_errors_and_recovers() {
        let mut memory = vec![0u8; 64 << 10];
        let mut heap = heap(&mut memory);
        Operations(
            iter::repeat(Alloc(4000))
                .take(40)
                .chain((0..40).map(Free))
                .chain(iter::once(Alloc(30_000)))
                .collect(),
        )
        .run_on_heap(&mut heap);
    }

    // Adopted from
    // https://github.com/alexcrichton/dlmalloc-rs/blob/master/tests/smoke.rs
    #[test]
    fn smoke() {
        unsafe {
            let layout = Layout::new::<u8>();
            let ptr = SEG.alloc(layout);
            assert!(!ptr.is_null());
            *ptr = 9;
            assert_eq!(*ptr, 9);
            SEG.dealloc(ptr, layout);

            let ptr = SEG.alloc(layout);
            assert!(!ptr.is_null());
            *ptr = 10;
            assert_eq!(*ptr, 10);
            SEG.dealloc(ptr, layout);
        }
    }

    // This takes too long with our extra assertion checks enabled, and the
    // fixed-sized static array backend can only be taken once per process.
    #[test]
    #[cfg(not(any(feature = "extra_assertions", feature = "static_array_backend")))]
    fn stress() {
        static SEG: SegAlloc = SegAlloc::INIT;
        let mut rng = SmallRng::seed_from_u64(0x5e9a_11c0);
        let mut ptrs: Vec<(*mut u8, Layout)> = Vec::new();
        unsafe {
            for _ in 0..50_000 {
                let free = !ptrs.is_empty()
                    && ((ptrs.len() < 1_000 && rng.gen_ratio(1, 3)) || rng.gen());
                if free {
                    let idx = rng.gen_range(0..ptrs.len());
                    let (ptr, layout) = ptrs.swap_remove(idx);
                    SEG.dealloc(ptr, layout);
                    continue;
                }

                if !ptrs.is_empty() && rng.gen_ratio(1, 100) {
                    let idx = rng.gen_range(0..ptrs.len());
                    let (ptr, old) = ptrs.swap_remove(idx);
                    let new_size = if rng.gen() {
                        rng.gen_range(old.size()..old.size() * 2 + 1)
                    } else if old.size() > 10 {
                        rng.gen_range(old.size() / 2..old.size())
                    } else {
                        ptrs.push((ptr, old));
                        continue;
                    };
                    let kept = slice::from_raw_parts(ptr, cmp::min(old.size(), new_size)).to_vec();
                    let moved = SEG.realloc(ptr, old, new_size);
                    assert!(!moved.is_null());
                    assert_eq!(slice::from_raw_parts(moved, kept.len()), &kept[..]);
                    ptrs.push((moved, Layout::from_size_align(new_size, old.align()).unwrap()));
                }

                let size = if rng.gen() {
                    rng.gen_range(1..128)
                } else {
                    rng.gen_range(1..128 * 1024)
                };
                let align = 1 << rng.gen_range(0..8);
                let layout = Layout::from_size_align(size, align).unwrap();

                let zero = rng.gen_ratio(1, 50);
                let ptr = if zero {
                    SEG.alloc_zeroed(layout)
                } else {
                    SEG.alloc(layout)
                };
                assert!(!ptr.is_null());
                if zero {
                    assert!(slice::from_raw_parts(ptr, size).iter().all(|b| *b == 0));
                }
                ptr::write_bytes(ptr, 0xce, size);
                ptrs.push((ptr, layout));
            }

            for (ptr, layout) in ptrs {
                SEG.dealloc(ptr, layout);
            }
        }
        assert_eq!(SEG.validate(), Ok(()));
        assert_eq!(SEG.stats().allocated_blocks, 0);
    }
}
