use mapheap::{
    allocate, attach, check, detach, initialize, inspect, lookup, reallocate, release, resolve, status, usage,
    AllocError, ArenaConfig, ArenaGrowth, ArenaId, BlockKind, GrowError, HeapRegion, ObjectDirectory, Provenance,
};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const BLOCK: usize = 4096;

/// A heap region that records every growth request.
struct CountingRegion {
    inner: HeapRegion,
    grows: Arc<Mutex<Vec<usize>>>,
}

impl ArenaGrowth for CountingRegion {
    fn base(&self) -> NonNull<u8> {
        self.inner.base()
    }

    fn frontier(&self) -> usize {
        self.inner.frontier()
    }

    fn grow(&mut self, additional: usize) -> Result<usize, GrowError> {
        self.grows.lock().unwrap().push(additional);
        self.inner.grow(additional)
    }
}

fn counting_arena() -> (ArenaId, Arc<Mutex<Vec<usize>>>) {
    let grows = Arc::new(Mutex::new(Vec::new()));
    let region = CountingRegion {
        inner: HeapRegion::new(32 << 20).unwrap(),
        grows: Arc::clone(&grows),
    };
    let arena = attach(region, ObjectDirectory::default(), ArenaConfig::default());
    initialize(arena, Provenance::New).unwrap();
    grows.lock().unwrap().clear();
    (arena, grows)
}

#[test]
fn small_named_allocation_splits_one_block() {
    let (arena, _) = counting_arena();

    let x = allocate(arena, 8, Some("x")).unwrap();
    let info = inspect(x).unwrap();
    assert_eq!(
        info.kind,
        BlockKind::Fragment { log: 4, size: 16, free_in_block: 255 }
    );
    assert_eq!(lookup(arena, "x").unwrap(), Some(x));
    // The block taken for the fragment list is not named.
    assert_eq!(status(arena).unwrap().object_count, 2);

    detach(arena).unwrap();
}

#[test]
fn further_small_allocations_reuse_the_fragment_list() {
    let (arena, grows) = counting_arena();

    let x = allocate(arena, 8, Some("x")).unwrap();
    let mapped = status(arena).unwrap().mapped_len;
    let grown = grows.lock().unwrap().len();

    for i in 1..=9 {
        let address = allocate(arena, 8, None).unwrap();
        assert_eq!(address.offset(), x.offset() + 16 * i);
        assert_eq!(inspect(address).unwrap().block, inspect(x).unwrap().block);
    }
    assert_eq!(status(arena).unwrap().mapped_len, mapped);
    assert_eq!(grows.lock().unwrap().len(), grown);
    assert_eq!(
        inspect(x).unwrap().kind,
        BlockKind::Fragment { log: 4, size: 16, free_in_block: 246 }
    );

    detach(arena).unwrap();
}

#[test]
fn large_allocation_grows_exactly_once() {
    let (arena, grows) = counting_arena();
    allocate(arena, 8, Some("x")).unwrap();
    grows.lock().unwrap().clear();
    let mapped = status(arena).unwrap().mapped_len;

    let big = allocate(arena, 8192, Some("big")).unwrap();

    assert_eq!(*grows.lock().unwrap(), vec![8192]);
    assert_eq!(status(arena).unwrap().mapped_len, mapped + 8192);
    let head = inspect(big).unwrap();
    assert_eq!(head.kind, BlockKind::Large { head: head.block, blocks: 2 });

    // The second block resolves to the same head.
    let tail = resolve(arena, big.as_ptr().wrapping_add(BLOCK)).unwrap();
    assert_eq!(inspect(tail).unwrap().kind, head.kind);
    assert_eq!(lookup(arena, "big").unwrap(), Some(big));

    detach(arena).unwrap();
}

#[test]
fn duplicate_name_fails_without_side_effects() {
    let (arena, grows) = counting_arena();
    let x = allocate(arena, 8, Some("x")).unwrap();
    let before = usage(arena).unwrap();
    let grown = grows.lock().unwrap().len();

    let err = allocate(arena, 100, Some("x")).unwrap_err();

    assert!(matches!(err, AllocError::AlreadyExists { ref name, .. } if name == "x"));
    assert_eq!(usage(arena).unwrap(), before);
    assert_eq!(grows.lock().unwrap().len(), grown);
    assert_eq!(lookup(arena, "x").unwrap(), Some(x));

    detach(arena).unwrap();
}

#[test]
fn counters_track_mapped_length_across_growth() {
    let (arena, grows) = counting_arena();

    let mut round = 0;
    while grows.lock().unwrap().len() < 2 || round < 64 {
        let size = if round % 2 == 0 { 2048 } else { 100 };
        allocate(arena, size, None).unwrap();

        let status = status(arena).unwrap();
        let mapped = (status.mapped_len / BLOCK * BLOCK) as u64;
        assert_eq!(status.usage.bytes_used + status.usage.bytes_free, mapped);
        round += 1;
    }
    check(arena).unwrap();

    detach(arena).unwrap();
}

#[test]
fn empty_name_is_treated_as_unnamed() {
    let (arena, _) = counting_arena();

    allocate(arena, 64, Some("")).unwrap();
    allocate(arena, 64, Some("")).unwrap();
    assert_eq!(status(arena).unwrap().object_count, 1);

    detach(arena).unwrap();
}

#[test]
fn zero_size_gets_a_minimum_fragment() {
    let (arena, _) = counting_arena();

    let a = allocate(arena, 0, None).unwrap();
    let b = allocate(arena, 0, None).unwrap();
    assert_eq!(b.offset() - a.offset(), 16);
    release(a).unwrap();
    release(b).unwrap();
    check(arena).unwrap();

    detach(arena).unwrap();
}

#[test]
fn release_drops_name_and_refuses_bookkeeping() {
    let (arena, _) = counting_arena();

    let x = allocate(arena, 5000, Some("x")).unwrap();
    release(x).unwrap();
    assert_eq!(lookup(arena, "x").unwrap(), None);
    assert!(matches!(release(x), Err(AllocError::InvalidAddress { .. })));

    let root = lookup(arena, "__arena__").unwrap().unwrap();
    assert_eq!(root.offset(), 0);
    assert_eq!(inspect(root).unwrap().kind, BlockKind::Bookkeeping);
    assert!(matches!(release(root), Err(AllocError::InvalidAddress { .. })));

    // The name can be used again once its object is gone.
    allocate(arena, 10, Some("x")).unwrap();
    check(arena).unwrap();

    detach(arena).unwrap();
}

#[test]
fn registration_failure_keeps_the_memory() {
    let region = HeapRegion::new(8 << 20).unwrap();
    // One slot, taken by the arena's root object.
    let arena = attach(region, ObjectDirectory::with_capacity(1), ArenaConfig::default());
    initialize(arena, Provenance::New).unwrap();
    let before = usage(arena).unwrap();

    let err = allocate(arena, 8, Some("y")).unwrap_err();
    let AllocError::Registration { address, .. } = &err else {
        panic!("expected a registration failure, got {err:?}");
    };
    let address = *address;
    assert!(usage(arena).unwrap().bytes_used > before.bytes_used);
    assert!(matches!(inspect(address).unwrap().kind, BlockKind::Fragment { log: 4, .. }));
    assert_eq!(lookup(arena, "y").unwrap(), None);
    release(address).unwrap();

    detach(arena).unwrap();
}

#[test]
fn exhausted_region_reports_out_of_space() {
    let region = HeapRegion::new(64 << 10).unwrap();
    let config = ArenaConfig { initial_extent: 64 << 10, ..Default::default() };
    let arena = attach(region, ObjectDirectory::default(), config);
    initialize(arena, Provenance::New).unwrap();

    let err = allocate(arena, 1 << 20, None).unwrap_err();
    assert!(matches!(err, AllocError::OutOfSpace { .. }));
    assert!(!err.is_fatal());
    check(arena).unwrap();

    detach(arena).unwrap();
}

#[test]
fn operations_need_an_initialized_arena() {
    let arena = attach(HeapRegion::new(1 << 20).unwrap(), ObjectDirectory::default(), ArenaConfig::default());
    assert!(matches!(allocate(arena, 8, None), Err(AllocError::Uninitialized(id)) if id == arena));

    detach(arena).unwrap();
    assert!(matches!(allocate(arena, 8, None), Err(AllocError::NotAttached(id)) if id == arena));
}

#[test]
fn oversized_requests_are_refused_untouched() {
    let (arena, grows) = counting_arena();
    let x = allocate(arena, 5000, Some("x")).unwrap();
    let before = status(arena).unwrap();
    grows.lock().unwrap().clear();

    for size in [usize::MAX, usize::MAX - BLOCK + 1] {
        let err = allocate(arena, size, None).unwrap_err();
        assert!(matches!(err, AllocError::TooLarge { .. }), "{size}: {err:?}");
    }
    assert!(matches!(reallocate(x, usize::MAX), Err(AllocError::TooLarge { .. })));

    assert!(grows.lock().unwrap().is_empty());
    assert_eq!(status(arena).unwrap(), before);
    assert_eq!(lookup(arena, "x").unwrap(), Some(x));
    check(arena).unwrap();

    detach(arena).unwrap();
}

/// A heap region whose growth can be switched off, recording what it grants.
struct GatedRegion {
    inner: HeapRegion,
    grows: Arc<Mutex<Vec<usize>>>,
    refuse: Arc<AtomicBool>,
}

impl ArenaGrowth for GatedRegion {
    fn base(&self) -> NonNull<u8> {
        self.inner.base()
    }

    fn frontier(&self) -> usize {
        self.inner.frontier()
    }

    fn grow(&mut self, additional: usize) -> Result<usize, GrowError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GrowError::Os(12));
        }
        self.grows.lock().unwrap().push(additional);
        self.inner.grow(additional)
    }
}

fn gated_arena() -> (ArenaId, Arc<Mutex<Vec<usize>>>, Arc<AtomicBool>) {
    let grows = Arc::new(Mutex::new(Vec::new()));
    let refuse = Arc::new(AtomicBool::new(false));
    let region = GatedRegion {
        inner: HeapRegion::new(8 << 20).unwrap(),
        grows: Arc::clone(&grows),
        refuse: Arc::clone(&refuse),
    };
    // A one-block table for 16 blocks, so the table doubles early.
    let config = ArenaConfig { initial_extent: 64 << 10, ..Default::default() };
    let arena = attach(region, ObjectDirectory::default(), config);
    initialize(arena, Provenance::New).unwrap();
    grows.lock().unwrap().clear();
    (arena, grows, refuse)
}

fn assert_fully_accounted(arena: ArenaId) {
    let status = status(arena).unwrap();
    assert_eq!(status.mapped_len, (status.heap_limit - 1) * BLOCK);
    assert_eq!(status.usage.total_bytes() as usize, status.mapped_len);
    check(arena).unwrap();
}

#[test]
fn failed_growth_leaves_no_partial_state() {
    let (arena, grows, refuse) = gated_arena();
    allocate(arena, 13 * BLOCK, None).unwrap();
    let before = status(arena).unwrap();

    // Four more blocks need the Block Table to double as well.
    refuse.store(true, Ordering::SeqCst);
    let err = allocate(arena, 4 * BLOCK, None).unwrap_err();
    assert!(matches!(err, AllocError::OutOfSpace { .. }));
    assert_eq!(status(arena).unwrap(), before);
    assert_fully_accounted(arena);

    refuse.store(false, Ordering::SeqCst);
    grows.lock().unwrap().clear();
    let big = allocate(arena, 4 * BLOCK, None).unwrap();
    // The region and the doubled table are mapped together.
    assert_eq!(*grows.lock().unwrap(), vec![5 * BLOCK]);
    assert_eq!(inspect(big).unwrap().kind, BlockKind::Large { head: 16, blocks: 4 });
    assert_eq!(status(arena).unwrap().table_capacity, 32);
    assert_fully_accounted(arena);

    detach(arena).unwrap();
}

#[test]
fn trailing_run_is_extended_across_a_table_doubling() {
    let (arena, grows, refuse) = gated_arena();
    allocate(arena, 10 * BLOCK, None).unwrap();
    let spare = allocate(arena, 2 * BLOCK, None).unwrap();
    release(spare).unwrap();
    let before = status(arena).unwrap();

    refuse.store(true, Ordering::SeqCst);
    assert!(matches!(allocate(arena, 4 * BLOCK, None), Err(AllocError::OutOfSpace { .. })));
    assert_eq!(status(arena).unwrap(), before);
    assert_fully_accounted(arena);

    refuse.store(false, Ordering::SeqCst);
    grows.lock().unwrap().clear();
    let big = allocate(arena, 4 * BLOCK, None).unwrap();
    // Two blocks of shortfall plus the one-block doubled table.
    assert_eq!(*grows.lock().unwrap(), vec![3 * BLOCK]);
    assert_eq!(big.offset(), spare.offset());
    assert_eq!(inspect(big).unwrap().kind, BlockKind::Large { head: 13, blocks: 4 });
    assert_fully_accounted(arena);

    detach(arena).unwrap();
}

/// A region that, once skewed, maps a few bytes more than asked.
struct SkewedRegion {
    inner: HeapRegion,
    skew: Arc<AtomicBool>,
}

impl ArenaGrowth for SkewedRegion {
    fn base(&self) -> NonNull<u8> {
        self.inner.base()
    }

    fn frontier(&self) -> usize {
        self.inner.frontier()
    }

    fn grow(&mut self, additional: usize) -> Result<usize, GrowError> {
        let extra = if self.skew.load(Ordering::SeqCst) { 8 } else { 0 };
        self.inner.grow(additional + extra)
    }
}

#[test]
fn misaligned_frontier_is_reported_as_corruption() {
    let skew = Arc::new(AtomicBool::new(false));
    let region = SkewedRegion { inner: HeapRegion::new(8 << 20).unwrap(), skew: Arc::clone(&skew) };
    let arena = attach(region, ObjectDirectory::default(), ArenaConfig::default());
    initialize(arena, Provenance::New).unwrap();

    skew.store(true, Ordering::SeqCst);
    allocate(arena, 3 * BLOCK, None).unwrap();
    let mapped = status(arena).unwrap().mapped_len;

    let err = allocate(arena, 3 * BLOCK, None).unwrap_err();
    assert!(err.is_fatal(), "{err:?}");
    assert_eq!(status(arena).unwrap().mapped_len, mapped);

    detach(arena).unwrap();
}
