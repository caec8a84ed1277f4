use mapheap::{
    allocate, attach, check, detach, initialize, inspect, reallocate, release, resolve, status, Address, ArenaConfig,
    ArenaId, BlockKind, HeapRegion, ObjectDirectory, Provenance,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

const BLOCK: usize = 4096;

#[derive(Debug, Clone)]
enum Operation {
    Allocate(usize),
    Release(usize),
    Reallocate(usize, usize),
}

fn size_strategy() -> impl Strategy<Value = usize> {
    prop_oneof![
        4 => 0usize..=2048,
        2 => 2049usize..=6 * BLOCK,
        1 => 6 * BLOCK..=40 * BLOCK,
    ]
}

fn fresh_arena(config: ArenaConfig) -> ArenaId {
    let arena = attach(HeapRegion::new(64 << 20).unwrap(), ObjectDirectory::default(), config);
    initialize(arena, Provenance::New).unwrap();
    arena
}

fn span(address: Address) -> (usize, usize) {
    let len = match inspect(address).unwrap().kind {
        BlockKind::Fragment { size, .. } => size,
        BlockKind::Large { blocks, .. } => blocks * BLOCK,
        other => panic!("live allocation at {address} reported as {other:?}"),
    };
    (address.offset(), address.offset() + len)
}

fn tag(address: Address, value: u8) {
    unsafe { *address.as_ptr() = value };
}

fn read_tag(address: Address) -> u8 {
    unsafe { *address.as_ptr() }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_workload_keeps_arena_consistent(
        small_table in any::<bool>(),
        ops in proptest::collection::vec(
            prop_oneof![
                3 => size_strategy().prop_map(Operation::Allocate),
                2 => any::<usize>().prop_map(Operation::Release),
                1 => (any::<usize>(), size_strategy()).prop_map(|(i, s)| Operation::Reallocate(i, s)),
            ],
            1..120
        )
    ) {
        let config = if small_table {
            ArenaConfig { initial_extent: 64 << 10, ..Default::default() }
        } else {
            ArenaConfig::default()
        };
        let arena = fresh_arena(config);
        let mut live: Vec<(Address, u8)> = Vec::new();
        let mut mapped = status(arena).unwrap().mapped_len;
        let mut next_tag = 0u8;

        for op in ops {
            match op {
                Operation::Allocate(size) => {
                    let address = allocate(arena, size, None).unwrap();
                    next_tag = next_tag.wrapping_add(1);
                    tag(address, next_tag);
                    live.push((address, next_tag));

                    let now = status(arena).unwrap().mapped_len;
                    prop_assert!(now >= mapped, "mapping shrank from {} to {}", mapped, now);
                    mapped = now;
                }
                Operation::Release(index) if !live.is_empty() => {
                    let (address, _) = live.swap_remove(index % live.len());
                    release(address).unwrap();
                }
                Operation::Reallocate(index, size) if !live.is_empty() => {
                    let slot = index % live.len();
                    let (address, value) = live[slot];
                    let moved = reallocate(address, size).unwrap();
                    prop_assert_eq!(read_tag(moved), value);
                    live[slot] = (moved, value);
                    mapped = status(arena).unwrap().mapped_len;
                }
                _ => {}
            }
            let status = status(arena).unwrap();
            prop_assert_eq!(status.usage.total_bytes() as usize, (status.heap_limit - 1) * BLOCK);
            check(arena).unwrap();
        }

        // No two live allocations overlap, and none was overwritten.
        let mut spans: Vec<(usize, usize)> = live.iter().map(|&(address, _)| span(address)).collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
        for &(address, value) in &live {
            prop_assert_eq!(read_tag(address), value);
        }

        // Every block of a large allocation leads back to its head.
        for &(address, _) in &live {
            if let BlockKind::Large { head, blocks } = inspect(address).unwrap().kind {
                for i in 0..blocks {
                    let inner = resolve(arena, address.as_ptr().wrapping_add(i * BLOCK)).unwrap();
                    prop_assert_eq!(inspect(inner).unwrap().kind, BlockKind::Large { head, blocks });
                }
            }
        }

        for (address, _) in live {
            release(address).unwrap();
        }
        let report = check(arena).unwrap();
        prop_assert!(report.fragments.is_empty());
        // Only the parameter block and the current Block Table remain.
        let status = status(arena).unwrap();
        let table_blocks = (status.table_capacity * 32).div_ceil(BLOCK);
        prop_assert_eq!(report.usage.chunks_used, 2);
        prop_assert_eq!(report.usage.bytes_used as usize, (1 + table_blocks) * BLOCK);
        detach(arena).unwrap();
    }

    #[test]
    fn fragment_cycles_restore_the_split_state(
        (log, order) in (4u32..=11)
            .prop_flat_map(|log| (Just(log), 1..(BLOCK >> log)))
            .prop_flat_map(|(log, k)| (Just(log), Just((0..k).collect::<Vec<usize>>()).prop_shuffle()))
    ) {
        let arena = fresh_arena(ArenaConfig::default());
        let count = BLOCK >> log;

        let first = allocate(arena, 1 << log, None).unwrap();
        let split = check(arena).unwrap();
        prop_assert_eq!(split.fragments.clone(), vec![(log, count - 1)]);

        let taken: Vec<Address> = order.iter().map(|_| allocate(arena, 1 << log, None).unwrap()).collect();
        let offsets: BTreeSet<usize> = taken.iter().map(Address::offset).collect();
        for &i in &order {
            release(taken[i]).unwrap();
        }

        prop_assert_eq!(check(arena).unwrap(), split);
        prop_assert_eq!(
            inspect(first).unwrap().kind,
            BlockKind::Fragment { log, size: 1 << log, free_in_block: count - 1 }
        );

        let again: BTreeSet<usize> = order.iter().map(|_| allocate(arena, 1 << log, None).unwrap().offset()).collect();
        prop_assert_eq!(again, offsets);
        detach(arena).unwrap();
    }
}
