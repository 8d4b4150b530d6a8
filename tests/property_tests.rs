//! Randomised operation sequences checked against the layout properties

mod common;

use std::sync::Arc;

use chunkalloc::memory::{AllocationHandle, AllocatorConfig, FitStrategy, TailReclaim};
use common::{all_strategies, Fixture};
use proptest::prelude::*;

const CHUNK_SIZE: u64 = 4096;

#[derive(Debug, Clone)]
enum Op {
    Allocate(u64),
    AllocateStatic(u64),
    Free(usize),
    Swap(usize, usize),
    Defragment(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (1u64..=6000).prop_map(Op::Allocate),
        1 => (1u64..=512).prop_map(Op::AllocateStatic),
        4 => any::<usize>().prop_map(Op::Free),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Swap(a, b)),
        1 => (0usize..4).prop_map(Op::Defragment),
    ]
}

fn fixture(strategy_idx: usize, release_all: bool) -> Fixture {
    let strategy: Arc<dyn FitStrategy> = all_strategies().swap_remove(strategy_idx % 3);
    let policy = if release_all {
        TailReclaim::ReleaseAll
    } else {
        TailReclaim::KeepLastEmpty
    };
    Fixture::new(
        strategy,
        AllocatorConfig::new()
            .with_chunk_size(CHUNK_SIZE)
            .with_tail_reclaim(policy),
    )
}

fn run(fixture: &Fixture, ops: &[Op]) -> Result<(), TestCaseError> {
    let alloc = &fixture.allocator;
    let mut live: Vec<(AllocationHandle, u64)> = Vec::new();

    for op in ops {
        match *op {
            Op::Allocate(size) => {
                let h = alloc.allocate(size).unwrap();
                live.push((h, size));
            }
            Op::AllocateStatic(size) => {
                let h = alloc.allocate_static(size).unwrap();
                live.push((h, size));
            }
            Op::Free(i) if !live.is_empty() => {
                let (h, _) = live.swap_remove(i % live.len());
                alloc.deallocate(h).unwrap();
            }
            Op::Swap(i, j) if !live.is_empty() => {
                let (a, sa) = live[i % live.len()];
                let (b, sb) = live[j % live.len()];
                let before = (alloc.location(a).unwrap(), alloc.location(b).unwrap());
                let result = alloc.swap(a, b);
                if sa == sb {
                    result.unwrap();
                    alloc.swap(a, b).unwrap();
                    let after = (alloc.location(a).unwrap(), alloc.location(b).unwrap());
                    prop_assert_eq!(before, after);
                } else {
                    prop_assert!(result.is_err());
                }
            }
            Op::Defragment(n) => {
                let before = alloc.collect_stats();
                let moves = alloc.defragment(n).unwrap();
                prop_assert!(moves.len() <= n);
                prop_assert_eq!(before.used_bytes, alloc.collect_stats().used_bytes);
                for m in &moves {
                    prop_assert_eq!(m.from.size, m.to.size);
                }
            }
            _ => {}
        }

        prop_assert!(alloc.check_invariants().is_ok(), "{:?}", alloc.check_invariants());
        let stats = alloc.collect_stats();
        prop_assert_eq!(stats.used_bytes + stats.total_free_bytes, stats.total_bytes);
        prop_assert_eq!(stats.used_bytes, live.iter().map(|(_, s)| s).sum::<u64>());
        prop_assert_eq!(stats.allocation_count, live.len());
    }

    for (h, _) in live.drain(..) {
        alloc.deallocate(h).unwrap();
    }
    prop_assert!(alloc.chunk_count() <= 1);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_random_sequences_keep_layout_valid(
        strategy_idx in 0usize..3,
        release_all in any::<bool>(),
        ops in prop::collection::vec(op_strategy(), 1..120),
    ) {
        let fixture = fixture(strategy_idx, release_all);
        run(&fixture, &ops)?;
        fixture.assert_consistent();
    }

    #[test]
    fn prop_allocate_then_free_restores_shape(
        strategy_idx in 0usize..3,
        setup in prop::collection::vec(1u64..=2000, 1..40),
        frees in prop::collection::vec(any::<usize>(), 0..20),
        request in 1u64..=3000,
    ) {
        let fixture = fixture(strategy_idx, false);
        let alloc = &fixture.allocator;

        let mut live: Vec<_> = setup.iter().map(|&s| alloc.allocate(s).unwrap()).collect();
        for i in frees {
            if live.is_empty() {
                break;
            }
            let h = live.swap_remove(i % live.len());
            alloc.deallocate(h).unwrap();
        }

        let before = alloc.snapshot();
        let h = alloc.allocate(request).unwrap();
        let grew = alloc.chunk_count() != before.chunks.len();
        alloc.deallocate(h).unwrap();

        // growth leaves a fresh empty chunk behind the live ones
        if !grew {
            prop_assert_eq!(alloc.snapshot(), before);
        }
    }

    #[test]
    fn prop_freed_neighbours_always_coalesce(
        sizes in prop::collection::vec(1u64..=300, 2..30),
        order in prop::collection::vec(any::<usize>(), 0..30),
    ) {
        let fixture = Fixture::first_fit(CHUNK_SIZE);
        let alloc = &fixture.allocator;
        let mut live: Vec<_> = sizes.iter().map(|&s| alloc.allocate(s).unwrap()).collect();

        for i in order {
            if live.is_empty() {
                break;
            }
            let h = live.swap_remove(i % live.len());
            alloc.deallocate(h).unwrap();

            for chunk in alloc.snapshot().chunks {
                for pair in chunk.free_ranges.windows(2) {
                    prop_assert!(pair[0].end() < pair[1].offset, "{:?}", pair);
                }
            }
        }
    }
}
