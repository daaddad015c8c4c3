//! Allocation properties shared by every arena kind.

use proptest::prelude::*;
use sugoi_core::{BlockArena, BlockPool, FixedArena, PoolConfig, StructArena};

fn request() -> impl Strategy<Value = (usize, usize)> {
    (1usize..512, 0u32..7).prop_map(|(size, shift)| (size, 1usize << shift))
}

/// Checks alignment and that no two ranges overlap.
fn assert_disjoint(mut ranges: Vec<(usize, usize)>) {
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(pair[0].0 + pair[0].1 <= pair[1].0, "{pair:?} overlap");
    }
}

proptest! {
    #[test]
    fn fixed_arena_allocations_are_aligned_and_disjoint(requests in prop::collection::vec(request(), 1..64)) {
        let arena = FixedArena::new(16 * 1024).unwrap();
        let mut ranges = Vec::new();
        for (size, align) in requests {
            if let Some(ptr) = arena.allocate(size, align) {
                let addr = ptr.as_ptr() as usize;
                prop_assert_eq!(addr % align, 0);
                ranges.push((addr, size));
            }
        }
        prop_assert!(arena.used() <= arena.capacity());
        assert_disjoint(ranges);
    }

    #[test]
    fn struct_arena_serves_exactly_what_was_recorded(requests in prop::collection::vec(request(), 1..32)) {
        let mut arena = StructArena::new();
        for &(size, align) in &requests {
            prop_assert!(arena.record(size, align).is_some());
        }
        arena.initialize().unwrap();

        let mut ranges = Vec::new();
        for &(size, align) in &requests {
            let ptr = arena.allocate(size, align);
            prop_assert!(ptr.is_some());
            let addr = ptr.unwrap().as_ptr() as usize;
            prop_assert_eq!(addr % align, 0);
            ranges.push((addr, size));
        }
        assert_disjoint(ranges);
    }

    #[test]
    fn block_arena_never_crosses_blocks(requests in prop::collection::vec(request(), 1..128)) {
        let pool = BlockPool::new(PoolConfig::new(1024, 4));
        let mut arena = BlockArena::new(&pool);
        let mut ranges = Vec::new();
        for (size, align) in requests {
            let ptr = arena.allocate(size, align);
            prop_assert!(ptr.is_some());
            let addr = ptr.unwrap().as_ptr() as usize;
            prop_assert_eq!(addr % align, 0);
            ranges.push((addr, size));
        }
        prop_assert_eq!(pool.outstanding(), arena.block_count());
        assert_disjoint(ranges);

        drop(arena);
        prop_assert_eq!(pool.outstanding(), 0);
    }
}
