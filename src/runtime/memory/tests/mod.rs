//! Memory 单元测试
//!
//! Arena allocation, coalescing and watermark behaviour.

use crate::runtime::memory::{size_class, AllocError, AllocKind, Arena, MIN_BLOCK_SIZE};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[cfg(test)]
mod arena_tests {
    use super::*;

    #[test]
    fn test_size_classes() {
        assert_eq!(size_class(0), MIN_BLOCK_SIZE);
        assert_eq!(size_class(8), 16);
        assert_eq!(size_class(9), 32);
        assert_eq!(size_class(100), 128);
        assert_eq!(size_class(1016), 1024);
        assert_eq!(size_class(1017), 2048);
        assert_eq!(size_class(3000), 3072);
    }

    #[test]
    fn test_arena_new() {
        let arena = Arena::with_capacity(4096);
        assert_eq!(arena.capacity(), 4096);
        assert_eq!(arena.used(), 0);
        let stats = arena.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.largest_free, 4096);
        assert_eq!(stats.fragmentation, 0.0);
    }

    #[test]
    fn test_alloc_and_free() {
        let mut arena = Arena::with_capacity(4096);
        let a = arena.alloc(40, AllocKind::Value).unwrap();
        assert_eq!(a.size(), 64);
        assert_eq!(a.payload_size(), 56);
        assert_eq!(arena.used(), 64);
        assert_eq!(arena.stats().value_bytes, 64);

        arena.free(a).unwrap();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.stats().free_blocks, 1);
    }

    #[test]
    fn test_double_free_is_rejected() {
        let mut arena = Arena::with_capacity(1024);
        let a = arena.alloc(16, AllocKind::Raw).unwrap();
        arena.free(a).unwrap();
        assert_eq!(arena.free(a), Err(AllocError::InvalidFree(a.offset())));
    }

    #[test]
    fn test_out_of_memory() {
        let mut arena = Arena::with_capacity(256);
        let _a = arena.alloc(200, AllocKind::Value).unwrap();
        let err = arena.alloc(200, AllocKind::Value).unwrap_err();
        assert!(matches!(err, AllocError::OutOfMemory { requested: 200, .. }));
        assert_eq!(arena.stats().failures, 1);
    }

    #[test]
    fn test_huge_request_is_out_of_memory() {
        assert_eq!(size_class(usize::MAX - 4), usize::MAX);
        let mut arena = Arena::with_capacity(1024);
        let err = arena.alloc(usize::MAX / 2, AllocKind::Value).unwrap_err();
        assert!(matches!(err, AllocError::OutOfMemory { .. }));
        let a = arena.alloc(16, AllocKind::Value).unwrap();
        assert!(arena.realloc(a, usize::MAX - 1).is_err());
        assert_eq!(arena.used(), a.size());
    }

    #[test]
    fn test_coalescing_restores_single_block() {
        let mut arena = Arena::with_capacity(4096);
        let a = arena.alloc(100, AllocKind::Value).unwrap();
        let b = arena.alloc(100, AllocKind::Value).unwrap();
        let c = arena.alloc(100, AllocKind::Value).unwrap();

        arena.free(b).unwrap();
        assert_eq!(arena.stats().free_blocks, 2);
        arena.free(a).unwrap();
        assert_eq!(arena.stats().free_blocks, 2);
        arena.free(c).unwrap();
        assert_eq!(arena.stats().free_blocks, 1);
        assert_eq!(arena.largest_free(), 4096);
    }

    #[test]
    fn test_fragmentation_ratio() {
        let mut arena = Arena::with_capacity(1024);
        let blocks: Vec<_> = (0..8)
            .map(|_| arena.alloc(100, AllocKind::Value).unwrap())
            .collect();
        for block in blocks.iter().step_by(2) {
            arena.free(*block).unwrap();
        }
        let stats = arena.stats();
        assert_eq!(stats.free_blocks, 4);
        assert!((stats.fragmentation - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_realloc_in_place_and_move() {
        let mut arena = Arena::with_capacity(4096);
        let a = arena.alloc(20, AllocKind::Value).unwrap();
        arena.payload_mut(a)[0] = 0xAB;

        // next block free: grows in place
        let a = arena.realloc(a, 100).unwrap();
        assert_eq!(a.offset(), 0);
        assert_eq!(a.size(), 128);

        let b = arena.alloc(20, AllocKind::Value).unwrap();
        // neighbour taken: must move and keep the payload
        let moved = arena.realloc(a, 500).unwrap();
        assert_ne!(moved.offset(), 0);
        assert_eq!(arena.payload(moved)[0], 0xAB);

        let shrunk = arena.realloc(moved, 10).unwrap();
        assert_eq!(shrunk.size(), 32);
        arena.free(shrunk).unwrap();
        arena.free(b).unwrap();
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.stats().free_blocks, 1);
    }

    #[test]
    fn test_peak_and_valley() {
        let mut arena = Arena::with_capacity(2048);
        let a = arena.alloc(500, AllocKind::Raw).unwrap();
        let b = arena.alloc(200, AllocKind::Value).unwrap();
        arena.free(a).unwrap();
        arena.free(b).unwrap();
        let stats = arena.stats();
        assert_eq!(stats.peak_used, 512 + 256);
        assert_eq!(stats.min_free, 2048 - 768);
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.frees, 2);
        assert_eq!(stats.raw_bytes, 0);
    }

    #[test]
    fn test_randomized_round_trip_watermark() {
        let mut rng = StdRng::seed_from_u64(0x7262);
        let mut arena = Arena::with_capacity(64 * 1024);
        let mut live = Vec::new();

        for _ in 0..10_000 {
            // background churn so the free list is not trivially one block
            if rng.random_bool(0.3) && live.len() < 64 {
                if let Ok(block) = arena.alloc(rng.random_range(1..600), AllocKind::Value) {
                    live.push(block);
                }
            } else if rng.random_bool(0.2) && !live.is_empty() {
                let idx = rng.random_range(0..live.len());
                arena.free(live.swap_remove(idx)).unwrap();
            }

            let before = arena.watermark();
            let size = rng.random_range(1..3000);
            let kind = if rng.random_bool(0.5) {
                AllocKind::Value
            } else {
                AllocKind::Raw
            };
            if let Ok(block) = arena.alloc(size, kind) {
                arena.free(block).unwrap();
            }
            assert_eq!(arena.watermark(), before);
        }

        for block in live.drain(..) {
            arena.free(block).unwrap();
        }
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.stats().free_blocks, 1);
    }
}

#[cfg(test)]
mod arena_proptests {
    use super::*;

    proptest! {
        #[test]
        fn freeing_everything_restores_the_arena(
            sizes in proptest::collection::vec(1usize..2000, 1..40),
            order in proptest::collection::vec(any::<usize>(), 40),
        ) {
            let mut arena = Arena::with_capacity(32 * 1024);
            let initial = arena.watermark();
            let mut live: Vec<_> = sizes
                .iter()
                .filter_map(|&s| arena.alloc(s, AllocKind::Value).ok())
                .collect();
            for pick in order {
                if live.is_empty() {
                    break;
                }
                let idx = pick % live.len();
                arena.free(live.swap_remove(idx)).unwrap();
            }
            for block in live {
                arena.free(block).unwrap();
            }
            prop_assert_eq!(arena.watermark(), initial);
        }
    }
}
