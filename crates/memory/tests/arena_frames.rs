//! Frame arena reuse across resets and checkpoints

use hive_memory::MemoryError;
use hive_memory::allocator::{Allocator, ArenaAllocator};

/// (size, align) pattern of a typical frame
const FRAME: &[(usize, usize)] = &[(24, 8), (3, 1), (64, 64), (12, 4), (0, 16), (100, 32)];

fn run_frame(arena: &ArenaAllocator) -> Vec<usize> {
    FRAME
        .iter()
        .map(|&(size, align)| arena.allocate_bytes(size, align).unwrap().as_ptr() as usize)
        .collect()
}

#[test]
fn test_reset_makes_frames_repeatable() {
    let arena = ArenaAllocator::new("frame", 4096).unwrap();

    let first = run_frame(&arena);
    let used_after_first = arena.used_memory();
    assert!(used_after_first >= FRAME.iter().map(|(s, _)| s).sum::<usize>());

    for _ in 0..3 {
        unsafe { arena.reset() };
        assert_eq!(arena.used_memory(), 0);

        assert_eq!(run_frame(&arena), first);
        assert_eq!(arena.used_memory(), used_after_first);
    }

    assert_eq!(arena.generation(), 3);
    assert_eq!(arena.peak_usage(), used_after_first);
    assert_eq!(arena.stats().reset_count, 3);
}

#[test]
fn test_addresses_are_aligned_and_disjoint() {
    let arena = ArenaAllocator::new("frame", 4096).unwrap();
    let addresses = run_frame(&arena);

    let mut spans: Vec<(usize, usize)> = addresses
        .iter()
        .zip(FRAME)
        .map(|(&addr, &(size, align))| {
            assert_eq!(addr % align, 0);
            (addr, addr + size.max(1))
        })
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0);
    }
}

#[test]
fn test_exhaustion_does_not_move_offset() {
    let arena = ArenaAllocator::new("small", 64).unwrap();
    arena.allocate_bytes(48, 8).unwrap();

    let err = arena.allocate_bytes(32, 8).unwrap_err();
    assert!(matches!(
        err,
        MemoryError::OutOfCapacity {
            requested: 32,
            available: 16,
            ..
        }
    ));
    assert_eq!(arena.used(), 48);
    assert_eq!(arena.stats().failed_allocations, 1);

    // what remains is still usable
    arena.allocate_bytes(16, 8).unwrap();
    assert_eq!(arena.remaining(), 0);
}

#[test]
fn test_checkpoint_scopes_temporary_work() {
    let arena = ArenaAllocator::new("frame", 1024).unwrap();
    arena.allocate_bytes(100, 8).unwrap();

    let mark = arena.checkpoint();
    for _ in 0..4 {
        arena.allocate_bytes(64, 16).unwrap();
    }
    assert!(arena.used() > 100 + 4 * 64 - 1);

    unsafe { arena.restore(mark).unwrap() };
    assert_eq!(arena.used(), mark.offset());

    unsafe { arena.reset() };
    let stale = unsafe { arena.restore(mark) }.unwrap_err();
    assert!(matches!(stale, MemoryError::InvalidCheckpoint { .. }));
}

#[test]
fn test_individual_frees_are_noops() {
    let arena = ArenaAllocator::new("frame", 256).unwrap();
    let ptr = arena.allocate_bytes(32, 8).unwrap();
    let layout = std::alloc::Layout::from_size_align(32, 8).unwrap();

    unsafe { arena.deallocate(ptr, layout).unwrap() };
    assert_eq!(arena.used(), 32);

    let mut local = 0u8;
    let foreign = std::ptr::NonNull::from(&mut local);
    let err = unsafe { arena.deallocate(foreign, layout) }.unwrap_err();
    assert!(matches!(err, MemoryError::ForeignOrDoubleFree { .. }));
}
