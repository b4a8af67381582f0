//! Allocator fast-path benchmarks
//!
//! Compares the frame arena, pools (plain, tracked, shared) and the system
//! allocator on single and per-frame batch workloads.

use std::alloc::Layout;
use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use hive_memory::allocator::{
    Allocator, ArenaAllocator, PoolAllocator, SharedAllocator, SystemAllocator, TrackingAllocator,
};
use hive_memory::hierarchy::{AllocatorHierarchy, HierarchyConfig};

fn layout_64() -> Layout {
    Layout::from_size_align(64, 8).unwrap()
}

/// One allocate + release cycle
fn bench_single_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_allocation");
    let layout = layout_64();

    group.bench_function("arena_64b", |b| {
        let arena = ArenaAllocator::new("frame", 1024 * 1024).unwrap();
        b.iter(|| {
            let ptr = arena.allocate(layout).unwrap();
            black_box(ptr);
            unsafe { arena.reset() };
        });
    });

    group.bench_function("pool_64b", |b| {
        let pool = PoolAllocator::new("entities", 64, 8, 1024).unwrap();
        b.iter(|| unsafe {
            let ptr = pool.allocate(layout).unwrap();
            pool.deallocate(ptr.cast(), layout).unwrap();
            black_box(ptr);
        });
    });

    group.bench_function("tracked_pool_64b", |b| {
        let pool = TrackingAllocator::new(PoolAllocator::new("entities", 64, 8, 1024).unwrap());
        b.iter(|| unsafe {
            let ptr = pool.allocate(layout).unwrap();
            pool.deallocate(ptr.cast(), layout).unwrap();
            black_box(ptr);
        });
    });

    group.bench_function("shared_pool_64b", |b| {
        let pool = SharedAllocator::new(PoolAllocator::new("entities", 64, 8, 1024).unwrap());
        b.iter(|| unsafe {
            let ptr = pool.allocate(layout).unwrap();
            pool.deallocate(ptr.cast(), layout).unwrap();
            black_box(ptr);
        });
    });

    group.bench_function("system_64b", |b| {
        let system = SystemAllocator::new("system");
        b.iter(|| unsafe {
            let ptr = system.allocate(layout).unwrap();
            system.deallocate(ptr.cast(), layout).unwrap();
            black_box(ptr);
        });
    });

    group.finish();
}

/// A frame's worth of allocations, then bulk release
fn bench_frame_batches(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_batch");
    let layout = layout_64();

    for count in [16usize, 128, 1024] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("arena", count), &count, |b, &count| {
            let arena = ArenaAllocator::new("frame", 1024 * 1024).unwrap();
            b.iter(|| {
                for _ in 0..count {
                    black_box(arena.allocate(layout).unwrap());
                }
                unsafe { arena.reset() };
            });
        });

        group.bench_with_input(BenchmarkId::new("pool", count), &count, |b, &count| {
            let pool = PoolAllocator::new("entities", 64, 8, 1024).unwrap();
            let mut ptrs = Vec::with_capacity(count);
            b.iter(|| {
                for _ in 0..count {
                    ptrs.push(pool.allocate(layout).unwrap());
                }
                for ptr in ptrs.drain(..) {
                    unsafe { pool.deallocate(ptr.cast(), layout).unwrap() };
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("system", count), &count, |b, &count| {
            let system = SystemAllocator::new("system");
            let mut ptrs = Vec::with_capacity(count);
            b.iter(|| {
                for _ in 0..count {
                    ptrs.push(system.allocate(layout).unwrap());
                }
                for ptr in ptrs.drain(..) {
                    unsafe { system.deallocate(ptr.cast(), layout).unwrap() };
                }
            });
        });
    }

    group.finish();
}

/// Cost of going through the hierarchy's state check and name lookup
fn bench_hierarchy_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("hierarchy_dispatch");
    let layout = layout_64();

    let mut hierarchy = AllocatorHierarchy::new();
    hierarchy
        .configure(
            HierarchyConfig::new("global")
                .with_root_tracking(false)
                .with_pool("entities", 64, 8, 1024)
                .tracked(false),
        )
        .unwrap();
    hierarchy.initialize().unwrap();

    group.bench_function("by_name", |b| {
        b.iter(|| unsafe {
            let ptr = hierarchy.allocate("entities", layout).unwrap();
            hierarchy.deallocate("entities", ptr.cast(), layout).unwrap();
            black_box(ptr);
        });
    });

    group.bench_function("handle", |b| {
        let entities = hierarchy.handle("entities").unwrap();
        b.iter(|| unsafe {
            let ptr = entities.allocate(layout).unwrap();
            entities.deallocate(ptr.cast(), layout).unwrap();
            black_box(ptr);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_single_allocation,
    bench_frame_batches,
    bench_hierarchy_dispatch
);
criterion_main!(benches);
