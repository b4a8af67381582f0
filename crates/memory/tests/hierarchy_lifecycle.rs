//! Allocator hierarchy lifecycle from the outside

use std::alloc::Layout;
use std::ops::Range;

use hive_memory::MemoryError;
use hive_memory::allocator::{Allocator, TypedAllocator};
use hive_memory::hierarchy::{
    AllocatorHierarchy, AllocatorStrategy, ChildConfig, HierarchyConfig, LifecycleState,
};
use pretty_assertions::assert_eq;

fn layout() -> Layout {
    Layout::new::<[u64; 4]>()
}

fn config() -> HierarchyConfig {
    HierarchyConfig::new("global")
        .with_root_limit(1 << 20)
        .with_arena("frame", 16 * 1024)
        .with_child(ChildConfig::arena("scratch", 4096).parent("frame"))
        .with_pool("entities", 32, 8, 64)
        .tracked(true)
        .with_system("assets", Some(1 << 16))
}

#[test]
fn test_requests_fail_before_initialize() {
    let mut hierarchy = AllocatorHierarchy::new();
    assert!(hierarchy.allocate("global", layout()).is_err());

    hierarchy.configure(config()).unwrap();
    for name in ["global", "frame", "scratch", "entities", "assets"] {
        let err = hierarchy.allocate(name, layout()).unwrap_err();
        assert!(
            matches!(err, MemoryError::HierarchyMisuse { .. }),
            "{name}: {err}"
        );
    }
    assert_eq!(hierarchy.usage_report(), vec![]);
}

#[test]
fn test_requests_fail_after_shutdown() {
    let mut hierarchy = AllocatorHierarchy::new();
    hierarchy.configure(config()).unwrap();
    hierarchy.initialize().unwrap();

    hierarchy.shutdown();
    for name in ["global", "frame", "entities"] {
        assert!(hierarchy.allocate(name, layout()).is_err());
        assert!(hierarchy.handle(name).is_err());
    }
    assert!(hierarchy.configure(config()).is_err());
    assert!(hierarchy.initialize().is_err());
}

#[test]
fn test_shutdown_twice_is_harmless() {
    let mut hierarchy = AllocatorHierarchy::new();
    hierarchy.configure(config()).unwrap();
    hierarchy.initialize().unwrap();

    let first = hierarchy.shutdown();
    assert_eq!(first.usage.len(), 5);
    let second = hierarchy.shutdown();
    assert!(second.is_clean());
    assert!(second.usage.is_empty());
    assert_eq!(hierarchy.state(), LifecycleState::Shutdown);
}

#[test]
fn test_shutdown_without_initialize() {
    let mut hierarchy = AllocatorHierarchy::new();
    assert!(hierarchy.shutdown().is_clean());
    assert_eq!(hierarchy.state(), LifecycleState::Shutdown);

    let mut configured = AllocatorHierarchy::new();
    configured.configure(config()).unwrap();
    assert!(configured.shutdown().is_clean());
}

#[test]
fn test_failed_initialize_can_be_retried() {
    let mut hierarchy = AllocatorHierarchy::new();
    hierarchy
        .configure(
            HierarchyConfig::new("global")
                .with_root_limit(8 * 1024)
                .with_arena("frame", 4096)
                .with_pool("entities", 64, 8, 128),
        )
        .unwrap();

    assert!(hierarchy.initialize().is_err());
    assert_eq!(hierarchy.state(), LifecycleState::Configured);

    hierarchy
        .configure(
            HierarchyConfig::new("global")
                .with_root_limit(8 * 1024)
                .with_arena("frame", 4096)
                .with_pool("entities", 64, 8, 32),
        )
        .unwrap();
    hierarchy.initialize().unwrap();
    assert_eq!(hierarchy.usage_report()[0].used, 4096 + 64 * 32);
}

#[test]
fn test_siblings_never_alias() {
    let mut hierarchy = AllocatorHierarchy::new();
    hierarchy.configure(config()).unwrap();
    hierarchy.initialize().unwrap();

    let carved = |name: &str| hierarchy.carved_range(name).unwrap().unwrap();
    let disjoint = |a: &Range<usize>, b: &Range<usize>| a.end <= b.start || b.end <= a.start;

    let frame = carved("frame");
    let scratch = carved("scratch");
    let entities = carved("entities");

    // root children
    assert!(disjoint(&frame, &entities));
    // scratch lives inside its parent, so it only has to avoid frame's siblings
    assert!(frame.start <= scratch.start && scratch.end <= frame.end);
    assert!(disjoint(&scratch, &entities));
    assert_eq!(hierarchy.carved_range("assets").unwrap(), None);

    let from_frame = hierarchy
        .handle("frame")
        .unwrap()
        .allocate_bytes(1024, 8)
        .unwrap()
        .as_ptr() as usize;
    let from_frame = from_frame..from_frame + 1024;
    assert!(frame.start <= from_frame.start && from_frame.end <= frame.end);
    assert!(disjoint(&from_frame, &scratch));

    let from_scratch = hierarchy
        .handle("scratch")
        .unwrap()
        .allocate_bytes(256, 8)
        .unwrap()
        .as_ptr() as usize;
    assert!(scratch.contains(&from_scratch));
    assert!(!from_frame.contains(&from_scratch));

    let from_pool = hierarchy
        .handle("entities")
        .unwrap()
        .allocate_bytes(32, 8)
        .unwrap()
        .as_ptr() as usize;
    assert!(entities.contains(&from_pool));
}

#[test]
fn test_handles_construct_through_the_hierarchy() {
    struct Transform {
        position: [f32; 3],
        scale: f32,
    }

    let mut hierarchy = AllocatorHierarchy::new();
    hierarchy.configure(config()).unwrap();
    hierarchy.initialize().unwrap();

    {
        let entities = hierarchy.handle("entities").unwrap();
        let guard = entities
            .construct_guarded(Transform {
                position: [1.0, 2.0, 3.0],
                scale: 1.0,
            })
            .unwrap();
        assert_eq!(guard.position[2], 3.0);
        assert_eq!(guard.scale, 1.0);
        assert_eq!(entities.used_memory(), 16);
    }

    let report = hierarchy.shutdown();
    assert!(report.is_clean());
    let entities = report.usage.iter().find(|u| u.name == "entities").unwrap();
    assert_eq!(entities.used, 0);
    assert_eq!(entities.stats.allocation_count, 1);
}

#[test]
fn test_json_config_drives_hierarchy() {
    let json = r#"{
        "root": { "name": "global", "limit": 65536, "tracked": false },
        "children": [
            { "name": "frame", "strategy": { "kind": "arena", "capacity": 8192 } },
            { "name": "particles", "parent": "global",
              "strategy": { "kind": "pool", "block_size": 48, "block_align": 16, "block_count": 64 } }
        ]
    }"#;

    let config = HierarchyConfig::from_json(json).unwrap();
    assert_eq!(
        config.child("particles").unwrap().strategy,
        AllocatorStrategy::Pool {
            block_size: 48,
            block_align: 16,
            block_count: 64
        }
    );

    let mut hierarchy = AllocatorHierarchy::new();
    hierarchy.configure(config).unwrap();
    hierarchy.initialize().unwrap();

    let particles = hierarchy.handle("particles").unwrap();
    assert_eq!(particles.kind(), "pool");
    assert_eq!(particles.total_memory(), Some(48 * 64));

fn aborting(tracked: bool) -> AllocatorHierarchy {
    let mut hierarchy = AllocatorHierarchy::new();
    hierarchy
        .configure(
            HierarchyConfig::new("global")
                .with_abort_on_corruption(true)
                .with_pool("entities", 32, 8, 4)
                .tracked(tracked),
        )
        .unwrap();
    hierarchy.initialize().unwrap();
    hierarchy
}

#[test]
#[should_panic(expected = "aborting on memory corruption")]
fn test_abort_policy_reaches_untracked_pool() {
    let hierarchy = aborting(false);
    let block = hierarchy.allocate("entities", layout()).unwrap().cast::<u8>();
    unsafe {
        let inside = std::ptr::NonNull::new_unchecked(block.as_ptr().add(8));
        let _ = hierarchy.deallocate("entities", inside, layout());
    }
}

#[test]
#[should_panic(expected = "aborting on memory corruption")]
fn test_abort_policy_reaches_tracking_wrapper() {
    let hierarchy = aborting(true);
    let block = hierarchy.allocate("entities", layout()).unwrap().cast::<u8>();
    unsafe {
        hierarchy.deallocate("entities", block, layout()).unwrap();
        let _ = hierarchy.deallocate("entities", block, layout());
    }
}
}
