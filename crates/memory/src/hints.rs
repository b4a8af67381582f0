//! Branch and optimizer hints for allocator fast paths
//!
//! Stable Rust has no `likely`/`unlikely` intrinsics, so the cold-path trick
//! is used instead: calling a `#[cold]` function on one side of a branch
//! steers code layout the same way.

#[cold]
#[inline(never)]
fn cold_path() {}

/// Hint that `condition` is usually true
#[inline(always)]
pub fn likely(condition: bool) -> bool {
    if !condition {
        cold_path();
    }
    condition
}

/// Hint that `condition` is usually false
#[inline(always)]
pub fn unlikely(condition: bool) -> bool {
    if condition {
        cold_path();
    }
    condition
}

/// Return `ptr` unchanged, asserting in debug builds that it is aligned to `align`
///
/// `align` must be a power of two.
#[inline(always)]
pub fn assume_aligned(ptr: *mut u8, align: usize) -> *mut u8 {
    debug_assert!(align.is_power_of_two());
    debug_assert_eq!(ptr as usize & (align - 1), 0, "pointer {ptr:p} not aligned to {align}");
    ptr
}

/// Keep `value` observable so benchmarks cannot elide the work producing it
#[inline(always)]
pub fn do_not_optimize<T>(value: T) -> T {
    core::hint::black_box(value)
}
