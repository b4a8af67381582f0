//! System allocator implementation
//!
//! Wraps the platform's global allocator. This is the root of every
//! hierarchy and the backend for allocators that should not be carved from a
//! parent (assets, unbounded scratch). An optional byte limit turns it into a
//! budgeted allocator: `used_memory() <= limit` holds at all times.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::alloc::System;

use super::{AllocatorStats, Allocator, AtomicAllocatorStats, ThreadSafeAllocator};
use crate::error::{AllocError, AllocResult};
use crate::hints::unlikely;

/// Wrapper for the system's default allocator
///
/// # Thread Safety
/// The platform allocator is thread-safe and the budget is enforced with an
/// atomic compare-and-swap, so `SystemAllocator` is shareable as is.
#[derive(Debug)]
pub struct SystemAllocator {
    name: String,
    limit: Option<usize>,
    used: AtomicUsize,
    stats: AtomicAllocatorStats,
}

impl SystemAllocator {
    /// Unbounded system allocator
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            limit: None,
            used: AtomicUsize::new(0),
            stats: AtomicAllocatorStats::new(),
        }
    }

    /// System allocator that refuses to exceed `limit` live bytes
    pub fn with_limit(name: impl Into<String>, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new(name)
        }
    }

    /// Configured byte budget, if any
    #[inline]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Charge `size` bytes against the budget
    fn reserve(&self, size: usize) -> AllocResult<()> {
        let Some(limit) = self.limit else {
            self.used.fetch_add(size, Ordering::Relaxed);
            return Ok(());
        };

        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(size).filter(|&next| next <= limit)
            })
            .map(|_| ())
            .map_err(|used| {
                AllocError::out_of_capacity(&self.name, size, limit.saturating_sub(used))
            })
    }

    /// Zero-sized requests still get a real, unique address
    #[inline]
    fn backing_layout(layout: Layout) -> Layout {
        if layout.size() == 0 {
            // SAFETY: align came from a valid Layout and size 1 cannot
            // overflow isize once rounded up to it.
            unsafe { Layout::from_size_align_unchecked(1, layout.align()) }
        } else {
            layout
        }
    }
}

impl Default for SystemAllocator {
    fn default() -> Self {
        Self::new("system")
    }
}

// SAFETY: Memory comes straight from std::alloc::System.
// - System honours the requested alignment
// - each successful call returns a distinct, non-overlapping block
// - `used` is only charged after the budget check succeeds
unsafe impl Allocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if let Err(err) = self.reserve(layout.size()) {
            self.stats.record_allocation_failure();
            return Err(err);
        }

        // SAFETY: backing_layout never has a zero size
        let raw = unsafe { System.alloc(Self::backing_layout(layout)) };
        let Some(ptr) = NonNull::new(raw) else {
            self.used.fetch_sub(layout.size(), Ordering::Relaxed);
            self.stats.record_allocation_failure();
            return Err(AllocError::out_of_capacity(&self.name, layout.size(), 0));
        };

        self.stats.record_allocation(layout.size());
        Ok(NonNull::slice_from_raw_parts(ptr, layout.size()))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> AllocResult<()> {
        if unlikely(self.used.load(Ordering::Acquire) < layout.size()) {
            return Err(AllocError::corruption(
                &self.name,
                format!(
                    "release of {} bytes exceeds {} live bytes",
                    layout.size(),
                    self.used.load(Ordering::Relaxed)
                ),
            ));
        }

        // SAFETY: ptr came from System.alloc with the same backing layout
        // (caller contract on layout).
        unsafe { System.dealloc(ptr.as_ptr(), Self::backing_layout(layout)) };
        self.used.fetch_sub(layout.size(), Ordering::AcqRel);
        self.stats.record_deallocation(layout.size());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn used_memory(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    fn total_memory(&self) -> Option<usize> {
        self.limit
    }

    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}

// SAFETY: System is thread-safe and the budget counter is atomic.
unsafe impl ThreadSafeAllocator for SystemAllocator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_allocator_basic() {
        let allocator = SystemAllocator::default();
        let layout = Layout::from_size_align(64, 8).unwrap();

        let ptr = allocator.allocate(layout).unwrap();
        assert_eq!(ptr.len(), 64);
        assert_eq!(ptr.as_ptr().cast::<u8>() as usize % 8, 0);
        assert_eq!(allocator.used_memory(), 64);

        unsafe {
            ptr.cast::<u8>().as_ptr().write_bytes(0xAB, 64);
            allocator.deallocate(ptr.cast(), layout).unwrap();
        }
        assert_eq!(allocator.used_memory(), 0);
        assert_eq!(allocator.total_memory(), None);
    }

    #[test]
    fn test_zero_sized_addresses_are_unique() {
        let allocator = SystemAllocator::default();
        let layout = Layout::from_size_align(0, 4).unwrap();

        let a = allocator.allocate(layout).unwrap().cast::<u8>();
        let b = allocator.allocate(layout).unwrap().cast::<u8>();
        assert_ne!(a, b);
        assert_eq!(allocator.used_memory(), 0);

        unsafe {
            allocator.deallocate(a, layout).unwrap();
            allocator.deallocate(b, layout).unwrap();
        }
    }

    #[test]
    fn test_limit_enforced() {
        let allocator = SystemAllocator::with_limit("assets", 100);
        let layout = Layout::from_size_align(60, 8).unwrap();

        let first = allocator.allocate(layout).unwrap();
        let err = allocator.allocate(layout).unwrap_err();
        assert_eq!(
            err,
            AllocError::OutOfCapacity {
                allocator: "assets".into(),
                requested: 60,
                available: 40,
            }
        );
        assert_eq!(allocator.used_memory(), 60);
        assert_eq!(allocator.stats().failed_allocations, 1);

        unsafe { allocator.deallocate(first.cast(), layout).unwrap() };
        assert!(allocator.allocate(layout).is_ok_and(|ptr| {
            unsafe { allocator.deallocate(ptr.cast(), layout).unwrap() };
            true
        }));
    }

    #[test]
    fn test_over_release_is_rejected() {
        let allocator = SystemAllocator::default();
        let small = Layout::from_size_align(8, 8).unwrap();
        let big = Layout::from_size_align(64, 8).unwrap();
        let ptr = allocator.allocate(small).unwrap();

        let err = unsafe { allocator.deallocate(ptr.cast(), big) }.unwrap_err();
        assert!(err.is_corruption());

        unsafe { allocator.deallocate(ptr.cast(), small).unwrap() };
    }
}
