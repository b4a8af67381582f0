//! Mutual-exclusion wrapper for cross-thread allocator use
//!
//! The base allocators are single-threaded to keep per-frame arenas free of
//! locking cost. When a pool or tracking wrapper has to be shared between
//! workers, wrap it here: every call takes a `parking_lot` mutex.

use core::alloc::Layout;
use core::ptr::NonNull;

use parking_lot::{Mutex, MutexGuard};

use super::{AllocatorStats, Allocator, Resettable, ThreadSafeAllocator};
use crate::error::AllocResult;

/// Any `Send` allocator made `Sync` behind a mutex
///
/// # Examples
/// ```rust
/// use std::sync::Arc;
/// use hive_memory::allocator::{Allocator, PoolAllocator, SharedAllocator};
///
/// let pool = Arc::new(SharedAllocator::new(PoolAllocator::new("jobs", 64, 8, 16)?));
/// let worker = {
///     let pool = Arc::clone(&pool);
///     std::thread::spawn(move || pool.allocate_bytes(64, 8).map(|p| p.as_ptr() as usize))
/// };
/// assert!(worker.join().unwrap().is_ok());
/// assert_eq!(pool.used_memory(), 64);
/// # Ok::<(), hive_memory::MemoryError>(())
/// ```
pub struct SharedAllocator<A: Allocator + Send> {
    name: String,
    inner: Mutex<A>,
}

impl<A: Allocator + Send> SharedAllocator<A> {
    pub fn new(inner: A) -> Self {
        Self {
            name: inner.name().to_string(),
            inner: Mutex::new(inner),
        }
    }

    /// Hold the lock across several operations
    pub fn lock(&self) -> MutexGuard<'_, A> {
        self.inner.lock()
    }

    /// Run `f` with exclusive access to the inner allocator
    pub fn with<R>(&self, f: impl FnOnce(&A) -> R) -> R {
        f(&self.inner.lock())
    }

    pub fn into_inner(self) -> A {
        self.inner.into_inner()
    }
}

// SAFETY: Every call is forwarded under the mutex, so the inner allocator
// sees a serialized stream of operations exactly as if single-threaded.
unsafe impl<A: Allocator + Send> Allocator for SharedAllocator<A> {
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        self.inner.lock().allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> AllocResult<()> {
        // SAFETY: Same contract as A::deallocate
        unsafe { self.inner.lock().deallocate(ptr, layout) }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn used_memory(&self) -> usize {
        self.inner.lock().used_memory()
    }

    fn total_memory(&self) -> Option<usize> {
        self.inner.lock().total_memory()
    }

    fn stats(&self) -> AllocatorStats {
        self.inner.lock().stats()
    }
}

// SAFETY: Mutex<A> with A: Send is Sync; all access goes through it.
unsafe impl<A: Allocator + Send> ThreadSafeAllocator for SharedAllocator<A> {}

impl<A: Allocator + Resettable + Send> Resettable for SharedAllocator<A> {
    unsafe fn reset(&self) {
        // SAFETY: Same contract as A::reset; the lock keeps other threads
        // from allocating mid-reset.
        unsafe { self.inner.lock().reset() }
    }
}

impl<A: Allocator + Send> core::fmt::Debug for SharedAllocator<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedAllocator")
            .field("name", &self.name)
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}
