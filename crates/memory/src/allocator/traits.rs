//! Allocator traits
//!
//! The capability contract every allocator in the hierarchy implements:
//! - `Allocator`: raw allocation/deallocation, usage, identity
//! - `TypedAllocator`: placement construct/destroy on top of `Allocator`
//! - `Resettable`: bulk release for arenas and pools
//! - `ThreadSafeAllocator`: marker for allocators usable from many threads
//!
//! # Safety
//!
//! `Allocator` is an unsafe trait because callers write through the pointers
//! it returns. Implementors must guarantee:
//! - returned pointers are aligned to `layout.align()`
//! - `[ptr, ptr + layout.size())` is valid for reads and writes
//! - no two live allocations from the same instance overlap
//!
//! Failures are always reported as `Err`. No allocator in this crate panics
//! or aborts on exhaustion, bad alignment, or a rejected free.

use core::alloc::Layout;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

use super::AllocatorStats;
use crate::error::{AllocError, AllocResult};

/// Build a layout from a raw `(size, align)` pair
///
/// Non-power-of-two alignments map to `InvalidAlignment`; sizes that would
/// overflow `isize` once padded map to `SizeOverflow`.
#[inline]
pub fn layout_from_size_align(size: usize, align: usize) -> AllocResult<Layout> {
    if !align.is_power_of_two() {
        return Err(AllocError::invalid_alignment(align));
    }
    Layout::from_size_align(size, align).map_err(|_| AllocError::size_overflow("layout"))
}

/// Polymorphic allocator contract
///
/// Object safe: the hierarchy stores allocators as `Box<dyn Allocator>`
/// style trait objects and dispatches through the vtable.
///
/// # Safety
///
/// See the module docs. In addition, `used_memory()` must never exceed
/// `total_memory()` when the latter is `Some`, and must return to its
/// previous value after a matching `deallocate`.
pub unsafe trait Allocator {
    /// Reserve memory for `layout`
    ///
    /// The returned slice is at least `layout.size()` bytes long and starts
    /// at an address that is a multiple of `layout.align()`. The memory is
    /// uninitialized. Zero-sized requests still receive a unique address.
    ///
    /// # Errors
    /// - `OutOfCapacity` when the backing storage is exhausted
    /// - `InvalidAlignment` / `UnsupportedLayout` when the allocator cannot
    ///   serve this shape of request
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>>;

    /// Release a block previously returned by [`Allocator::allocate`]
    ///
    /// # Safety
    /// - `ptr` must not be used after this call
    /// - `layout` must match the layout used to allocate `ptr`
    ///
    /// Allocators that can detect a foreign or repeated free report it as
    /// `ForeignOrDoubleFree` / `Corruption` and leave their state untouched.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> AllocResult<()>;

    /// Stable human-readable identity for diagnostics
    fn name(&self) -> &str;

    /// Bytes currently charged to live allocations
    fn used_memory(&self) -> usize;

    /// Total capacity in bytes, `None` for unbounded allocators
    fn total_memory(&self) -> Option<usize>;

    /// Snapshot of the allocation counters
    fn stats(&self) -> AllocatorStats;

    /// Bytes still available, `None` for unbounded allocators
    #[inline]
    fn available_memory(&self) -> Option<usize> {
        self.total_memory()
            .map(|total| total.saturating_sub(self.used_memory()))
    }

    /// Raw `(size, alignment)` entry point
    ///
    /// # Examples
    /// ```rust
    /// use hive_memory::allocator::{Allocator, ArenaAllocator};
    ///
    /// let arena = ArenaAllocator::new("scratch", 1024)?;
    /// let ptr = arena.allocate_bytes(24, 16)?;
    /// assert_eq!(ptr.as_ptr() as usize % 16, 0);
    /// assert!(arena.allocate_bytes(8, 3).is_err());
    /// # Ok::<(), hive_memory::MemoryError>(())
    /// ```
    #[inline]
    fn allocate_bytes(&self, size: usize, align: usize) -> AllocResult<NonNull<u8>> {
        let layout = layout_from_size_align(size, align)?;
        self.allocate(layout).map(NonNull::cast)
    }
}

/// Bulk release of every allocation at once
pub trait Resettable {
    /// Release everything allocated so far
    ///
    /// # Safety
    ///
    /// Every pointer previously handed out becomes dangling. Caller must
    /// ensure none of them is dereferenced (or deallocated) afterwards.
    unsafe fn reset(&self);
}

/// Marker for allocators whose operations are safe to call concurrently
///
/// # Safety
///
/// Implementors must serialize or otherwise synchronize every mutation of
/// their bookkeeping.
pub unsafe trait ThreadSafeAllocator: Allocator + Sync + Send {}

/// Typed placement helpers over any [`Allocator`]
///
/// # Examples
/// ```rust
/// use hive_memory::allocator::{PoolAllocator, TypedAllocator};
///
/// let pool = PoolAllocator::for_type::<[u64; 2]>("vectors", 8)?;
/// let ptr = pool.construct([1u64, 2])?;
/// unsafe {
///     assert_eq!(*ptr.as_ptr(), [1, 2]);
///     pool.destroy(ptr.as_ptr())?;
/// }
/// # Ok::<(), hive_memory::MemoryError>(())
/// ```
pub trait TypedAllocator: Allocator {
    /// Allocate storage for `T` and move `value` into it
    ///
    /// On failure nothing is constructed and `value` is dropped normally.
    #[inline]
    fn construct<T>(&self, value: T) -> AllocResult<NonNull<T>> {
        self.construct_with(move || value)
    }

    /// Allocate storage for `T`, then build the value in place with `init`
    ///
    /// `init` only runs once storage has been obtained.
    #[inline]
    fn construct_with<T, F>(&self, init: F) -> AllocResult<NonNull<T>>
    where
        F: FnOnce() -> T,
    {
        let ptr = self.allocate(Layout::new::<T>())?.cast::<T>();
        // SAFETY: Initializing freshly allocated storage.
        // - ptr is valid for writes of size_of::<T>() bytes (allocate contract)
        // - ptr is aligned to align_of::<T>() (requested via Layout::new)
        // - storage is exclusively ours, nothing else observes it yet
        unsafe { ptr.as_ptr().write(init()) };
        Ok(ptr)
    }

    /// Run `T`'s destructor in place, then return the storage
    ///
    /// A null `ptr` is a no-op.
    ///
    /// # Safety
    /// - non-null `ptr` must come from `construct`/`construct_with` on this
    ///   allocator and still hold a live `T`
    /// - `ptr` must not be used afterwards
    #[inline]
    unsafe fn destroy<T>(&self, ptr: *mut T) -> AllocResult<()> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Ok(());
        };
        // SAFETY: Destroying a live T constructed by this allocator.
        // - ptr holds an initialized T (caller contract)
        // - drop runs before the storage is released, never after
        // - Layout::new::<T>() matches the layout used in construct_with
        unsafe {
            core::ptr::drop_in_place(ptr.as_ptr());
            self.deallocate(ptr.cast(), Layout::new::<T>())
        }
    }

    /// Construct `value` and wrap it in a guard that destroys it on drop
    #[inline]
    fn construct_guarded<T>(&self, value: T) -> AllocResult<Constructed<'_, T, Self>> {
        let ptr = self.construct(value)?;
        Ok(Constructed {
            ptr,
            allocator: self,
            _owns: PhantomData,
        })
    }
}

impl<A: Allocator + ?Sized> TypedAllocator for A {}

/// RAII owner of a value constructed in an allocator
///
/// Destroys the value and returns its storage when dropped.
pub struct Constructed<'a, T, A: Allocator + ?Sized> {
    ptr: NonNull<T>,
    allocator: &'a A,
    _owns: PhantomData<T>,
}

impl<'a, T, A: Allocator + ?Sized> Constructed<'a, T, A> {
    /// Raw pointer to the value
    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// Give up ownership without destroying the value
    ///
    /// The caller becomes responsible for calling
    /// [`TypedAllocator::destroy`] on the returned pointer.
    pub fn into_raw(self) -> NonNull<T> {
        let this = ManuallyDrop::new(self);
        this.ptr
    }
}

impl<'a, T, A: Allocator + ?Sized> core::ops::Deref for Constructed<'a, T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: ptr holds a live T until this guard drops
        unsafe { self.ptr.as_ref() }
    }
}

impl<'a, T, A: Allocator + ?Sized> core::ops::DerefMut for Constructed<'a, T, A> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: ptr holds a live T and the guard is borrowed mutably
        unsafe { self.ptr.as_mut() }
    }
}

impl<'a, T, A: Allocator + ?Sized> Drop for Constructed<'a, T, A> {
    fn drop(&mut self) {
        // SAFETY: ptr was produced by construct on self.allocator and is
        // destroyed exactly once, here.
        // Rejections are already reported by the allocator itself.
        let _ = unsafe { self.allocator.destroy(self.ptr.as_ptr()) };
    }
}

impl<'a, T: core::fmt::Debug, A: Allocator + ?Sized> core::fmt::Debug for Constructed<'a, T, A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Constructed").field(&**self).finish()
    }
}

// ============================================================================
// Blanket implementations for references
// ============================================================================

// SAFETY: Forwards every call to the underlying `T: Allocator`; all safety
// contracts are preserved through delegation.
unsafe impl<T: Allocator + ?Sized> Allocator for &T {
    #[inline]
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> AllocResult<()> {
        // SAFETY: Same contract as T::deallocate
        unsafe { (**self).deallocate(ptr, layout) }
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn used_memory(&self) -> usize {
        (**self).used_memory()
    }

    fn total_memory(&self) -> Option<usize> {
        (**self).total_memory()
    }

    fn stats(&self) -> AllocatorStats {
        (**self).stats()
    }
}

impl<T: Resettable + ?Sized> Resettable for &T {
    unsafe fn reset(&self) {
        // SAFETY: Same contract as T::reset
        unsafe { (**self).reset() }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::allocator::{ArenaAllocator, PoolAllocator};

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_layout_from_size_align() {
        assert!(layout_from_size_align(16, 8).is_ok());
        assert_eq!(
            layout_from_size_align(16, 0),
            Err(AllocError::invalid_alignment(0))
        );
        assert_eq!(
            layout_from_size_align(16, 12),
            Err(AllocError::invalid_alignment(12))
        );
        assert!(matches!(
            layout_from_size_align(usize::MAX, 8),
            Err(AllocError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn test_destroy_runs_drop_once() {
        let drops = Rc::new(Cell::new(0));
        let pool = PoolAllocator::for_type::<DropCounter>("counters", 2).unwrap();

        let ptr = pool.construct(DropCounter(Rc::clone(&drops))).unwrap();
        assert_eq!(pool.allocated_blocks(), 1);

        unsafe { pool.destroy(ptr.as_ptr()).unwrap() };
        assert_eq!(drops.get(), 1);
        assert_eq!(pool.allocated_blocks(), 0);
    }

    #[test]
    fn test_destroy_null_is_noop() {
        let arena = ArenaAllocator::new("scratch", 64).unwrap();
        unsafe { arena.destroy::<u64>(core::ptr::null_mut()).unwrap() };
        assert_eq!(arena.used_memory(), 0);
    }

    #[test]
    fn test_construct_with_skips_init_on_failure() {
        let pool = PoolAllocator::for_type::<u32>("tiny", 1).unwrap();
        let _first = pool.construct(1u32).unwrap();

        let ran = Cell::new(false);
        let second = pool.construct_with(|| {
            ran.set(true);
            2u32
        });
        assert!(second.is_err());
        assert!(!ran.get(), "constructor must not run without storage");
    }

    #[test]
    fn test_constructed_guard_destroys_on_drop() {
        let drops = Rc::new(Cell::new(0));
        let pool = PoolAllocator::for_type::<DropCounter>("guarded", 1).unwrap();
        {
            let guard = pool
                .construct_guarded(DropCounter(Rc::clone(&drops)))
                .unwrap();
            assert_eq!(guard.0.get(), 0);
            assert_eq!(pool.free_blocks(), 0);
        }
        assert_eq!(drops.get(), 1);
        assert_eq!(pool.free_blocks(), 1);
    }

    #[test]
    fn test_constructed_into_raw_keeps_value() {
        let pool = PoolAllocator::for_type::<String>("strings", 1).unwrap();
        let raw = pool
            .construct_guarded(String::from("kept"))
            .unwrap()
            .into_raw();
        assert_eq!(pool.allocated_blocks(), 1);
        unsafe {
            assert_eq!(&*raw.as_ptr(), "kept");
            pool.destroy(raw.as_ptr()).unwrap();
        }
    }

    #[test]
    fn test_dyn_dispatch() {
        let arena = ArenaAllocator::new("dyn", 128).unwrap();
        let allocator: &dyn Allocator = &arena;
        let ptr = allocator.construct(7u16).unwrap();
        unsafe { assert_eq!(*ptr.as_ptr(), 7) };
        assert_eq!(allocator.name(), "dyn");
        assert_eq!(allocator.used_memory(), 2);
        assert_eq!(allocator.available_memory(), Some(126));
    }
}
