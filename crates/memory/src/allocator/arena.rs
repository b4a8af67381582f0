//! Arena (frame) allocator
//!
//! A bump allocator over one fixed buffer. Allocation rounds the current
//! offset up to the requested alignment and advances it by the request size;
//! individual frees are no-ops. The only recycling path is [`reset`], which
//! rewinds the offset to zero in O(1), typically once per simulation frame.
//!
//! # Reset precondition
//!
//! A reset (or a [`restore`] to an earlier checkpoint) invalidates every
//! pointer handed out after that point. The arena does not track outstanding
//! pointers and cannot detect use after reset. Callers must not keep
//! pointers across a reset boundary, which is why both operations are
//! `unsafe`.
//!
//! [`reset`]: ArenaAllocator::reset
//! [`restore`]: ArenaAllocator::restore

use core::alloc::Layout;
use core::cell::Cell;
use core::ptr::NonNull;

use super::{AllocatorStats, Allocator, AtomicAllocatorStats, Resettable};
use crate::error::{AllocError, AllocResult};
use crate::hints::{assume_aligned, likely};
use crate::region::{Backing, Region, SystemBuffer};
use crate::utils::checked_align_up;

/// Alignment of buffers the arena allocates for itself
pub const DEFAULT_ARENA_ALIGN: usize = 16;

/// Saved arena position for a later [`ArenaAllocator::restore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaCheckpoint {
    offset: usize,
    generation: u32,
}

impl ArenaCheckpoint {
    /// Offset captured by this checkpoint
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Single-threaded bump allocator
///
/// Not `Sync`: wrap it in [`SharedAllocator`](super::SharedAllocator) to share
/// across threads.
pub struct ArenaAllocator {
    name: String,
    backing: Backing,
    offset: Cell<usize>,
    peak: Cell<usize>,
    generation: Cell<u32>,
    stats: AtomicAllocatorStats,
}

impl ArenaAllocator {
    /// Arena with its own `capacity`-byte buffer
    pub fn new(name: impl Into<String>, capacity: usize) -> AllocResult<Self> {
        Self::with_alignment(name, capacity, DEFAULT_ARENA_ALIGN)
    }

    /// Arena whose own buffer starts at a multiple of `align`
    pub fn with_alignment(
        name: impl Into<String>,
        capacity: usize,
        align: usize,
    ) -> AllocResult<Self> {
        let buffer = SystemBuffer::new(capacity, align)?;
        Ok(Self::from_backing(name.into(), Backing::Owned(buffer)))
    }

    /// Arena over a slab owned by someone else (usually a parent allocator)
    ///
    /// # Safety
    ///
    /// `region` must stay valid, and must not be used by anyone else, until
    /// this arena is dropped.
    pub unsafe fn from_region(name: impl Into<String>, region: Region) -> Self {
        Self::from_backing(name.into(), Backing::Carved(region))
    }

    fn from_backing(name: String, backing: Backing) -> Self {
        Self {
            name,
            backing,
            offset: Cell::new(0),
            peak: Cell::new(0),
            generation: Cell::new(0),
            stats: AtomicAllocatorStats::new(),
        }
    }

    /// Total capacity
    #[inline]
    pub fn capacity(&self) -> usize {
        self.backing.region().len()
    }

    /// Bytes consumed so far, alignment padding included
    #[inline]
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    /// Bytes left before the arena is exhausted
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity() - self.offset.get()
    }

    /// Highest offset reached since construction
    #[inline]
    pub fn peak_usage(&self) -> usize {
        self.peak.get()
    }

    /// Number of resets performed
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.get()
    }

    /// Whether `ptr` points into this arena's buffer
    #[inline]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.backing.region().contains_addr(ptr.as_ptr() as usize)
    }

    /// Whether the buffer was carved from a parent
    #[inline]
    pub fn is_carved(&self) -> bool {
        self.backing.is_carved()
    }

    /// Capture the current position
    #[must_use = "a checkpoint is only useful if it is later restored"]
    pub fn checkpoint(&self) -> ArenaCheckpoint {
        ArenaCheckpoint {
            offset: self.offset.get(),
            generation: self.generation.get(),
        }
    }

    /// Rewind to `checkpoint`, releasing everything allocated after it
    ///
    /// Checkpoints taken before the last reset, or ahead of the current
    /// position, are rejected with `InvalidCheckpoint`.
    ///
    /// # Safety
    ///
    /// Pointers allocated after `checkpoint` become dangling.
    pub unsafe fn restore(&self, checkpoint: ArenaCheckpoint) -> AllocResult<()> {
        if checkpoint.generation != self.generation.get() {
            return Err(AllocError::invalid_checkpoint(
                &self.name,
                "checkpoint predates the last reset",
            ));
        }

        let current = self.offset.get();
        if checkpoint.offset > current {
            return Err(AllocError::invalid_checkpoint(
                &self.name,
                "checkpoint is ahead of the current offset",
            ));
        }

        self.stats.record_rewind(current - checkpoint.offset);
        self.offset.set(checkpoint.offset);
        Ok(())
    }

    /// Rewind to an empty arena in O(1)
    ///
    /// # Safety
    ///
    /// Every pointer previously returned by this arena becomes dangling.
    pub unsafe fn reset(&self) {
        self.offset.set(0);
        self.generation.set(self.generation.get().wrapping_add(1));
        self.stats.record_reset();
    }

    fn try_bump(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        let region = self.backing.region();
        let size = layout.size().max(1);
        let offset = self.offset.get();
        let current = region.start_addr() + offset;

        let aligned = checked_align_up(current, layout.align())
            .ok_or_else(|| AllocError::size_overflow("arena align"))?;
        let end = aligned
            .checked_add(size)
            .ok_or_else(|| AllocError::size_overflow("arena bump"))?;

        if likely(end <= region.end_addr()) {
            let new_offset = end - region.start_addr();
            self.offset.set(new_offset);
            if new_offset > self.peak.get() {
                self.peak.set(new_offset);
            }
            self.stats.record_allocation(end - current);

            let ptr = region
                .ptr_at(aligned - region.start_addr())
                .ok_or_else(|| AllocError::corruption(&self.name, "bump outside buffer"))?;
            let ptr = assume_aligned(ptr.as_ptr(), layout.align());
            // SAFETY: ptr was derived from a NonNull base plus an in-bounds offset
            return Ok(unsafe { NonNull::new_unchecked(ptr) });
        }

        Err(AllocError::out_of_capacity(
            &self.name,
            layout.size(),
            region.len() - offset,
        ))
    }
}

// SAFETY: Bump allocation within a bounded buffer.
// - every returned range lies in [offset_before, offset_after) of the buffer
// - offsets only grow between resets, so live ranges never overlap
// - alignment is applied to the absolute address, not the offset
unsafe impl Allocator for ArenaAllocator {
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        match self.try_bump(layout) {
            Ok(ptr) => Ok(NonNull::slice_from_raw_parts(ptr, layout.size())),
            Err(err) => {
                self.stats.record_allocation_failure();
                Err(err)
            }
        }
    }

    /// Individual frees are no-ops; memory comes back through `reset`.
    /// Pointers from outside the buffer are still rejected.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) -> AllocResult<()> {
        if self.contains(ptr) {
            Ok(())
        } else {
            Err(AllocError::foreign_free(&self.name, ptr.as_ptr() as usize))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn used_memory(&self) -> usize {
        self.used()
    }

    fn total_memory(&self) -> Option<usize> {
        Some(self.capacity())
    }

    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}

impl Resettable for ArenaAllocator {
    unsafe fn reset(&self) {
        // SAFETY: Same precondition, forwarded to the caller
        unsafe { ArenaAllocator::reset(self) }
    }
}

// SAFETY: The arena exclusively owns (or exclusively borrows, for carved
// slabs) its buffer; moving it between threads moves that access with it.
// Cell keeps it !Sync.
unsafe impl Send for ArenaAllocator {}

impl core::fmt::Debug for ArenaAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("used", &self.used())
            .field("generation", &self.generation())
            .field("carved", &self.is_carved())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align).unwrap()
    }

    #[test]
    fn test_bump_respects_alignment() {
        let arena = ArenaAllocator::new("frame", 256).unwrap();

        let a = arena.allocate(layout(3, 1)).unwrap().cast::<u8>();
        let b = arena.allocate(layout(8, 8)).unwrap().cast::<u8>();

        assert_eq!(b.as_ptr() as usize % 8, 0);
        assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 3);
        // 3 bytes + 5 padding + 8 bytes
        assert_eq!(arena.used(), 16);
    }

    #[test]
    fn test_exhaustion_reports_capacity() {
        let arena = ArenaAllocator::new("frame", 32).unwrap();
        arena.allocate(layout(24, 8)).unwrap();

        let err = arena.allocate(layout(16, 8)).unwrap_err();
        assert_eq!(err, AllocError::out_of_capacity("frame", 16, 8));
        assert!(err.is_retryable());
        assert_eq!(arena.used(), 24, "failed bump must not move the offset");
        assert_eq!(arena.stats().failed_allocations, 1);
    }

    #[test]
    fn test_exact_fit() {
        let arena = ArenaAllocator::new("frame", 64).unwrap();
        arena.allocate(layout(64, 16)).unwrap();
        assert_eq!(arena.remaining(), 0);
        assert!(arena.allocate(layout(1, 1)).is_err());
    }

    #[test]
    fn test_zero_sized_requests_get_unique_addresses() {
        let arena = ArenaAllocator::new("frame", 16).unwrap();
        let a = arena.allocate(layout(0, 1)).unwrap().cast::<u8>();
        let b = arena.allocate(layout(0, 1)).unwrap().cast::<u8>();
        assert_ne!(a, b);
    }

    #[test]
    fn test_reset_rewinds_and_bumps_generation() {
        let arena = ArenaAllocator::new("frame", 128).unwrap();
        let first = arena.allocate(layout(40, 8)).unwrap().cast::<u8>();
        arena.allocate(layout(40, 8)).unwrap();

        unsafe { arena.reset() };
        assert_eq!(arena.used(), 0);
        assert_eq!(arena.generation(), 1);
        assert_eq!(arena.peak_usage(), 80);

        let again = arena.allocate(layout(40, 8)).unwrap().cast::<u8>();
        assert_eq!(first, again);
        assert_eq!(arena.stats().reset_count, 1);
    }

    #[test]
    fn test_checkpoint_restore() {
        let arena = ArenaAllocator::new("frame", 128).unwrap();
        arena.allocate(layout(16, 8)).unwrap();
        let mark = arena.checkpoint();
        let scratch = arena.allocate(layout(32, 8)).unwrap().cast::<u8>();

        unsafe { arena.restore(mark).unwrap() };
        assert_eq!(arena.used(), mark.offset());
        assert_eq!(arena.stats().allocated_bytes, 16);

        let reused = arena.allocate(layout(32, 8)).unwrap().cast::<u8>();
        assert_eq!(scratch, reused);
    }

    #[test]
    fn test_restore_rejects_stale_checkpoint() {
        let arena = ArenaAllocator::new("frame", 128).unwrap();
        arena.allocate(layout(16, 8)).unwrap();
        let mark = arena.checkpoint();

        unsafe {
            arena.reset();
            let err = arena.restore(mark).unwrap_err();
            assert!(matches!(err, AllocError::InvalidCheckpoint { .. }));
        }
    }

    #[test]
    fn test_restore_rejects_future_checkpoint() {
        let arena = ArenaAllocator::new("frame", 128).unwrap();
        arena.allocate(layout(32, 8)).unwrap();
        let ahead = arena.checkpoint();
        unsafe {
            arena.reset();
            arena.generation.set(ahead.generation);
            assert!(arena.restore(ahead).is_err());
        }
    }

    #[test]
    fn test_deallocate_is_noop_for_own_pointers() {
        let arena = ArenaAllocator::new("frame", 64).unwrap();
        let ptr = arena.allocate(layout(8, 8)).unwrap().cast::<u8>();
        unsafe { arena.deallocate(ptr, layout(8, 8)).unwrap() };
        assert_eq!(arena.used(), 8);

        let mut outside = 0u64;
        let foreign = NonNull::from(&mut outside).cast::<u8>();
        let err = unsafe { arena.deallocate(foreign, layout(8, 8)) }.unwrap_err();
        assert!(matches!(err, AllocError::ForeignOrDoubleFree { .. }));
    }

    #[test]
    fn test_carved_region() {
        let buffer = SystemBuffer::new(64, 64).unwrap();
        let arena = unsafe { ArenaAllocator::from_region("child", buffer.region()) };
        assert!(arena.is_carved());

        let ptr = arena.allocate(layout(64, 64)).unwrap().cast::<u8>();
        assert_eq!(ptr, buffer.region().base());
        drop(arena);
        // buffer still owns the memory after the arena is gone
        assert_eq!(buffer.region().len(), 64);
    }
}
