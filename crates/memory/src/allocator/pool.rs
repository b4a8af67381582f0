//! Fixed-size block pool allocator
//!
//! One contiguous buffer split into `block_count` equal blocks. Free blocks
//! form a singly linked list threaded through the blocks themselves: the
//! first `usize` of a free block stores the index of the next free block,
//! with `FREE_LIST_END` terminating the list.
//!
//! ```text
//! [Block0][Block1][Block2][Block3]
//!    ↓       ↓               ↓
//!  head → [free] ──────→ [free] → END      (Block2 in use)
//! ```
//!
//! ## Invariants
//!
//! - a block is either on the free list or marked in the in-use bitmap,
//!   never both
//! - the free list only holds indices in `0..block_count`
//! - a deallocation is only linked back in after passing the range,
//!   boundary and in-use checks, so a bad free cannot corrupt the list
//!
//! Reuse is LIFO: the most recently freed block is handed out next.

use core::alloc::Layout;
use core::cell::Cell;
use core::ptr::NonNull;

use super::{AllocatorStats, Allocator, AtomicAllocatorStats, Resettable, surface_corruption};
use crate::error::{AllocError, AllocResult};
use crate::hints::{assume_aligned, likely, unlikely};
use crate::region::{Backing, Region, SystemBuffer};
use crate::utils::{CheckedArithmetic, align_up, checked_align_up, is_aligned};

const FREE_LIST_END: usize = usize::MAX;
const BITS_PER_WORD: usize = u64::BITS as usize;

/// Pool allocator for one size/alignment class
pub struct PoolAllocator {
    name: String,
    backing: Backing,
    block_size: usize,
    block_align: usize,
    block_count: usize,
    free_head: Cell<usize>,
    free_count: Cell<usize>,
    in_use: Box<[Cell<u64>]>,
    abort_on_corruption: bool,
    stats: AtomicAllocatorStats,
}

impl PoolAllocator {
    /// Distance between consecutive blocks
    ///
    /// Every block must be able to hold a free-list link, so the stride is
    /// at least `size_of::<usize>()` before rounding up to `block_align`.
    pub fn block_stride(block_size: usize, block_align: usize) -> AllocResult<usize> {
        if !block_align.is_power_of_two() {
            return Err(AllocError::invalid_alignment(block_align));
        }
        checked_align_up(block_size.max(size_of::<usize>()), block_align)
            .ok_or_else(|| AllocError::size_overflow("pool block stride"))
    }

    /// Bytes of backing storage a pool with these parameters needs
    pub fn required_bytes(
        block_size: usize,
        block_align: usize,
        block_count: usize,
    ) -> AllocResult<usize> {
        Self::block_stride(block_size, block_align)?.try_mul(block_count)
    }

    /// Pool with its own buffer
    ///
    /// # Errors
    /// - `InvalidAlignment` if `block_align` is not a power of two
    /// - `InvalidConfig` if `block_size` or `block_count` is zero
    pub fn new(
        name: impl Into<String>,
        block_size: usize,
        block_align: usize,
        block_count: usize,
    ) -> AllocResult<Self> {
        Self::validate_params(block_size, block_count)?;
        let total = Self::required_bytes(block_size, block_align, block_count)?;
        let buffer = SystemBuffer::new(total, block_align.max(align_of::<usize>()))?;
        Self::build(
            name.into(),
            Backing::Owned(buffer),
            block_size,
            block_align,
            block_count,
        )
    }

    /// Pool sized and aligned for values of type `T`
    pub fn for_type<T>(name: impl Into<String>, block_count: usize) -> AllocResult<Self> {
        let layout = Layout::new::<T>();
        Self::new(name, layout.size().max(1), layout.align(), block_count)
    }

    /// Pool over a slab owned by someone else (usually a parent allocator)
    ///
    /// # Errors
    /// - `InvalidAlignment` if the region does not start on a `block_align`
    ///   boundary
    /// - `OutOfCapacity` if the region is smaller than [`required_bytes`]
    ///
    /// # Safety
    ///
    /// `region` must stay valid, and must not be used by anyone else, until
    /// this pool is dropped.
    ///
    /// [`required_bytes`]: PoolAllocator::required_bytes
    pub unsafe fn from_region(
        name: impl Into<String>,
        region: Region,
        block_size: usize,
        block_align: usize,
        block_count: usize,
    ) -> AllocResult<Self> {
        let name = name.into();
        Self::validate_params(block_size, block_count)?;
        let total = Self::required_bytes(block_size, block_align, block_count)?;

        if !is_aligned(region.start_addr(), block_align) {
            return Err(AllocError::invalid_alignment(block_align));
        }
        if region.len() < total {
            return Err(AllocError::out_of_capacity(&name, total, region.len()));
        }

        Self::build(name, Backing::Carved(region), block_size, block_align, block_count)
    }

    fn validate_params(block_size: usize, block_count: usize) -> AllocResult<()> {
        if block_size == 0 {
            return Err(AllocError::invalid_config("pool block size must be non-zero"));
        }
        if block_count == 0 {
            return Err(AllocError::invalid_config("pool block count must be non-zero"));
        }
        Ok(())
    }

    fn build(
        name: String,
        backing: Backing,
        block_size: usize,
        block_align: usize,
        block_count: usize,
    ) -> AllocResult<Self> {
        let stride = Self::block_stride(block_size, block_align)?;
        let words = align_up(block_count, BITS_PER_WORD) / BITS_PER_WORD;

        let pool = Self {
            name,
            backing,
            block_size: stride,
            block_align,
            block_count,
            free_head: Cell::new(FREE_LIST_END),
            free_count: Cell::new(0),
            in_use: (0..words).map(|_| Cell::new(0)).collect(),
            abort_on_corruption: false,
            stats: AtomicAllocatorStats::new(),
        };
        pool.initialize_free_list();
        Ok(pool)
    }

    /// Panic instead of returning on corruption-class deallocation errors
    pub fn with_abort_on_corruption(mut self, abort: bool) -> Self {
        self.abort_on_corruption = abort;
        self
    }

    /// Size of each block (after rounding to the alignment)
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn block_align(&self) -> usize {
        self.block_align
    }

    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Total capacity in bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.block_size * self.block_count
    }

    #[inline]
    pub fn free_blocks(&self) -> usize {
        self.free_count.get()
    }

    #[inline]
    pub fn allocated_blocks(&self) -> usize {
        self.block_count - self.free_count.get()
    }

    /// No free block left
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head.get() == FREE_LIST_END
    }

    /// Whether `ptr` is the start of one of this pool's blocks
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.block_index(ptr.as_ptr() as usize).is_ok()
    }

    /// Whether the buffer was carved from a parent
    #[inline]
    pub fn is_carved(&self) -> bool {
        self.backing.is_carved()
    }

    /// Put every block back on the free list
    ///
    /// # Safety
    ///
    /// Every pointer previously returned by this pool becomes dangling.
    pub unsafe fn reset(&self) {
        self.initialize_free_list();
        self.stats.record_reset();
    }

    /// Link all blocks in index order so block 0 is handed out first
    fn initialize_free_list(&self) {
        for word in &self.in_use {
            word.set(0);
        }
        for index in 0..self.block_count {
            let next = if index + 1 < self.block_count {
                index + 1
            } else {
                FREE_LIST_END
            };
            self.write_link(index, next);
        }
        self.free_head.set(0);
        self.free_count.set(self.block_count);
    }

    #[inline]
    fn block_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.block_count);
        // SAFETY: index < block_count, so index * block_size < capacity and
        // the offset stays inside the backing region.
        unsafe { self.backing.region().base().as_ptr().add(index * self.block_size) }
    }

    #[inline]
    fn write_link(&self, index: usize, next: usize) {
        // SAFETY: Storing the free-list link in a free block.
        // - block_ptr(index) is in bounds and at least size_of::<usize>() long
        // - the block is free, so nobody else reads or writes it
        // - write_unaligned because block_align may be below align_of::<usize>()
        unsafe { self.block_ptr(index).cast::<usize>().write_unaligned(next) }
    }

    #[inline]
    fn read_link(&self, index: usize) -> usize {
        // SAFETY: index is the free-list head, so its first bytes hold a link
        // written by write_link.
        unsafe { self.block_ptr(index).cast::<usize>().read_unaligned() }
    }

    #[inline]
    fn is_in_use(&self, index: usize) -> bool {
        let word = &self.in_use[index / BITS_PER_WORD];
        word.get() & (1 << (index % BITS_PER_WORD)) != 0
    }

    #[inline]
    fn set_in_use(&self, index: usize, in_use: bool) {
        let word = &self.in_use[index / BITS_PER_WORD];
        let mask = 1u64 << (index % BITS_PER_WORD);
        if in_use {
            word.set(word.get() | mask);
        } else {
            word.set(word.get() & !mask);
        }
    }

    /// Map an address back to its block, rejecting anything else
    fn block_index(&self, addr: usize) -> AllocResult<usize> {
        let region = self.backing.region();
        if unlikely(addr < region.start_addr() || addr >= region.start_addr() + self.capacity()) {
            return Err(AllocError::corruption(
                &self.name,
                format!("address {addr:#x} lies outside the pool"),
            ));
        }

        let offset = addr - region.start_addr();
        if unlikely(offset % self.block_size != 0) {
            return Err(AllocError::corruption(
                &self.name,
                format!("address {addr:#x} is not on a block boundary"),
            ));
        }
        Ok(offset / self.block_size)
    }

    fn check_layout(&self, layout: Layout) -> AllocResult<()> {
        if unlikely(layout.align() > self.block_align) {
            return Err(AllocError::invalid_alignment(layout.align()));
        }
        if unlikely(layout.size() > self.block_size) {
            return Err(AllocError::unsupported_layout(
                &self.name,
                layout,
                self.block_size,
                self.block_align,
            ));
        }
        Ok(())
    }

    fn pop_block(&self) -> Option<usize> {
        let head = self.free_head.get();
        if likely(head != FREE_LIST_END) {
            self.free_head.set(self.read_link(head));
            self.free_count.set(self.free_count.get() - 1);
            self.set_in_use(head, true);
            return Some(head);
        }
        None
    }

    fn push_block(&self, index: usize) {
        self.write_link(index, self.free_head.get());
        self.free_head.set(index);
        self.free_count.set(self.free_count.get() + 1);
        self.set_in_use(index, false);
    }
}

// SAFETY: Blocks are disjoint slices of the backing buffer.
// - a block is handed out only after being unlinked from the free list
// - it is relinked only after the in-use bitmap confirms it was handed out
// - every block start is a multiple of block_align from an aligned base
unsafe impl Allocator for PoolAllocator {
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        if let Err(err) = self.check_layout(layout) {
            self.stats.record_allocation_failure();
            return Err(err);
        }

        let Some(index) = self.pop_block() else {
            self.stats.record_allocation_failure();
            return Err(AllocError::out_of_capacity(&self.name, layout.size(), 0));
        };

        self.stats.record_allocation(self.block_size);
        let ptr = assume_aligned(self.block_ptr(index), self.block_align);
        // SAFETY: block_ptr is derived from the non-null region base
        let ptr = unsafe { NonNull::new_unchecked(ptr) };
        Ok(NonNull::slice_from_raw_parts(ptr, self.block_size))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) -> AllocResult<()> {
        let addr = ptr.as_ptr() as usize;
        let index = self
            .block_index(addr)
            .map_err(|err| surface_corruption(err, self.abort_on_corruption))?;

        if unlikely(!self.is_in_use(index)) {
            return Err(surface_corruption(
                AllocError::foreign_free(&self.name, addr),
                self.abort_on_corruption,
            ));
        }

        self.push_block(index);
        self.stats.record_deallocation(self.block_size);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn used_memory(&self) -> usize {
        self.allocated_blocks() * self.block_size
    }

    fn total_memory(&self) -> Option<usize> {
        Some(self.capacity())
    }

    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}

impl Resettable for PoolAllocator {
    unsafe fn reset(&self) {
        // SAFETY: Same precondition, forwarded to the caller
        unsafe { PoolAllocator::reset(self) }
    }
}

// SAFETY: The pool exclusively owns (or exclusively borrows, for carved
// slabs) its buffer. Cell keeps it !Sync.
unsafe impl Send for PoolAllocator {}

impl core::fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("name", &self.name)
            .field("block_size", &self.block_size)
            .field("block_align", &self.block_align)
            .field("block_count", &self.block_count)
            .field("free_blocks", &self.free_blocks())
            .field("carved", &self.is_carved())
            .finish()
    }
}
