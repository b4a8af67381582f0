//! Backing memory for fixed-buffer allocators
//!
//! A [`Region`] is a plain non-owning view (base pointer + length). Whoever
//! hands a region to an allocator guarantees that the bytes stay valid and
//! unaliased for the allocator's whole lifetime. In the hierarchy that is
//! the parent allocator, which carved the slab out of its own storage.
//!
//! [`SystemBuffer`] is the owning counterpart used when an allocator stands
//! on its own: it obtains memory from the global allocator and returns it on
//! drop.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::allocator::layout_from_size_align;
use crate::error::{AllocError, AllocResult};

/// Non-owning view of a contiguous byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    /// Create a view over `len` bytes starting at `base`
    ///
    /// # Safety
    ///
    /// Caller must ensure:
    /// - `base..base + len` is valid for reads and writes
    /// - the range stays valid and is not handed to anyone else for as long
    ///   as the view (or an allocator built on it) is in use
    #[inline]
    pub const unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// First byte of the region
    #[inline]
    pub const fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Length in bytes
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Address of the first byte
    #[inline]
    pub fn start_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Address one past the last byte
    #[inline]
    pub fn end_addr(&self) -> usize {
        self.start_addr() + self.len
    }

    /// Whether `addr` falls inside `[start, end)`
    #[inline]
    pub fn contains_addr(&self, addr: usize) -> bool {
        addr >= self.start_addr() && addr < self.end_addr()
    }

    /// Pointer `offset` bytes into the region, keeping the base's provenance
    ///
    /// Returns `None` when `offset` is past the end.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> Option<NonNull<u8>> {
        if offset > self.len {
            return None;
        }
        // SAFETY: offset <= len, so the result stays within (or one past) the
        // region described by base + len.
        // - base is non-null, so base + offset is non-null too
        Some(unsafe { self.base.add(offset) })
    }
}

/// Memory owned by a standalone allocator, obtained from the global allocator
#[derive(Debug)]
pub struct SystemBuffer {
    region: Region,
    layout: Layout,
}

impl SystemBuffer {
    /// Allocate `size` bytes aligned to `align`
    ///
    /// Zero sizes are rejected; a fixed-buffer allocator over nothing is a
    /// configuration error.
    pub fn new(size: usize, align: usize) -> AllocResult<Self> {
        if size == 0 {
            return Err(AllocError::invalid_config("backing buffer size must be non-zero"));
        }
        let layout = layout_from_size_align(size, align)?;

        // SAFETY: layout has a non-zero size (checked above).
        let raw = unsafe { std::alloc::alloc(layout) };
        let base = NonNull::new(raw).ok_or_else(|| AllocError::out_of_capacity("system", size, 0))?;

        Ok(Self {
            // SAFETY: base points at a fresh allocation of exactly `size`
            // bytes that this buffer owns until drop.
            region: unsafe { Region::from_raw_parts(base, size) },
            layout,
        })
    }

    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

impl Drop for SystemBuffer {
    fn drop(&mut self) {
        // SAFETY: region.base came from std::alloc::alloc with self.layout
        // and has not been released before.
        unsafe { std::alloc::dealloc(self.region.base.as_ptr(), self.layout) }
    }
}

// SAFETY: SystemBuffer exclusively owns its allocation; moving it to another
// thread moves that ownership along with it.
unsafe impl Send for SystemBuffer {}

/// Where a fixed-buffer allocator's bytes come from
#[derive(Debug)]
pub(crate) enum Backing {
    /// Allocator owns its buffer and frees it on drop
    Owned(SystemBuffer),
    /// Slab carved from a parent; the parent reclaims it
    Carved(Region),
}

impl Backing {
    #[inline]
    pub(crate) fn region(&self) -> Region {
        match self {
            Self::Owned(buffer) => buffer.region(),
            Self::Carved(region) => *region,
        }
    }

    #[inline]
    pub(crate) fn is_carved(&self) -> bool {
        matches!(self, Self::Carved(_))
    }
}
