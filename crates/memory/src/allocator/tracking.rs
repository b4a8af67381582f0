//! Tracking allocator implementation
//!
//! Decorates any allocator with a live-allocation table for leak detection.
//! The wrapped allocator's strategy is unchanged; the wrapper only records
//! what it hands out and checks what comes back.
//!
//! ## Invariants
//!
//! - every address in the table was returned by this wrapper's `allocate`
//!   and has not been deallocated since
//! - `used_memory()` equals the sum of the sizes in the table
//! - an address missing from the table is never forwarded to the inner
//!   allocator; it is reported as a foreign or double free
//! - leaks are reported, never reclaimed: the wrapper cannot know how to
//!   drop whatever the caller built in that memory

use core::alloc::Layout;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

use hashbrown::HashMap;
use tracing::warn;

use super::{
    AllocatorStats, Allocator, AtomicAllocatorStats, LEAK_SUMMARY_TARGET, LEAK_TARGET, Resettable,
    surface_corruption,
};
use crate::error::{AllocError, AllocResult};
use crate::utils::format_bytes;

/// Metadata kept for every live allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Requested size in bytes
    pub size: usize,
    /// Requested alignment
    pub align: usize,
    /// Optional acquisition tag for diagnostics
    pub tag: Option<&'static str>,
    /// Monotonic allocation number within this wrapper
    pub sequence: u64,
}

impl AllocationRecord {
    fn layout(&self) -> AllocResult<Layout> {
        super::layout_from_size_align(self.size, self.align)
    }
}

/// One outstanding allocation at report time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakEntry {
    pub address: usize,
    pub size: usize,
    pub align: usize,
    pub tag: Option<&'static str>,
    pub sequence: u64,
}

/// Snapshot of every outstanding allocation of one allocator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    pub allocator: String,
    /// Entries in acquisition order
    pub entries: Vec<LeakEntry>,
}

impl LeakReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|entry| entry.size).sum()
    }
}

impl core::fmt::Display for LeakReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(
            f,
            "{}: {} leaked allocation(s), {}",
            self.allocator,
            self.count(),
            format_bytes(self.total_bytes())
        )?;
        for entry in &self.entries {
            writeln!(
                f,
                "  #{} {:#x} {} bytes (align {}){}",
                entry.sequence,
                entry.address,
                entry.size,
                entry.align,
                entry.tag.map(|tag| format!(" [{tag}]")).unwrap_or_default()
            )?;
        }
        Ok(())
    }
}

/// Leak-checking wrapper around another allocator
///
/// Single-threaded like the allocators it wraps; share it through
/// [`SharedAllocator`](super::SharedAllocator).
///
/// # Examples
/// ```rust
/// use hive_memory::allocator::{Allocator, SystemAllocator, TrackingAllocator};
///
/// let tracked = TrackingAllocator::new(SystemAllocator::new("scratch"));
/// let ptr = tracked.allocate_bytes(32, 8)?;
/// assert_eq!(tracked.live_count(), 1);
/// unsafe { tracked.deallocate(ptr, core::alloc::Layout::from_size_align(32, 8).unwrap())? };
/// assert!(tracked.check_leaks().is_ok());
/// # Ok::<(), hive_memory::MemoryError>(())
/// ```
pub struct TrackingAllocator<A: Allocator> {
    inner: A,
    live: RefCell<HashMap<usize, AllocationRecord>>,
    live_bytes: Cell<usize>,
    next_sequence: Cell<u64>,
    /// Current table contents already went out as leak events
    reported: Cell<bool>,
    abort_on_corruption: bool,
    stats: AtomicAllocatorStats,
}

impl<A: Allocator> TrackingAllocator<A> {
    /// Wrap `inner`; the wrapper reports under the inner allocator's name
    pub fn new(inner: A) -> Self {
        Self {
            inner,
            live: RefCell::new(HashMap::new()),
            live_bytes: Cell::new(0),
            next_sequence: Cell::new(0),
            reported: Cell::new(false),
            abort_on_corruption: false,
            stats: AtomicAllocatorStats::new(),
        }
    }

    /// Panic instead of returning on foreign or double frees
    pub fn with_abort_on_corruption(mut self, abort: bool) -> Self {
        self.abort_on_corruption = abort;
        self
    }

    /// Gets a reference to the underlying allocator
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Number of live allocations
    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    /// Record for `ptr` if it is live
    pub fn record(&self, ptr: NonNull<u8>) -> Option<AllocationRecord> {
        self.live.borrow().get(&(ptr.as_ptr() as usize)).copied()
    }

    /// Allocate and label the allocation for leak reports
    pub fn allocate_tagged(&self, layout: Layout, tag: &'static str) -> AllocResult<NonNull<[u8]>> {
        self.allocate_with_tag(layout, Some(tag))
    }

    fn allocate_with_tag(
        &self,
        layout: Layout,
        tag: Option<&'static str>,
    ) -> AllocResult<NonNull<[u8]>> {
        let ptr = match self.inner.allocate(layout) {
            Ok(ptr) => ptr,
            Err(err) => {
                self.stats.record_allocation_failure();
                return Err(err);
            }
        };

        let sequence = self.next_sequence.get();
        self.next_sequence.set(sequence + 1);

        let address = ptr.cast::<u8>().as_ptr() as usize;
        let previous = self.live.borrow_mut().insert(
            address,
            AllocationRecord {
                size: layout.size(),
                align: layout.align(),
                tag,
                sequence,
            },
        );
        debug_assert!(
            previous.is_none(),
            "inner allocator handed out live address {address:#x} twice"
        );

        self.live_bytes.set(self.live_bytes.get() + layout.size());
        self.reported.set(false);
        self.stats.record_allocation(layout.size());
        Ok(ptr)
    }

    /// Snapshot of the live table, in acquisition order
    pub fn leak_report(&self) -> LeakReport {
        let mut entries: Vec<LeakEntry> = self
            .live
            .borrow()
            .iter()
            .map(|(&address, record)| LeakEntry {
                address,
                size: record.size,
                align: record.align,
                tag: record.tag,
                sequence: record.sequence,
            })
            .collect();
        entries.sort_unstable_by_key(|entry| entry.sequence);

        LeakReport {
            allocator: self.name().to_string(),
            entries,
        }
    }

    /// Emit one `warn!` per live allocation plus a summary line
    ///
    /// Events go out once per table state: calling this again without an
    /// intervening allocate/deallocate returns the same report silently.
    /// Drop calls it too, so an explicit report at shutdown is never
    /// duplicated.
    pub fn report_leaks(&self) -> LeakReport {
        let report = self.leak_report();
        if report.is_empty() || self.reported.replace(true) {
            return report;
        }

        for entry in &report.entries {
            warn!(
                target: LEAK_TARGET,
                allocator = %report.allocator,
                address = format_args!("{:#x}", entry.address),
                size = entry.size,
                align = entry.align,
                tag = entry.tag.unwrap_or("-"),
                sequence = entry.sequence,
                "memory leak"
            );
        }
        warn!(
            target: LEAK_SUMMARY_TARGET,
            allocator = %report.allocator,
            count = report.count(),
            bytes = report.total_bytes(),
            "allocator has outstanding allocations"
        );
        report
    }

    /// Drop every record after the inner allocator released its memory in bulk
    pub(crate) fn forget_all(&self) {
        self.live.borrow_mut().clear();
        self.live_bytes.set(0);
        self.reported.set(false);
        self.stats.record_reset();
    }

    /// `Err(LeakDetected)` if anything is still live
    pub fn check_leaks(&self) -> AllocResult<()> {
        let live = self.live.borrow();
        if live.is_empty() {
            Ok(())
        } else {
            Err(AllocError::leak_detected(
                self.name(),
                live.len(),
                self.live_bytes.get(),
            ))
        }
    }
}

// SAFETY: Allocation is delegated to the inner allocator unchanged.
// - returned pointers are exactly what `inner` returned
// - deallocation is forwarded only for addresses in the live table, with
//   the layout recorded at allocation time
unsafe impl<A: Allocator> Allocator for TrackingAllocator<A> {
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        self.allocate_with_tag(layout, None)
    }

    /// The recorded layout is forwarded to the inner allocator; the `layout`
    /// argument is only compared against it.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> AllocResult<()> {
        let address = ptr.as_ptr() as usize;
        let Some(record) = self.live.borrow_mut().remove(&address) else {
            return Err(surface_corruption(
                AllocError::foreign_free(self.name(), address),
                self.abort_on_corruption,
            ));
        };

        if record.size != layout.size() || record.align != layout.align() {
            warn!(
                allocator = %self.name(),
                address = format_args!("{address:#x}"),
                recorded_size = record.size,
                recorded_align = record.align,
                size = layout.size(),
                align = layout.align(),
                "deallocation layout differs from allocation"
            );
        }

        let forwarded = record.layout().and_then(|recorded| {
            // SAFETY: address was live in the table, so inner issued it with
            // exactly this layout and it has not been freed since.
            unsafe { self.inner.deallocate(ptr, recorded) }
        });
        if let Err(err) = forwarded {
            self.live.borrow_mut().insert(address, record);
            return Err(err);
        }

        self.live_bytes.set(self.live_bytes.get() - record.size);
        self.reported.set(false);
        self.stats.record_deallocation(record.size);
        Ok(())
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn used_memory(&self) -> usize {
        self.live_bytes.get()
    }

    fn total_memory(&self) -> Option<usize> {
        self.inner.total_memory()
    }

    fn stats(&self) -> AllocatorStats {
        self.stats.snapshot()
    }
}

impl<A: Allocator + Resettable> Resettable for TrackingAllocator<A> {
    /// Reset the inner allocator and forget every record
    ///
    /// A bulk reset is the legitimate release path for arenas and pools, so
    /// the forgotten records are not leaks.
    unsafe fn reset(&self) {
        // SAFETY: Same precondition, forwarded to the caller
        unsafe { self.inner.reset() };
        self.forget_all();
    }
}

impl<A: Allocator> Drop for TrackingAllocator<A> {
    fn drop(&mut self) {
        self.report_leaks();
    }
}

impl<A: Allocator> core::fmt::Debug for TrackingAllocator<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TrackingAllocator")
            .field("name", &self.name())
            .field("live_count", &self.live_count())
            .field("live_bytes", &self.live_bytes.get())
            .finish()
    }
}
