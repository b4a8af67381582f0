//! Allocator statistics tracking
//!
//! Every allocator in the hierarchy keeps an [`AtomicAllocatorStats`] and
//! hands out [`AllocatorStats`] snapshots on request.

use core::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::utils::format_bytes;

/// Statistics for memory allocators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AllocatorStats {
    /// Total bytes currently allocated
    pub allocated_bytes: usize,
    /// Peak bytes allocated
    pub peak_allocated_bytes: usize,
    /// Total number of allocations
    pub allocation_count: usize,
    /// Total number of deallocations
    pub deallocation_count: usize,
    /// Number of failed allocations
    pub failed_allocations: usize,
    /// Number of bulk resets (arena and pool only)
    pub reset_count: usize,
    /// Total bytes ever allocated (cumulative)
    pub total_bytes_allocated: usize,
    /// Total bytes ever released, individually or through a reset
    pub total_bytes_deallocated: usize,
}

impl AllocatorStats {
    /// Creates a new empty stats object
    pub const fn new() -> Self {
        Self {
            allocated_bytes: 0,
            peak_allocated_bytes: 0,
            allocation_count: 0,
            deallocation_count: 0,
            failed_allocations: 0,
            reset_count: 0,
            total_bytes_allocated: 0,
            total_bytes_deallocated: 0,
        }
    }

    /// Calculate the average allocation size
    pub fn average_allocation_size(&self) -> Option<f64> {
        if self.allocation_count > 0 {
            Some(self.total_bytes_allocated as f64 / self.allocation_count as f64)
        } else {
            None
        }
    }

    /// Fraction of allocation attempts that succeeded (0.0 to 1.0)
    pub fn allocation_efficiency(&self) -> f64 {
        let total_attempts = self.allocation_count + self.failed_allocations;
        if total_attempts > 0 {
            self.allocation_count as f64 / total_attempts as f64
        } else {
            1.0
        }
    }

    /// Check if there are any active allocations
    ///
    /// Arenas release through resets, so a reset also clears this.
    pub fn has_active_allocations(&self) -> bool {
        self.allocated_bytes > 0
    }
}

impl core::fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Allocator Statistics:")?;
        writeln!(f, "  Current allocated: {}", format_bytes(self.allocated_bytes))?;
        writeln!(f, "  Peak allocated: {}", format_bytes(self.peak_allocated_bytes))?;
        writeln!(f, "  Allocations: {}", self.allocation_count)?;
        writeln!(f, "  Deallocations: {}", self.deallocation_count)?;
        writeln!(f, "  Resets: {}", self.reset_count)?;
        writeln!(f, "  Failed allocations: {}", self.failed_allocations)?;

        if let Some(avg) = self.average_allocation_size() {
            writeln!(f, "  Average allocation size: {avg:.2} bytes")?;
        }

        writeln!(
            f,
            "  Allocation efficiency: {:.2}%",
            self.allocation_efficiency() * 100.0
        )
    }
}

/// Interior-mutable counters behind [`AllocatorStats`]
#[derive(Debug, Default)]
pub struct AtomicAllocatorStats {
    allocated_bytes: AtomicUsize,
    peak_allocated_bytes: AtomicUsize,
    allocation_count: AtomicUsize,
    deallocation_count: AtomicUsize,
    failed_allocations: AtomicUsize,
    reset_count: AtomicUsize,
    total_bytes_allocated: AtomicUsize,
    total_bytes_deallocated: AtomicUsize,
}

impl AtomicAllocatorStats {
    /// Creates a new empty atomic stats object
    pub const fn new() -> Self {
        Self {
            allocated_bytes: AtomicUsize::new(0),
            peak_allocated_bytes: AtomicUsize::new(0),
            allocation_count: AtomicUsize::new(0),
            deallocation_count: AtomicUsize::new(0),
            failed_allocations: AtomicUsize::new(0),
            reset_count: AtomicUsize::new(0),
            total_bytes_allocated: AtomicUsize::new(0),
            total_bytes_deallocated: AtomicUsize::new(0),
        }
    }

    /// Record a successful allocation of `size` charged bytes
    pub fn record_allocation(&self, size: usize) {
        self.allocation_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_allocated.fetch_add(size, Ordering::Relaxed);
        let current = self.allocated_bytes.fetch_add(size, Ordering::Relaxed) + size;
        self.peak_allocated_bytes.fetch_max(current, Ordering::Relaxed);
    }

    /// Record a successful deallocation of `size` charged bytes
    pub fn record_deallocation(&self, size: usize) {
        self.deallocation_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes_deallocated.fetch_add(size, Ordering::Relaxed);
        self.allocated_bytes.fetch_sub(size, Ordering::Relaxed);
    }

    /// Record a bulk release of everything currently allocated
    pub fn record_reset(&self) {
        let released = self.allocated_bytes.swap(0, Ordering::Relaxed);
        self.total_bytes_deallocated.fetch_add(released, Ordering::Relaxed);
        self.reset_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a bulk rewind that released `size` bytes
    pub fn record_rewind(&self, size: usize) {
        self.total_bytes_deallocated.fetch_add(size, Ordering::Relaxed);
        self.allocated_bytes.fetch_sub(size, Ordering::Relaxed);
    }

    /// Record a failed allocation
    pub fn record_allocation_failure(&self) {
        self.failed_allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of the current statistics
    pub fn snapshot(&self) -> AllocatorStats {
        AllocatorStats {
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
            peak_allocated_bytes: self.peak_allocated_bytes.load(Ordering::Relaxed),
            allocation_count: self.allocation_count.load(Ordering::Relaxed),
            deallocation_count: self.deallocation_count.load(Ordering::Relaxed),
            failed_allocations: self.failed_allocations.load(Ordering::Relaxed),
            reset_count: self.reset_count.load(Ordering::Relaxed),
            total_bytes_allocated: self.total_bytes_allocated.load(Ordering::Relaxed),
            total_bytes_deallocated: self.total_bytes_deallocated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_allocation_tracks_peak() {
        let stats = AtomicAllocatorStats::new();
        stats.record_allocation(100);
        stats.record_allocation(50);
        stats.record_deallocation(100);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allocated_bytes, 50);
        assert_eq!(snapshot.peak_allocated_bytes, 150);
        assert_eq!(snapshot.allocation_count, 2);
        assert_eq!(snapshot.deallocation_count, 1);
        assert!(snapshot.has_active_allocations());
    }

    #[test]
    fn test_reset_releases_everything() {
        let stats = AtomicAllocatorStats::new();
        stats.record_allocation(64);
        stats.record_allocation(32);
        stats.record_reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.allocated_bytes, 0);
        assert_eq!(snapshot.total_bytes_deallocated, 96);
        assert_eq!(snapshot.reset_count, 1);
        assert_eq!(snapshot.peak_allocated_bytes, 96);
    }

    #[test]
    fn test_efficiency_counts_failures() {
        let stats = AtomicAllocatorStats::new();
        stats.record_allocation(8);
        stats.record_allocation_failure();
        assert!((stats.snapshot().allocation_efficiency() - 0.5).abs() < f64::EPSILON);
        assert!((AllocatorStats::new().allocation_efficiency() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_display_mentions_counts() {
        let stats = AtomicAllocatorStats::new();
        stats.record_allocation(2048);
        let text = stats.snapshot().to_string();
        assert!(text.contains("2.00 KB"));
        assert!(text.contains("Allocations: 1"));
    }
}
