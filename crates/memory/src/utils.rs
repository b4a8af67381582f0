//! Utility functions and helpers for hive-memory
//!
//! This module provides common utilities used throughout the crate:
//! - Memory alignment helpers
//! - Size formatting
//! - Checked arithmetic operations

use crate::error::{AllocError, AllocResult};

/// Aligns a value up to the nearest multiple of alignment
///
/// # Examples
/// ```
/// use hive_memory::utils::align_up;
///
/// assert_eq!(align_up(7, 8), 8);
/// assert_eq!(align_up(8, 8), 8);
/// assert_eq!(align_up(9, 8), 16);
/// ```
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Overflow-checked [`align_up`]
///
/// Returns `None` when rounding up would wrap past `usize::MAX`.
#[inline(always)]
pub const fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
    debug_assert!(alignment.is_power_of_two());
    match value.checked_add(alignment - 1) {
        Some(bumped) => Some(bumped & !(alignment - 1)),
        None => None,
    }
}

/// Checks if a value is aligned to the given alignment
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    value & (alignment - 1) == 0
}

/// Format bytes into human-readable string
///
/// # Examples
/// ```
/// use hive_memory::utils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// assert_eq!(format_bytes(4 * 1024 * 1024), "4.00 MB");
/// ```
pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

// ============================================================================
// Checked Arithmetic
// ============================================================================

/// Overflow-checked arithmetic that reports failures as allocation errors
///
/// # Examples
///
/// ```
/// use hive_memory::utils::CheckedArithmetic;
///
/// assert_eq!(16usize.try_mul(4).unwrap(), 64);
/// assert!(usize::MAX.try_mul(2).is_err());
/// ```
pub trait CheckedArithmetic: Sized {
    /// Checked multiplication. Returns `SizeOverflow` on overflow.
    fn try_mul(self, rhs: Self) -> AllocResult<Self>;
}

impl CheckedArithmetic for usize {
    #[inline]
    fn try_mul(self, rhs: Self) -> AllocResult<Self> {
        self.checked_mul(rhs)
            .ok_or_else(|| AllocError::size_overflow("mul"))
    }
}
