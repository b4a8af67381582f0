//! Standalone error types for hive-memory
//!
//! Uses thiserror for clean, idiomatic Rust error definitions. Every
//! allocation failure surfaces as a value; nothing in this crate aborts on
//! capacity exhaustion.

use core::alloc::Layout;
use thiserror::Error;

use crate::hierarchy::LifecycleState;

// ============================================================================
// Main Error Types
// ============================================================================

/// Memory management errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    // --- Allocation Errors ---
    #[error("Allocator '{allocator}' out of capacity: requested {requested} bytes, {available} available")]
    OutOfCapacity {
        allocator: String,
        requested: usize,
        available: usize,
    },

    #[error("Invalid alignment: {alignment}")]
    InvalidAlignment { alignment: usize },

    #[error(
        "Allocator '{allocator}' cannot serve {size} bytes at {align} alignment (block {block_size} bytes at {block_align})"
    )]
    UnsupportedLayout {
        allocator: String,
        size: usize,
        align: usize,
        block_size: usize,
        block_align: usize,
    },

    #[error("Size overflow during operation: {operation}")]
    SizeOverflow { operation: String },

    // --- Corruption Errors ---
    #[error("Allocator '{allocator}' did not issue {address:#x} or it was already freed")]
    ForeignOrDoubleFree { allocator: String, address: usize },

    #[error("Memory corruption detected in '{allocator}': {details}")]
    Corruption { allocator: String, details: String },

    #[error("Allocator '{allocator}' rejected checkpoint: {reason}")]
    InvalidCheckpoint {
        allocator: String,
        reason: &'static str,
    },

    // --- Diagnostics ---
    #[error("Allocator '{allocator}' leaked {count} allocation(s), {bytes} bytes")]
    LeakDetected {
        allocator: String,
        count: usize,
        bytes: usize,
    },

    // --- Hierarchy Errors ---
    #[error("Cannot {operation} while allocator hierarchy is {state}")]
    HierarchyMisuse {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Unknown allocator: {name}")]
    UnknownAllocator { name: String },

    #[error("Operation not supported by '{allocator}': {operation}")]
    NotSupported {
        allocator: String,
        operation: &'static str,
    },
}

impl MemoryError {
    /// Check if error is retryable
    ///
    /// Only capacity exhaustion qualifies: the same request may succeed after
    /// a reset, a deallocation, or against a larger allocator.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::OutOfCapacity { .. })
    }

    /// Whether this error signals that continuing risks silent memory corruption
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ForeignOrDoubleFree { .. } | Self::Corruption { .. }
        )
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::OutOfCapacity { .. } => "MEM:ALLOC:CAPACITY",
            Self::InvalidAlignment { .. } => "MEM:ALLOC:ALIGN",
            Self::UnsupportedLayout { .. } => "MEM:ALLOC:LAYOUT",
            Self::SizeOverflow { .. } => "MEM:ALLOC:OVERFLOW",
            Self::ForeignOrDoubleFree { .. } => "MEM:FREE:FOREIGN",
            Self::Corruption { .. } => "MEM:SYSTEM:CORRUPTION",
            Self::InvalidCheckpoint { .. } => "MEM:ARENA:CHECKPOINT",
            Self::LeakDetected { .. } => "MEM:DIAG:LEAK",
            Self::HierarchyMisuse { .. } => "MEM:HIERARCHY:STATE",
            Self::InvalidConfig { .. } => "MEM:CONFIG:INVALID",
            Self::UnknownAllocator { .. } => "MEM:HIERARCHY:UNKNOWN",
            Self::NotSupported { .. } => "MEM:FEATURE:UNSUPPORTED",
        }
    }

    // ============================================================================
    // Convenience Constructors
    // ============================================================================

    /// Create out of capacity error
    pub fn out_of_capacity(allocator: &str, requested: usize, available: usize) -> Self {
        Self::OutOfCapacity {
            allocator: allocator.to_string(),
            requested,
            available,
        }
    }

    /// Create invalid alignment error
    pub fn invalid_alignment(alignment: usize) -> Self {
        Self::InvalidAlignment { alignment }
    }

    /// Create unsupported layout error for a fixed size class
    pub fn unsupported_layout(
        allocator: &str,
        layout: Layout,
        block_size: usize,
        block_align: usize,
    ) -> Self {
        Self::UnsupportedLayout {
            allocator: allocator.to_string(),
            size: layout.size(),
            align: layout.align(),
            block_size,
            block_align,
        }
    }

    /// Create size overflow error
    pub fn size_overflow(operation: &str) -> Self {
        Self::SizeOverflow {
            operation: operation.to_string(),
        }
    }

    /// Create foreign or double free error
    pub fn foreign_free(allocator: &str, address: usize) -> Self {
        Self::ForeignOrDoubleFree {
            allocator: allocator.to_string(),
            address,
        }
    }

    /// Create corruption error
    pub fn corruption(allocator: &str, details: impl Into<String>) -> Self {
        Self::Corruption {
            allocator: allocator.to_string(),
            details: details.into(),
        }
    }

    /// Create invalid checkpoint error
    pub fn invalid_checkpoint(allocator: &str, reason: &'static str) -> Self {
        Self::InvalidCheckpoint {
            allocator: allocator.to_string(),
            reason,
        }
    }

    /// Create leak detected error
    pub fn leak_detected(allocator: &str, count: usize, bytes: usize) -> Self {
        Self::LeakDetected {
            allocator: allocator.to_string(),
            count,
            bytes,
        }
    }

    /// Create hierarchy misuse error
    pub fn hierarchy_misuse(operation: &'static str, state: LifecycleState) -> Self {
        Self::HierarchyMisuse { operation, state }
    }

    /// Create invalid config error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create unknown allocator error
    pub fn unknown_allocator(name: &str) -> Self {
        Self::UnknownAllocator {
            name: name.to_string(),
        }
    }

    /// Create not supported error
    pub fn not_supported(allocator: &str, operation: &'static str) -> Self {
        Self::NotSupported {
            allocator: allocator.to_string(),
            operation,
        }
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_config(err.to_string())
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result type for memory operations
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// Generic result type alias
pub type Result<T> = MemoryResult<T>;

/// Allocator-facing aliases
pub type AllocError = MemoryError;
pub type AllocResult<T> = MemoryResult<T>;

// ============================================================================
// Tests
// ============================================================================
