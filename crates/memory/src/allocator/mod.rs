//! Custom allocators for the engine runtime
//!
//! Every variant implements the same [`Allocator`] contract so the hierarchy
//! can hold them as trait objects:
//! - [`SystemAllocator`]: platform allocator, optionally budgeted
//! - [`ArenaAllocator`]: bump allocator reset once per frame
//! - [`PoolAllocator`]: fixed-size blocks on a free list
//! - [`TrackingAllocator`]: leak-checking decorator over any of the above
//! - [`SharedAllocator`]: mutex wrapper for cross-thread use

mod arena;
mod pool;
mod shared;
mod stats;
mod system;
mod tracking;
mod traits;

pub use arena::{ArenaAllocator, ArenaCheckpoint, DEFAULT_ARENA_ALIGN};
pub use pool::PoolAllocator;
pub use shared::SharedAllocator;
pub use stats::{AllocatorStats, AtomicAllocatorStats};
pub use system::SystemAllocator;
pub use tracking::{AllocationRecord, LeakEntry, LeakReport, TrackingAllocator};
pub use traits::{
    Allocator, Constructed, Resettable, ThreadSafeAllocator, TypedAllocator,
    layout_from_size_align,
};

pub use crate::error::{AllocError, AllocResult};

/// tracing target for corruption-class diagnostics
pub const CORRUPTION_TARGET: &str = "hive_memory::corruption";

/// tracing target for leak diagnostics
pub const LEAK_TARGET: &str = "hive_memory::leak";

/// tracing target for per-allocator leak summaries
pub const LEAK_SUMMARY_TARGET: &str = "hive_memory::leak::summary";

/// Report a corruption-class error and hand it back to the caller
///
/// Emits one `error!` event. Panics instead of returning when
/// `abort_on_corruption` is set, for builds that prefer to stop at the first
/// sign of a corrupted free list or live table.
pub(crate) fn surface_corruption(err: AllocError, abort_on_corruption: bool) -> AllocError {
    tracing::error!(
        target: CORRUPTION_TARGET,
        code = err.code(),
        "{err}"
    );
    if abort_on_corruption {
        panic!("aborting on memory corruption: {err}");
    }
    err
}
