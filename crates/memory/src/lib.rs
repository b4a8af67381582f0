//! # hive-memory
//!
//! Allocator hierarchy for the Hive engine runtime.
//!
//! Instead of sending every request to the general-purpose heap, engine
//! subsystems get purpose-built allocators:
//! - frame arenas: bump allocation, released in one step per frame
//! - pools: fixed-size blocks with O(1) reuse for entities and components
//! - tracking wrappers: live-allocation tables with leak reports at shutdown
//! - system allocators: the platform heap, optionally under a byte budget
//!
//! All of them implement [`Allocator`](allocator::Allocator) and are built,
//! nested, and torn down by [`AllocatorHierarchy`](hierarchy::AllocatorHierarchy).
//!
//! ## Quick Start
//!
//! ```rust
//! use hive_memory::prelude::*;
//!
//! let mut hierarchy = AllocatorHierarchy::new();
//! hierarchy.configure(HierarchyConfig::engine_default())?;
//! hierarchy.initialize()?;
//!
//! let frame = hierarchy.handle("frame")?;
//! let velocity = frame.construct([0.0f32; 3])?;
//! assert_eq!(unsafe { velocity.as_ref() }, &[0.0; 3]);
//!
//! // once per frame
//! unsafe { hierarchy.reset_arena("frame")? };
//!
//! let report = hierarchy.shutdown();
//! assert!(report.is_clean());
//! # Ok::<(), hive_memory::MemoryError>(())
//! ```
//!
//! ## Diagnostics
//!
//! Everything goes through `tracing`:
//! - `hive_memory::leak` / `hive_memory::leak::summary`: one `warn!` per
//!   leaked allocation, plus a per-allocator summary
//! - `hive_memory::corruption`: one `error!` per foreign free, double free,
//!   or off-boundary pool address
//! - lifecycle boundaries (`configure`, `initialize`, `shutdown`) at `info`
//!
//! No subscriber is required for correct behavior.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::perf)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Precision loss in usize/u64 -> f64 casts is acceptable for stats
#![allow(clippy::cast_precision_loss)]
// inline(always) on alignment helpers is intentional for hot paths
#![allow(clippy::inline_always)]
// Pool free-list links are read/written unaligned on purpose
#![allow(clippy::cast_ptr_alignment)]
#![allow(clippy::return_self_not_must_use)]

pub mod allocator;
pub mod error;
pub mod hierarchy;
pub mod hints;
pub mod module;
pub mod region;
pub mod utils;

pub use crate::error::{AllocError, AllocResult, MemoryError, MemoryResult, Result};

pub mod prelude {
    //! Common imports for allocator users

    pub use crate::allocator::{
        Allocator, ArenaAllocator, AllocatorStats, PoolAllocator, Resettable, SharedAllocator,
        SystemAllocator, ThreadSafeAllocator, TrackingAllocator, TypedAllocator,
    };
    pub use crate::error::{AllocError, AllocResult, MemoryError, MemoryResult, Result};
    pub use crate::hierarchy::{
        AllocatorHandle, AllocatorHierarchy, AllocatorStrategy, ChildConfig, HierarchyConfig,
        LifecycleState,
    };
    pub use crate::module::{MemoryModule, Module, ModuleContext};
    pub use crate::utils::CheckedArithmetic;
}
