//! Allocator hierarchy
//!
//! A root allocator taking memory from the system, plus named children
//! carved from it (or from each other) at initialization and torn down in
//! reverse at shutdown:
//!
//! ```text
//! global (system, optional budget)
//! ├── frame      (arena)  ── scratch (arena)
//! ├── entities   (pool)
//! ├── components (pool)
//! └── assets     (system, own budget)
//! ```

mod config;
mod manager;
mod node;
mod state;

pub use config::{
    AllocatorStrategy, ChildConfig, HierarchyConfig, RootConfig, default_tracking,
};
pub use manager::{
    AllocatorHandle, AllocatorHierarchy, NodeUsage, OutstandingBytes, ShutdownReport,
};
pub use state::LifecycleState;
