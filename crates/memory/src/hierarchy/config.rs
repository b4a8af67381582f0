//! Allocator hierarchy configuration
//!
//! Declares the root allocator and the named children built on top of it.
//! Nothing here reserves memory; [`AllocatorHierarchy::initialize`] does that.
//!
//! Configs are plain serde types and round-trip through JSON:
//!
//! ```json
//! {
//!   "root": { "name": "global", "limit": null, "tracked": true },
//!   "abort_on_corruption": false,
//!   "children": [
//!     { "name": "frame", "strategy": { "kind": "arena", "capacity": 4194304, "align": 16 } },
//!     { "name": "entities", "strategy": { "kind": "pool", "block_size": 64, "block_align": 16, "block_count": 4096 } }
//!   ]
//! }
//! ```
//!
//! [`AllocatorHierarchy::initialize`]: super::AllocatorHierarchy::initialize

use serde::{Deserialize, Serialize};

use crate::allocator::{DEFAULT_ARENA_ALIGN, PoolAllocator};
use crate::error::{MemoryError, MemoryResult};

const MIB: usize = 1024 * 1024;

/// Tracking default: on in debug builds, off in release builds
#[inline]
pub const fn default_tracking() -> bool {
    cfg!(debug_assertions)
}

const fn default_arena_align() -> usize {
    DEFAULT_ARENA_ALIGN
}

/// How a child allocator obtains and hands out memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AllocatorStrategy {
    /// Bump allocator over a slab carved from the parent
    Arena {
        capacity: usize,
        #[serde(default = "default_arena_align")]
        align: usize,
    },
    /// Fixed-size blocks over a slab carved from the parent
    Pool {
        block_size: usize,
        block_align: usize,
        block_count: usize,
    },
    /// Memory straight from the platform allocator, optionally budgeted
    System {
        #[serde(default)]
        limit: Option<usize>,
    },
}

impl AllocatorStrategy {
    /// Short label for logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Arena { .. } => "arena",
            Self::Pool { .. } => "pool",
            Self::System { .. } => "system",
        }
    }

    /// Size and alignment of the slab this strategy carves from its parent
    ///
    /// `None` for system children, which never carve.
    pub fn slab(&self) -> MemoryResult<Option<(usize, usize)>> {
        match *self {
            Self::Arena { capacity, align } => Ok(Some((capacity, align))),
            Self::Pool {
                block_size,
                block_align,
                block_count,
            } => {
                let bytes = PoolAllocator::required_bytes(block_size, block_align, block_count)?;
                Ok(Some((bytes, block_align.max(align_of::<usize>()))))
            }
            Self::System { .. } => Ok(None),
        }
    }

    fn validate(&self, name: &str) -> MemoryResult<()> {
        let fail = |reason: &str| Err(MemoryError::invalid_config(format!("{name}: {reason}")));
        match *self {
            Self::Arena { capacity, align } => {
                if capacity == 0 {
                    return fail("arena capacity must be non-zero");
                }
                if !align.is_power_of_two() {
                    return fail("arena alignment must be a power of two");
                }
            }
            Self::Pool {
                block_size,
                block_align,
                block_count,
            } => {
                if block_size == 0 || block_count == 0 {
                    return fail("pool block size and count must be non-zero");
                }
                if !block_align.is_power_of_two() {
                    return fail("pool block alignment must be a power of two");
                }
            }
            Self::System { limit } => {
                if limit == Some(0) {
                    return fail("system limit must be non-zero when set");
                }
            }
        }
        self.slab().map(|_| ())
    }
}

/// Root (global) allocator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootConfig {
    pub name: String,
    /// Byte budget for everything the hierarchy takes from the system
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default = "default_tracking")]
    pub tracked: bool,
}

/// One named child allocator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildConfig {
    pub name: String,
    /// Earlier child to carve from; `None` means the root
    #[serde(default)]
    pub parent: Option<String>,
    pub strategy: AllocatorStrategy,
    /// Overrides the build-profile tracking default
    #[serde(default)]
    pub tracked: Option<bool>,
}

impl ChildConfig {
    pub fn new(name: impl Into<String>, strategy: AllocatorStrategy) -> Self {
        Self {
            name: name.into(),
            parent: None,
            strategy,
            tracked: None,
        }
    }

    pub fn arena(name: impl Into<String>, capacity: usize) -> Self {
        Self::new(
            name,
            AllocatorStrategy::Arena {
                capacity,
                align: DEFAULT_ARENA_ALIGN,
            },
        )
    }

    pub fn pool(
        name: impl Into<String>,
        block_size: usize,
        block_align: usize,
        block_count: usize,
    ) -> Self {
        Self::new(
            name,
            AllocatorStrategy::Pool {
                block_size,
                block_align,
                block_count,
            },
        )
    }

    pub fn system(name: impl Into<String>, limit: Option<usize>) -> Self {
        Self::new(name, AllocatorStrategy::System { limit })
    }

    /// Carve from `parent` instead of the root
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn tracked(mut self, tracked: bool) -> Self {
        self.tracked = Some(tracked);
        self
    }

    /// Effective tracking flag
    pub fn is_tracked(&self) -> bool {
        self.tracked.unwrap_or_else(default_tracking)
    }
}

/// Full hierarchy declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyConfig {
    pub root: RootConfig,
    /// Panic on foreign/double frees instead of returning the error
    #[serde(default)]
    pub abort_on_corruption: bool,
    /// Children in creation order
    #[serde(default)]
    pub children: Vec<ChildConfig>,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self::new("global")
    }
}

impl HierarchyConfig {
    /// Hierarchy with an unbounded root and no children
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            root: RootConfig {
                name: root_name.into(),
                limit: None,
                tracked: default_tracking(),
            },
            abort_on_corruption: false,
            children: Vec::new(),
        }
    }

    /// Engine preset: frame arena, entity/component pools, asset allocator
    ///
    /// | name         | strategy                 | size      |
    /// |--------------|--------------------------|-----------|
    /// | `frame`      | arena, 16-byte aligned   | 4 MiB     |
    /// | `entities`   | pool, 64 B × 4096        | 256 KiB   |
    /// | `components` | pool, 256 B × 1024       | 256 KiB   |
    /// | `assets`     | system, budgeted         | 256 MiB   |
    pub fn engine_default() -> Self {
        Self::new("global")
            .with_arena("frame", 4 * MIB)
            .with_pool("entities", 64, 16, 4096)
            .with_pool("components", 256, 16, 1024)
            .with_system("assets", Some(256 * MIB))
    }

    pub fn with_root_limit(mut self, limit: usize) -> Self {
        self.root.limit = Some(limit);
        self
    }

    pub fn with_root_tracking(mut self, tracked: bool) -> Self {
        self.root.tracked = tracked;
        self
    }

    pub fn with_abort_on_corruption(mut self, abort: bool) -> Self {
        self.abort_on_corruption = abort;
        self
    }

    pub fn with_child(mut self, child: ChildConfig) -> Self {
        self.children.push(child);
        self
    }

    /// Arena child carved from the root
    pub fn with_arena(self, name: impl Into<String>, capacity: usize) -> Self {
        self.with_child(ChildConfig::arena(name, capacity))
    }

    /// Pool child carved from the root
    pub fn with_pool(
        self,
        name: impl Into<String>,
        block_size: usize,
        block_align: usize,
        block_count: usize,
    ) -> Self {
        self.with_child(ChildConfig::pool(name, block_size, block_align, block_count))
    }

    /// System child, independent of the root's memory
    pub fn with_system(self, name: impl Into<String>, limit: Option<usize>) -> Self {
        self.with_child(ChildConfig::system(name, limit))
    }

    /// Override tracking on the most recently declared child
    pub fn tracked(mut self, tracked: bool) -> Self {
        if let Some(child) = self.children.last_mut() {
            child.tracked = Some(tracked);
        }
        self
    }

    pub fn child(&self, name: &str) -> Option<&ChildConfig> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Check names, parent order, and strategy parameters
    ///
    /// - every name (root included) is unique and non-empty
    /// - a parent is the root or a child declared earlier
    /// - pools never parent other allocators (a slab is not one block)
    /// - sizes are non-zero and alignments are powers of two
    pub fn validate(&self) -> MemoryResult<()> {
        if self.root.name.is_empty() {
            return Err(MemoryError::invalid_config("root allocator needs a name"));
        }
        if self.root.limit == Some(0) {
            return Err(MemoryError::invalid_config("root limit must be non-zero when set"));
        }

        for (index, child) in self.children.iter().enumerate() {
            if child.name.is_empty() {
                return Err(MemoryError::invalid_config(format!(
                    "child #{index} needs a name"
                )));
            }

            let earlier = &self.children[..index];
            if child.name == self.root.name || earlier.iter().any(|c| c.name == child.name) {
                return Err(MemoryError::invalid_config(format!(
                    "duplicate allocator name '{}'",
                    child.name
                )));
            }

            if let Some(parent) = &child.parent
                && *parent != self.root.name
            {
                let Some(parent_config) = earlier.iter().find(|c| c.name == *parent) else {
                    return Err(MemoryError::invalid_config(format!(
                        "{}: parent '{parent}' must be the root or declared earlier",
                        child.name
                    )));
                };
                if matches!(parent_config.strategy, AllocatorStrategy::Pool { .. }) {
                    return Err(MemoryError::invalid_config(format!(
                        "{}: pool '{parent}' cannot parent other allocators",
                        child.name
                    )));
                }
            }

            child.strategy.validate(&child.name)?;
        }
        Ok(())
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> MemoryResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> MemoryResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
