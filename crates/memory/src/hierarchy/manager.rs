//! Allocator hierarchy lifecycle manager
//!
//! Owns the root allocator and every named child, in creation order. Index
//! order doubles as dependency order: a child's parent always sits at a
//! lower index, so tearing down from the back releases leaves first and
//! returns each slab to a parent that is still alive.

use core::alloc::Layout;
use core::ops::Range;
use core::ptr::NonNull;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::HierarchyConfig;
use super::node::Node;
use super::state::LifecycleState;
use crate::allocator::{Allocator, AllocatorStats, LEAK_SUMMARY_TARGET, LeakReport};
use crate::error::{AllocResult, MemoryError, MemoryResult};

/// Usage snapshot of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeUsage {
    pub name: String,
    pub kind: &'static str,
    pub parent: Option<String>,
    pub tracked: bool,
    pub used: usize,
    pub total: Option<usize>,
    pub stats: AllocatorStats,
}

/// Bytes an untracked pool or system node still had handed out at teardown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutstandingBytes {
    pub allocator: String,
    pub kind: &'static str,
    pub bytes: usize,
}

/// Outcome of [`AllocatorHierarchy::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Non-empty leak reports of tracked nodes, leaves first
    pub leaks: Vec<LeakReport>,
    /// Untracked nodes released with bytes still in use, leaves first
    pub outstanding: Vec<OutstandingBytes>,
    /// Per-node usage right before teardown, in creation order
    pub usage: Vec<NodeUsage>,
}

impl ShutdownReport {
    /// Nothing was released while still in use
    pub fn is_clean(&self) -> bool {
        self.leaks.is_empty() && self.outstanding.is_empty()
    }

    /// Total leaked allocations across all nodes
    pub fn leak_count(&self) -> usize {
        self.leaks.iter().map(LeakReport::count).sum()
    }

    /// Leaked bytes of tracked nodes plus outstanding bytes of untracked ones
    pub fn leaked_bytes(&self) -> usize {
        self.leaks.iter().map(LeakReport::total_bytes).sum::<usize>()
            + self.outstanding.iter().map(|node| node.bytes).sum::<usize>()
    }

    pub fn leaks_for(&self, name: &str) -> Option<&LeakReport> {
        self.leaks.iter().find(|report| report.allocator == name)
    }
}

/// Root allocator plus named children, driven through [`LifecycleState`]
///
/// ```text
/// configure(config)  Unconfigured → Configured     (validates, reserves nothing)
/// initialize()       Configured   → Initialized    (root first, then children)
/// shutdown()         Initialized  → Shutdown       (children last-to-first, root last)
/// ```
///
/// # Examples
/// ```rust
/// use core::alloc::Layout;
/// use hive_memory::hierarchy::{AllocatorHierarchy, HierarchyConfig};
///
/// let mut hierarchy = AllocatorHierarchy::new();
/// hierarchy.configure(
///     HierarchyConfig::new("global")
///         .with_arena("frame", 64 * 1024)
///         .with_pool("entities", 64, 16, 128),
/// )?;
/// hierarchy.initialize()?;
///
/// let block = hierarchy.allocate("entities", Layout::new::<[u64; 8]>())?;
/// unsafe { hierarchy.deallocate("entities", block.cast(), Layout::new::<[u64; 8]>())? };
///
/// let report = hierarchy.shutdown();
/// assert!(report.is_clean());
/// # Ok::<(), hive_memory::MemoryError>(())
/// ```
pub struct AllocatorHierarchy {
    state: LifecycleState,
    config: Option<HierarchyConfig>,
    /// Root at index 0, children in creation order
    nodes: Vec<Node>,
}

impl Default for AllocatorHierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl AllocatorHierarchy {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Unconfigured,
            config: None,
            nodes: Vec::new(),
        }
    }

    #[inline]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn config(&self) -> Option<&HierarchyConfig> {
        self.config.as_ref()
    }

    /// Names of the live allocators, root first
    pub fn allocator_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|node| node.name.as_str())
    }

    /// Declare the hierarchy; may be repeated until [`initialize`](Self::initialize)
    pub fn configure(&mut self, config: HierarchyConfig) -> MemoryResult<()> {
        self.ensure_transition(LifecycleState::Configured, "configure")?;
        config.validate()?;

        info!(
            root = %config.root.name,
            children = config.children.len(),
            tracked = config.root.tracked,
            "allocator hierarchy configured"
        );
        self.config = Some(config);
        self.state = LifecycleState::Configured;
        Ok(())
    }

    /// Build the root and every declared child
    ///
    /// On failure everything created so far is released again, last to
    /// first, and the hierarchy stays `Configured`.
    pub fn initialize(&mut self) -> MemoryResult<()> {
        self.ensure_transition(LifecycleState::Initialized, "initialize")?;
        let Some(config) = self.config.clone() else {
            return Err(MemoryError::hierarchy_misuse("initialize", self.state));
        };

        info!(
            root = %config.root.name,
            children = config.children.len(),
            "initializing allocator hierarchy"
        );

        if let Err(err) = self.build(&config) {
            warn!(error = %err, created = self.nodes.len(), "hierarchy initialization failed, rolling back");
            self.teardown();
            return Err(err);
        }

        self.state = LifecycleState::Initialized;
        info!(allocators = self.nodes.len(), "allocator hierarchy initialized");
        Ok(())
    }

    fn build(&mut self, config: &HierarchyConfig) -> MemoryResult<()> {
        let abort = config.abort_on_corruption;
        self.nodes.push(Node::root(&config.root, abort));

        for child in &config.children {
            let parent_index = match child.parent.as_deref() {
                None => 0,
                Some(parent) => self
                    .index_of(parent)
                    .ok_or_else(|| MemoryError::unknown_allocator(parent))?,
            };

            let node = Node::child(child, parent_index, &*self.nodes[parent_index].allocator, abort)?;
            debug!(
                allocator = %node.name,
                kind = node.kind,
                parent = %self.nodes[parent_index].name,
                tracked = node.tracked,
                "child allocator created"
            );

            let index = self.nodes.len();
            self.nodes[parent_index].children.push(index);
            self.nodes.push(node);
        }
        Ok(())
    }

    /// Tear the hierarchy down, reporting leaks of every tracked node
    ///
    /// Idempotent: later calls return an empty report and log nothing but a
    /// debug line. Calling it before `initialize` just moves to `Shutdown`.
    pub fn shutdown(&mut self) -> ShutdownReport {
        match self.state {
            LifecycleState::Shutdown => {
                debug!("allocator hierarchy already shut down");
                return ShutdownReport::default();
            }
            LifecycleState::Unconfigured | LifecycleState::Configured => {
                self.state = LifecycleState::Shutdown;
                info!("allocator hierarchy shut down before initialization");
                return ShutdownReport::default();
            }
            LifecycleState::Initialized | LifecycleState::ShuttingDown => {}
        }

        self.state = LifecycleState::ShuttingDown;
        info!(allocators = self.nodes.len(), "shutting down allocator hierarchy");

        let usage = self.collect_usage();
        for node in &usage {
            info!(
                allocator = %node.name,
                kind = node.kind,
                used = node.used,
                peak = node.stats.peak_allocated_bytes,
                allocations = node.stats.allocation_count,
                "allocator usage at shutdown"
            );
        }

        let (leaks, outstanding) = self.teardown();
        self.state = LifecycleState::Shutdown;

        let report = ShutdownReport {
            leaks,
            outstanding,
            usage,
        };
        if report.is_clean() {
            info!("allocator hierarchy shut down cleanly");
        } else {
            warn!(
                allocators = report.leaks.len() + report.outstanding.len(),
                leaks = report.leak_count(),
                bytes = report.leaked_bytes(),
                "allocator hierarchy shut down with leaks"
            );
        }
        report
    }

    /// Drop nodes last to first, returning carved slabs to their parents
    ///
    /// Tracked nodes report every live allocation. Untracked pools and
    /// system allocators only know how many bytes are still out, so they
    /// get a single summary event instead.
    fn teardown(&mut self) -> (Vec<LeakReport>, Vec<OutstandingBytes>) {
        let mut leaks = Vec::new();
        let mut outstanding = Vec::new();

        while let Some(node) = self.nodes.pop() {
            let Node {
                name,
                kind,
                parent,
                slab,
                allocator,
                ..
            } = node;

            match allocator.report_leaks() {
                Some(report) if !report.is_empty() => leaks.push(report),
                Some(_) => {}
                None => {
                    let bytes = allocator.outstanding_bytes();
                    if bytes > 0 {
                        warn!(
                            target: LEAK_SUMMARY_TARGET,
                            allocator = %name,
                            kind,
                            bytes,
                            "untracked allocator released with outstanding bytes"
                        );
                        outstanding.push(OutstandingBytes {
                            allocator: name.clone(),
                            kind,
                            bytes,
                        });
                    }
                }
            }
            drop(allocator);

            if let (Some(slab), Some(parent)) = (slab, parent.and_then(|i| self.nodes.get(i))) {
                // SAFETY: The slab came from this parent with this layout and
                // the only allocator built on it was dropped above.
                let released = unsafe { parent.allocator.deallocate(slab.ptr, slab.layout) };
                if let Err(err) = released {
                    warn!(allocator = %name, parent = %parent.name, error = %err, "failed to return slab");
                }
            }
            debug!(allocator = %name, "allocator released");
        }
        (leaks, outstanding)
    }

    /// Allocate from the allocator called `name`
    ///
    /// # Errors
    /// - `HierarchyMisuse` outside `Initialized`
    /// - `UnknownAllocator` if nothing is called `name`
    /// - whatever the allocator itself returns
    pub fn allocate(&self, name: &str, layout: Layout) -> MemoryResult<NonNull<[u8]>> {
        self.serving_node(name, "allocate")?.allocator.allocate(layout)
    }

    /// Return memory to the allocator called `name`
    ///
    /// # Safety
    ///
    /// Same contract as [`Allocator::deallocate`] on that allocator.
    pub unsafe fn deallocate(
        &self,
        name: &str,
        ptr: NonNull<u8>,
        layout: Layout,
    ) -> MemoryResult<()> {
        let node = self.serving_node(name, "deallocate")?;
        // SAFETY: Forwarded to the caller
        unsafe { node.allocator.deallocate(ptr, layout) }
    }

    /// Name-addressed handle for a subsystem
    pub fn handle(&self, name: &str) -> MemoryResult<AllocatorHandle<'_>> {
        self.serving_node(name, "handle")?;
        let index = self
            .index_of(name)
            .ok_or_else(|| MemoryError::unknown_allocator(name))?;
        Ok(AllocatorHandle {
            hierarchy: self,
            index,
        })
    }

    /// Bulk-release an arena child, typically once per frame
    ///
    /// # Errors
    /// - `HierarchyMisuse` outside `Initialized`
    /// - `NotSupported` if `name` is not an arena, or other allocators are
    ///   carved from it
    ///
    /// # Safety
    ///
    /// No pointer previously handed out by that arena may be used again.
    pub unsafe fn reset_arena(&self, name: &str) -> MemoryResult<()> {
        let node = self.serving_node(name, "reset_arena")?;
        if node.kind != "arena" {
            return Err(MemoryError::not_supported(name, "reset_arena"));
        }
        if !node.children.is_empty() {
            return Err(MemoryError::not_supported(name, "reset with carved children"));
        }
        // SAFETY: Forwarded to the caller
        unsafe { node.allocator.reset_all() }
    }

    /// Names of the allocators carved directly from `name`
    pub fn children(&self, name: &str) -> MemoryResult<Vec<&str>> {
        let index = self
            .index_of(name)
            .ok_or_else(|| MemoryError::unknown_allocator(name))?;
        Ok(self.nodes[index]
            .children
            .iter()
            .map(|&child| self.nodes[child].name.as_str())
            .collect())
    }

    /// Address range of the slab `name` was carved from its parent
    ///
    /// `None` for the root and for system children, which never carve.
    pub fn carved_range(&self, name: &str) -> MemoryResult<Option<Range<usize>>> {
        let index = self
            .index_of(name)
            .ok_or_else(|| MemoryError::unknown_allocator(name))?;
        Ok(self.nodes[index].slab.map(|slab| {
            let start = slab.ptr.as_ptr() as usize;
            start..start + slab.layout.size()
        }))
    }

    /// Used/total snapshot of every live node
    pub fn usage_report(&self) -> Vec<NodeUsage> {
        self.collect_usage()
    }

    fn collect_usage(&self) -> Vec<NodeUsage> {
        self.nodes
            .iter()
            .map(|node| NodeUsage {
                name: node.name.clone(),
                kind: node.kind,
                parent: node.parent.map(|i| self.nodes[i].name.clone()),
                tracked: node.tracked,
                used: node.allocator.used_memory(),
                total: node.allocator.total_memory(),
                stats: node.allocator.stats(),
            })
            .collect()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|node| node.name == name)
    }

    fn ensure_serving(&self, operation: &'static str) -> MemoryResult<()> {
        if self.state.accepts_allocations() {
            Ok(())
        } else {
            Err(MemoryError::hierarchy_misuse(operation, self.state))
        }
    }

    fn serving_node(&self, name: &str, operation: &'static str) -> MemoryResult<&Node> {
        self.ensure_serving(operation)?;
        self.index_of(name)
            .map(|index| &self.nodes[index])
            .ok_or_else(|| MemoryError::unknown_allocator(name))
    }

    fn ensure_transition(
        &self,
        target: LifecycleState,
        operation: &'static str,
    ) -> MemoryResult<()> {
        if self.state.can_transition_to(target) {
            Ok(())
        } else {
            Err(MemoryError::hierarchy_misuse(operation, self.state))
        }
    }
}

impl Drop for AllocatorHierarchy {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.shutdown();
        }
    }
}

impl core::fmt::Debug for AllocatorHierarchy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AllocatorHierarchy")
            .field("state", &self.state)
            .field("allocators", &self.allocator_names().collect::<Vec<_>>())
            .finish()
    }
}

/// Allocator view of one hierarchy node
///
/// Every allocation re-checks the hierarchy state, so a handle never serves
/// memory from a hierarchy that is not `Initialized`.
#[derive(Clone, Copy)]
pub struct AllocatorHandle<'h> {
    hierarchy: &'h AllocatorHierarchy,
    index: usize,
}

impl AllocatorHandle<'_> {
    fn node(&self) -> &Node {
        &self.hierarchy.nodes[self.index]
    }

    pub fn kind(&self) -> &'static str {
        self.node().kind
    }
}

// SAFETY: Forwards to the node's allocator, which upholds the contract; the
// extra state check only turns requests into errors.
unsafe impl Allocator for AllocatorHandle<'_> {
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<[u8]>> {
        self.hierarchy.ensure_serving("allocate")?;
        self.node().allocator.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) -> AllocResult<()> {
        self.hierarchy.ensure_serving("deallocate")?;
        // SAFETY: Forwarded to the caller
        unsafe { self.node().allocator.deallocate(ptr, layout) }
    }

    fn name(&self) -> &str {
        &self.node().name
    }

    fn used_memory(&self) -> usize {
        self.node().allocator.used_memory()
    }

    fn total_memory(&self) -> Option<usize> {
        self.node().allocator.total_memory()
    }

    fn stats(&self) -> AllocatorStats {
        self.node().allocator.stats()
    }
}

impl core::fmt::Debug for AllocatorHandle<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AllocatorHandle")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
