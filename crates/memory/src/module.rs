//! Host module hooks
//!
//! The engine host drives every module through `configure → initialize →
//! shutdown`, in that order. [`MemoryModule`] maps those hooks onto the
//! allocator hierarchy's lifecycle.

use tracing::info;

use crate::error::MemoryResult;
use crate::hierarchy::{AllocatorHierarchy, HierarchyConfig, ShutdownReport};

/// Dependency declarations collected during `configure`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleContext {
    dependencies: Vec<String>,
}

impl ModuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `module` to be initialized before the caller
    pub fn depends_on(&mut self, module: impl Into<String>) {
        let module = module.into();
        if !self.dependencies.contains(&module) {
            self.dependencies.push(module);
        }
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Lifecycle contract between the host and an engine module
pub trait Module {
    fn name(&self) -> &str;

    /// Declare dependencies and intentions; must not allocate
    fn configure(&mut self, context: &mut ModuleContext) -> MemoryResult<()>;

    fn initialize(&mut self) -> MemoryResult<()>;

    /// Release everything; called once, after `initialize` or instead of it
    fn shutdown(&mut self) -> MemoryResult<()>;
}

/// The memory module: owns the allocator hierarchy
#[derive(Debug)]
pub struct MemoryModule {
    config: HierarchyConfig,
    hierarchy: AllocatorHierarchy,
    last_report: Option<ShutdownReport>,
}

impl Default for MemoryModule {
    fn default() -> Self {
        Self::new(HierarchyConfig::engine_default())
    }
}

impl MemoryModule {
    pub const NAME: &'static str = "memory";

    pub fn new(config: HierarchyConfig) -> Self {
        Self {
            config,
            hierarchy: AllocatorHierarchy::new(),
            last_report: None,
        }
    }

    pub fn hierarchy(&self) -> &AllocatorHierarchy {
        &self.hierarchy
    }

    /// Report produced by the last `shutdown`
    pub fn last_shutdown_report(&self) -> Option<&ShutdownReport> {
        self.last_report.as_ref()
    }
}

impl Module for MemoryModule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn configure(&mut self, _context: &mut ModuleContext) -> MemoryResult<()> {
        // no dependencies besides the host itself
        self.hierarchy.configure(self.config.clone())?;
        info!(module = Self::NAME, "module configured");
        Ok(())
    }

    fn initialize(&mut self) -> MemoryResult<()> {
        self.hierarchy.initialize()?;
        info!(module = Self::NAME, "module initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> MemoryResult<()> {
        let report = self.hierarchy.shutdown();
        info!(
            module = Self::NAME,
            leaks = report.leak_count(),
            "module shut down"
        );
        self.last_report = Some(report);
        Ok(())
    }
}
