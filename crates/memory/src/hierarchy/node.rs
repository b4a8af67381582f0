//! Hierarchy nodes and the allocator variants they can hold

use core::alloc::Layout;
use core::ptr::NonNull;

use tracing::{debug, warn};

use super::config::{AllocatorStrategy, ChildConfig, RootConfig};
use crate::allocator::{
    Allocator, ArenaAllocator, LeakReport, PoolAllocator, SystemAllocator, TrackingAllocator,
    layout_from_size_align,
};
use crate::error::{MemoryError, MemoryResult};
use crate::region::Region;

/// What the hierarchy needs from a node beyond the [`Allocator`] contract
pub(crate) trait ManagedAllocator: Allocator + Send {
    /// Release everything handed out so far in one step
    ///
    /// # Safety
    ///
    /// No pointer previously returned by this allocator may be used again.
    unsafe fn reset_all(&self) -> MemoryResult<()> {
        Err(MemoryError::not_supported(self.name(), "reset"))
    }

    /// Emit leak diagnostics; `None` when the node is not tracked
    fn report_leaks(&self) -> Option<LeakReport> {
        None
    }

    /// Bytes still handed out, for nodes without a live table
    fn outstanding_bytes(&self) -> usize {
        self.used_memory()
    }
}

impl ManagedAllocator for ArenaAllocator {
    unsafe fn reset_all(&self) -> MemoryResult<()> {
        // SAFETY: Forwarded precondition
        unsafe { self.reset() };
        Ok(())
    }

    /// Arenas release in bulk; whatever is left at teardown is not a leak
    fn outstanding_bytes(&self) -> usize {
        0
    }
}

impl ManagedAllocator for PoolAllocator {
    unsafe fn reset_all(&self) -> MemoryResult<()> {
        // SAFETY: Forwarded precondition
        unsafe { self.reset() };
        Ok(())
    }
}

impl ManagedAllocator for SystemAllocator {}

impl<A: ManagedAllocator> ManagedAllocator for TrackingAllocator<A> {
    unsafe fn reset_all(&self) -> MemoryResult<()> {
        // SAFETY: Forwarded precondition
        unsafe { self.inner().reset_all()? };
        self.forget_all();
        Ok(())
    }

    fn report_leaks(&self) -> Option<LeakReport> {
        Some(TrackingAllocator::report_leaks(self))
    }
}

/// Bytes a child borrowed from its parent
#[derive(Debug, Clone, Copy)]
pub(crate) struct Slab {
    pub(crate) ptr: NonNull<u8>,
    pub(crate) layout: Layout,
}

// SAFETY: A slab is only an address + layout record; the memory is owned by
// the parent node and travels with the hierarchy.
unsafe impl Send for Slab {}

pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) kind: &'static str,
    pub(crate) tracked: bool,
    /// Index of the parent node; `None` only for the root
    pub(crate) parent: Option<usize>,
    pub(crate) children: Vec<usize>,
    pub(crate) slab: Option<Slab>,
    pub(crate) allocator: Box<dyn ManagedAllocator>,
}

impl Node {
    pub(crate) fn root(config: &RootConfig, abort_on_corruption: bool) -> Self {
        let system = match config.limit {
            Some(limit) => SystemAllocator::with_limit(config.name.clone(), limit),
            None => SystemAllocator::new(config.name.clone()),
        };

        Self {
            name: config.name.clone(),
            kind: "system",
            tracked: config.tracked,
            parent: None,
            children: Vec::new(),
            slab: None,
            allocator: wrap(system, config.tracked, abort_on_corruption),
        }
    }

    /// Build `config` on top of `parent`, carving its slab when the strategy
    /// needs one
    ///
    /// The slab goes back to the parent if the child cannot be built.
    pub(crate) fn child(
        config: &ChildConfig,
        parent_index: usize,
        parent: &dyn ManagedAllocator,
        abort_on_corruption: bool,
    ) -> MemoryResult<Self> {
        let tracked = config.is_tracked();
        let slab = match config.strategy.slab()? {
            Some((size, align)) => {
                let layout = layout_from_size_align(size, align)?;
                let ptr = parent.allocate(layout)?.cast::<u8>();
                debug!(
                    allocator = %config.name,
                    parent = %parent.name(),
                    size,
                    align,
                    "carved child slab"
                );
                Some(Slab { ptr, layout })
            }
            None => None,
        };

        let built = build_allocator(config, slab, tracked, abort_on_corruption);
        let allocator = match built {
            Ok(allocator) => allocator,
            Err(err) => {
                if let Some(slab) = slab {
                    // SAFETY: The slab was allocated from `parent` above with
                    // this layout and nothing else has seen it.
                    let released = unsafe { parent.deallocate(slab.ptr, slab.layout) };
                    if let Err(release_err) = released {
                        warn!(
                            allocator = %config.name,
                            parent = %parent.name(),
                            error = %release_err,
                            "failed to return slab after build failure"
                        );
                    }
                }
                return Err(err);
            }
        };

        Ok(Self {
            name: config.name.clone(),
            kind: config.strategy.kind(),
            tracked,
            parent: Some(parent_index),
            children: Vec::new(),
            slab,
            allocator,
        })
    }
}

fn build_allocator(
    config: &ChildConfig,
    slab: Option<Slab>,
    tracked: bool,
    abort_on_corruption: bool,
) -> MemoryResult<Box<dyn ManagedAllocator>> {
    let name = config.name.clone();
    // SAFETY: The slab was just carved from the parent, which outlives this
    // child: teardown drops children before returning their slabs.
    let region = slab.map(|slab| unsafe { Region::from_raw_parts(slab.ptr, slab.layout.size()) });

    let allocator = match (&config.strategy, region) {
        (AllocatorStrategy::Arena { .. }, Some(region)) => {
            // SAFETY: See above
            let arena = unsafe { ArenaAllocator::from_region(name, region) };
            wrap(arena, tracked, abort_on_corruption)
        }
        (
            &AllocatorStrategy::Pool {
                block_size,
                block_align,
                block_count,
            },
            Some(region),
        ) => {
            // SAFETY: See above
            let pool = unsafe {
                PoolAllocator::from_region(name, region, block_size, block_align, block_count)?
            }
            .with_abort_on_corruption(abort_on_corruption);
            wrap(pool, tracked, abort_on_corruption)
        }
        (&AllocatorStrategy::System { limit }, None) => {
            let system = match limit {
                Some(limit) => SystemAllocator::with_limit(name, limit),
                None => SystemAllocator::new(name),
            };
            wrap(system, tracked, abort_on_corruption)
        }
        _ => {
            return Err(MemoryError::invalid_config(format!(
                "{}: slab does not match the {} strategy",
                config.name,
                config.strategy.kind()
            )));
        }
    };
    Ok(allocator)
}

fn wrap<A>(allocator: A, tracked: bool, abort_on_corruption: bool) -> Box<dyn ManagedAllocator>
where
    A: ManagedAllocator + 'static,
{
    if tracked {
        Box::new(TrackingAllocator::new(allocator).with_abort_on_corruption(abort_on_corruption))
    } else {
        Box::new(allocator)
    }
}
