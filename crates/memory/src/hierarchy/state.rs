//! Hierarchy lifecycle states

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the allocator hierarchy is in its lifecycle
///
/// ```text
/// Unconfigured → Configured → Initialized → ShuttingDown → Shutdown
///        └───────────┴──────────────────────────┘ (shutdown without init)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No children declared yet
    #[default]
    Unconfigured,
    /// Children declared, no memory reserved
    Configured,
    /// Root and children exist; the only state that serves allocations
    Initialized,
    /// Teardown in progress
    ShuttingDown,
    /// Everything released; terminal
    Shutdown,
}

impl LifecycleState {
    /// Allocation requests are only honoured here
    #[must_use]
    pub fn accepts_allocations(&self) -> bool {
        matches!(self, Self::Initialized)
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    #[must_use]
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        use LifecycleState::{Configured, Initialized, Shutdown, ShuttingDown, Unconfigured};

        match (self, target) {
            (Unconfigured, Configured) => true,
            // re-declaring children before anything is built
            (Configured, Configured) => true,
            (Configured, Initialized) => true,
            (Initialized, ShuttingDown) => true,
            (ShuttingDown, Shutdown) => true,

            // nothing was built, so there is nothing to tear down
            (Unconfigured | Configured, Shutdown) => true,

            _ => false,
        }
    }

    #[must_use]
    pub fn next_states(&self) -> &'static [LifecycleState] {
        use LifecycleState::{Configured, Initialized, Shutdown, ShuttingDown, Unconfigured};

        match self {
            Unconfigured => &[Configured, Shutdown],
            Configured => &[Configured, Initialized, Shutdown],
            Initialized => &[ShuttingDown],
            ShuttingDown => &[Shutdown],
            Shutdown => &[],
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "Unconfigured",
            Self::Configured => "Configured",
            Self::Initialized => "Initialized",
            Self::ShuttingDown => "ShuttingDown",
            Self::Shutdown => "Shutdown",
        };
        write!(f, "{name}")
    }
}
