//! Node replication state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::info;

/// Replication role of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Booting; no config applied yet.
    Startup,
    /// Applying oplog but not yet consistent enough to serve reads.
    Recovering,
    /// Live secondary, tailing its sync source.
    Secondary,
    /// Elected primary. The applier never writes in this state.
    Primary,
    /// Voting-only member; never applies ops.
    Arbiter,
    /// Terminal failure state. Divergence is worse than downtime.
    Fatal,
}

impl NodeState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Startup => 0,
            Self::Recovering => 1,
            Self::Secondary => 2,
            Self::Primary => 3,
            Self::Arbiter => 4,
            Self::Fatal => 5,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Recovering,
            2 => Self::Secondary,
            3 => Self::Primary,
            4 => Self::Arbiter,
            5 => Self::Fatal,
            _ => Self::Startup,
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Startup => "STARTUP",
            Self::Recovering => "RECOVERING",
            Self::Secondary => "SECONDARY",
            Self::Primary => "PRIMARY",
            Self::Arbiter => "ARBITER",
            Self::Fatal => "FATAL",
        };
        f.write_str(name)
    }
}

/// Shared, lock-free view of the node's replication state.
///
/// Cloning the handle shares the underlying state. Transitions are set by
/// the sync driver (and externally by election/stepdown, which this crate
/// does not model); every component reads through the same handle.
#[derive(Debug, Clone, Default)]
pub struct StateHandle {
    state: Arc<AtomicU8>,
}

impl StateHandle {
    /// Creates a handle starting in [`NodeState::Startup`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle starting in the given state.
    #[must_use]
    pub fn starting_in(state: NodeState) -> Self {
        let handle = Self::new();
        handle.state.store(state.as_u8(), Ordering::SeqCst);
        handle
    }

    /// Returns the current state.
    #[must_use]
    pub fn get(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Transitions to a new state.
    pub fn set(&self, next: NodeState) {
        let prev = NodeState::from_u8(self.state.swap(next.as_u8(), Ordering::SeqCst));
        if prev != next {
            info!(from = %prev, to = %next, "replication state change");
        }
    }

    /// True if the node is currently primary.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.get() == NodeState::Primary
    }

    /// True if the node is currently a live secondary.
    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.get() == NodeState::Secondary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_all_states() {
        let handle = StateHandle::new();
        for state in [
            NodeState::Startup,
            NodeState::Recovering,
            NodeState::Secondary,
            NodeState::Primary,
            NodeState::Arbiter,
            NodeState::Fatal,
        ] {
            handle.set(state);
            assert_eq!(handle.get(), state);
        }
    }

    #[test]
    fn test_shared_between_clones() {
        let a = StateHandle::new();
        let b = a.clone();
        a.set(NodeState::Secondary);
        assert!(b.is_secondary());
        assert!(!b.is_primary());
    }
}
