//! Sync error taxonomy.
//!
//! The original recovery policy, expressed as result variants instead of
//! exceptions: recover locally only where retries are safe and bounded;
//! everywhere else surface to the driver, which decides continue, sleep,
//! or park the node in `FATAL` by category.

use ripple_pool::PoolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfacing to the sync driver.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Applying an entry failed in a way correctness cannot survive.
    /// Divergence is worse than downtime: the node goes `FATAL`.
    #[error("fatal apply error: {reason}")]
    Fatal {
        /// What failed.
        reason: String,
    },

    /// The node was elected primary mid-apply; the current apply aborts
    /// cleanly and the driver idles.
    #[error("stopping apply, we are now primary")]
    BecamePrimary,

    /// A recoverable condition; the driver sleeps briefly and retries.
    #[error("transient sync error: {reason}")]
    Transient {
        /// What failed.
        reason: String,
    },

    /// The test-only forced initial-sync failure counter fired.
    #[error("forced initial sync failure")]
    ForcedFailure,

    /// Slave-delay arithmetic produced an absurd lag; the clocks of this
    /// node and its source disagree.
    #[error("slave delay differential too big, check clocks and systems: {lag_secs}s")]
    ClockSkew {
        /// The computed differential.
        lag_secs: u64,
    },

    /// A second sync driver was constructed for the same node.
    #[error("more than one sync driver for this node")]
    DriverExists,

    /// A worker pool could not be brought up.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl SyncError {
    /// True if the driver must park the node in `FATAL` rather than
    /// retry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::ClockSkew { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SyncError::Fatal { reason: "apply failed".into() }.is_fatal());
        assert!(SyncError::ClockSkew { lag_secs: 1 << 31 }.is_fatal());

        assert!(!SyncError::BecamePrimary.is_fatal());
        assert!(!SyncError::Transient { reason: "queue hiccup".into() }.is_fatal());
        assert!(!SyncError::ForcedFailure.is_fatal());
    }
}
