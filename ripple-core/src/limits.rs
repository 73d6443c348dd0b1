//! System limits and timing bounds.
//!
//! Put limits on everything: every queue, pool, map, and sleep in the
//! engine has an explicit maximum, collected here so the whole schedule is
//! visible in one place.

use std::time::Duration;

/// System-wide limits for the Ripple applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Batch and pool sizing.
    /// Maximum ops drained into one batch.
    pub batch_max: u32,
    /// Writer pool size (`N_WRITERS`). Must be at least 1.
    pub writer_threads: u32,
    /// Prefetch pool size.
    pub prefetch_threads: u32,

    // Ghost tracking.
    /// Ghost registry size past which registration warns.
    pub max_ghosts: u32,

    // Slave delay.
    /// Lag beyond which slave-delay arithmetic is assumed to be clock skew.
    pub max_slave_delay_lag_secs: u64,
    /// Longest single slave-delay sleep segment; the tunable is re-read
    /// between segments so reconfiguration takes effect.
    pub slave_delay_segment: Duration,

    // Tail loop pacing.
    /// How often the batching loop re-checks node state.
    pub state_check_interval: Duration,
    /// Longest single wait inside `blocking_peek`.
    pub blocking_peek_wait: Duration,

    // Driver sleep schedule.
    /// Sleep when no replica set config has arrived yet.
    pub sleep_no_config: Duration,
    /// Sleep while blocked, fatal, or still starting up.
    pub sleep_blocked: Duration,
    /// Sleep while primary.
    pub sleep_primary: Duration,
    /// Sleep after a recoverable sync error.
    pub sleep_recoverable: Duration,
    /// Sleep after an unexpected error.
    pub sleep_unknown: Duration,
    /// Sleep between driver iterations.
    pub sleep_between: Duration,

    // Initial-sync progress metering.
    /// Emit a progress line only after this many additional ops...
    pub initial_sync_progress_ops: u64,
    /// ...and at least this much time since the previous line.
    pub initial_sync_progress_interval: Duration,
}

impl Limits {
    /// Creates limits with production defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            batch_max: 128,
            writer_threads: 16,
            prefetch_threads: 16,

            max_ghosts: 10_000,

            max_slave_delay_lag_secs: 1 << 30,
            slave_delay_segment: Duration::from_secs(60),

            state_check_interval: Duration::from_secs(1),
            blocking_peek_wait: Duration::from_secs(1),

            sleep_no_config: Duration::from_secs(20),
            sleep_blocked: Duration::from_secs(5),
            sleep_primary: Duration::from_secs(1),
            sleep_recoverable: Duration::from_secs(10),
            sleep_unknown: Duration::from_secs(60),
            sleep_between: Duration::from_secs(1),

            initial_sync_progress_ops: 1000,
            initial_sync_progress_interval: Duration::from_secs(10),
        }
    }

    /// Creates limits for tests: same batch semantics, millisecond sleeps.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            batch_max: 128,
            writer_threads: 4,
            prefetch_threads: 2,

            max_ghosts: 10_000,

            max_slave_delay_lag_secs: 1 << 30,
            slave_delay_segment: Duration::from_millis(50),

            state_check_interval: Duration::from_millis(20),
            blocking_peek_wait: Duration::from_millis(10),

            sleep_no_config: Duration::from_millis(20),
            sleep_blocked: Duration::from_millis(10),
            sleep_primary: Duration::from_millis(5),
            sleep_recoverable: Duration::from_millis(10),
            sleep_unknown: Duration::from_millis(20),
            sleep_between: Duration::from_millis(2),

            initial_sync_progress_ops: 1000,
            initial_sync_progress_interval: Duration::from_secs(10),
        }
    }

    /// Validates that the limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limit is invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.batch_max == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "batch_max",
                reason: "must be positive",
            });
        }
        if self.writer_threads == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "writer_threads",
                reason: "must be at least 1",
            });
        }
        if self.prefetch_threads == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "prefetch_threads",
                reason: "must be at least 1",
            });
        }
        if self.slave_delay_segment.is_zero() {
            return Err(crate::Error::InvalidArgument {
                name: "slave_delay_segment",
                reason: "must be positive",
            });
        }
        if self.state_check_interval.is_zero() {
            return Err(crate::Error::InvalidArgument {
                name: "state_check_interval",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
