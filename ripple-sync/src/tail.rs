//! The oplog tail loop: assemble a batch, pace it, apply it, log it.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ripple_core::OplogEntry;
use ripple_store::{LocalStore, LockManager};
use tracing::warn;

use crate::apply::{ApplyMode, BatchApplier};
use crate::error::{SyncError, SyncResult};
use crate::minvalid::MinValidJournal;
use crate::node::NodeHandle;
use crate::queue::OplogSource;

fn wall_clock_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs())
}

/// Tails the upstream queue and applies batches until the node becomes
/// primary, a single-node set needs a state check, or shutdown.
///
/// Per iteration: drain ops until the batch limit or a command boundary,
/// pace slave delay, persist `minValid`, apply the batch in parallel,
/// then append the applied ops to the local oplog and notify upstream.
pub struct OplogTail {
    pub(crate) node: Arc<NodeHandle>,
    pub(crate) queue: Arc<dyn OplogSource>,
    pub(crate) applier: Arc<BatchApplier>,
    pub(crate) local: Arc<dyn LocalStore>,
    pub(crate) locks: LockManager,
    pub(crate) minvalid: MinValidJournal,
}

impl OplogTail {
    /// Creates a tail over the node's queue and applier.
    pub fn new(
        node: Arc<NodeHandle>,
        queue: Arc<dyn OplogSource>,
        applier: Arc<BatchApplier>,
        local: Arc<dyn LocalStore>,
        locks: LockManager,
    ) -> Self {
        let minvalid = MinValidJournal::new(Arc::clone(&local), locks.clone());
        Self { node, queue, applier, local, locks, minvalid }
    }

    /// The `minValid` journal this tail records through.
    #[must_use]
    pub fn minvalid(&self) -> &MinValidJournal {
        &self.minvalid
    }

    /// Tails the oplog. Ok to return; the driver re-calls it.
    ///
    /// # Errors
    /// Returns a fatal error if a batch cannot be applied safely, or a
    /// clock-skew error from slave-delay pacing.
    ///
    /// # Panics
    /// Panics if an iteration starts while the thread holds locks.
    pub fn run(&self) -> SyncResult<()> {
        let limits = *self.node.limits();
        let batch_max = limits.batch_max as usize;

        loop {
            if self.node.is_shutdown() {
                return Ok(());
            }

            assert!(!LockManager::is_locked(), "tail iteration entered holding locks");

            let mut ops: Vec<OplogEntry> = Vec::new();
            let mut last_checked = Instant::now();

            // Always fetch a few ops first. If that already closed the
            // batch (it drained a command), nothing may join it.
            let mut filling = self.try_pop_and_wait_for_more(&mut ops);

            while filling && ops.len() < batch_max {
                if self.node.is_shutdown() {
                    return Ok(());
                }

                // Occasionally check some things.
                if ops.is_empty() || last_checked.elapsed() >= limits.state_check_interval {
                    last_checked = Instant::now();
                    if self.node.state().is_primary() {
                        return Ok(());
                    }
                    // Can we become secondary? This must be checked before
                    // the election machinery runs: only a secondary can
                    // become primary.
                    if !self.node.state().is_secondary() {
                        let _ = self.minvalid.try_go_live(&self.node);
                    }
                    // A single-node set has no heartbeat threads, so nudge
                    // the state check ourselves; a stepped-down singleton
                    // needs it to come back up.
                    if let Some(config) = self.node.config() {
                        if config.is_single_node()
                            && config.self_member().is_some_and(|m| !m.arbiter_only)
                        {
                            self.node.request_state_check();
                            thread::sleep(limits.sleep_between);
                            return Ok(());
                        }
                    }
                }

                filling = self.try_pop_and_wait_for_more(&mut ops);
            }

            let Some(last) = ops.last().cloned() else {
                continue;
            };

            self.handle_slave_delay(&last)?;

            // Set minValid to the last op of this batch. If we crash
            // before the whole batch reaches the local oplog, the node
            // reboots into RECOVERING until it re-reaches this optime.
            self.minvalid.record(&last);

            match self.applier.multi_apply(&ops, ApplyMode::Tail) {
                Ok(()) => {}
                // The driver observes the primary state and idles.
                Err(SyncError::BecamePrimary) => return Ok(()),
                Err(err) => return Err(err),
            }

            self.clear_ops(&mut ops);
        }
    }

    /// Drains at most one op into `ops`, honoring batch boundaries.
    ///
    /// Returns true if the caller should keep waiting for more entries,
    /// false if it should stop and apply the batch it has. A command
    /// starts or ends a batch alone: it is only consumed into an empty
    /// batch, and nothing joins a batch after it.
    pub fn try_pop_and_wait_for_more(&self, ops: &mut Vec<OplogEntry>) -> bool {
        let Some(op) = self.queue.peek() else {
            if ops.is_empty() {
                // Nothing queued and nothing batched: block a bit.
                self.queue.blocking_peek(self.node.limits().blocking_peek_wait);
                return true;
            }
            // Otherwise, apply what we have.
            return false;
        };

        if op.is_command() {
            if ops.is_empty() {
                // Apply commands one at a time.
                ops.push(op);
                self.queue.consume();
            }
            // Apply what we have so far and come back for the command.
            return false;
        }

        ops.push(op);
        self.queue.consume();
        true
    }

    /// Holds the batch back until `last` is at least `slave_delay` old.
    ///
    /// Sleeps in segments so a reconfiguration takes effect within one
    /// segment. Ignored until the node is secondary.
    ///
    /// # Errors
    /// Returns [`SyncError::ClockSkew`] if the computed differential is
    /// absurd.
    pub(crate) fn handle_slave_delay(&self, last: &OplogEntry) -> SyncResult<()> {
        let delay_secs = self.node.options().slave_delay_secs();
        // Ignore slaveDelay if the box is still initializing; once it
        // becomes secondary we can worry about it.
        if delay_secs == 0 || !self.node.state().is_secondary() {
            return Ok(());
        }

        let limits = self.node.limits();
        let op_secs = i64::from(last.ts.secs());
        let now = i64::try_from(wall_clock_secs()).unwrap_or(i64::MAX);
        let lag = now - op_secs;
        let sleep_secs = i64::try_from(delay_secs).unwrap_or(i64::MAX).saturating_sub(lag);
        if sleep_secs <= 0 {
            return Ok(());
        }
        let sleep_secs = sleep_secs.unsigned_abs();
        if sleep_secs >= limits.max_slave_delay_lag_secs {
            return Err(SyncError::ClockSkew { lag_secs: sleep_secs });
        }

        let total = Duration::from_secs(sleep_secs);
        if total <= limits.slave_delay_segment {
            thread::sleep(total);
            return Ok(());
        }

        warn!(secs = sleep_secs, "slavedelay sleep long time");
        // Sleeping the whole delay in one stretch would keep reconfigs
        // from taking effect.
        let wait_until = Instant::now() + total;
        loop {
            thread::sleep(limits.slave_delay_segment);
            if Instant::now() >= wait_until {
                break;
            }
            if self.node.options().slave_delay_secs() != delay_secs {
                break; // reconf
            }
            if self.node.is_shutdown() {
                break;
            }
        }
        Ok(())
    }

    /// Appends every applied op to the local oplog under one local-db
    /// write lock, flushing the journal as it goes, then reports the new
    /// applied position upstream. All accepted entries are appended,
    /// noops included.
    pub(crate) fn clear_ops(&self, ops: &mut Vec<OplogEntry>) {
        {
            let _ctx = self.locks.db_write("local");
            for op in ops.drain(..) {
                self.local.log_op(&op);
                self.local.commit_if_needed();
            }
        }
        // Let the upstream catch up.
        self.queue.notify(self.local.last_applied());
    }
}
