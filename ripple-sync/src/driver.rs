//! The sync driver: the top-level replication state machine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use ripple_core::NodeState;
use ripple_store::{DocumentEngine, LocalStore, LockManager};
use tracing::{error, info, warn};

use crate::apply::{BatchApplier, MissingFetcher};
use crate::error::{SyncError, SyncResult};
use crate::initial::InitialSyncApplier;
use crate::minvalid::MinValidJournal;
use crate::node::NodeHandle;
use crate::queue::OplogSource;
use crate::tail::OplogTail;

/// Runs the external part of initial sync: clone the upstream's data set,
/// then drive the supplied applier over the oplog window that accumulated
/// meanwhile. On success the node has a non-null applied position.
pub trait InitialSyncHook: Send + Sync {
    /// Performs one initial-sync attempt.
    ///
    /// # Errors
    /// Returns an error to make the driver retry after its recoverable
    /// sleep.
    fn run(&self, applier: &InitialSyncApplier) -> SyncResult<()>;
}

/// Result of a `forceSyncFrom` admin request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForceSyncOutcome {
    /// Whether the target was accepted.
    pub ok: bool,
    /// Why the target was rejected.
    pub errmsg: Option<String>,
    /// Accepted, but with a caveat.
    pub warning: Option<String>,
    /// The member we were syncing from before, if any.
    pub prev_sync_target: Option<String>,
}

impl ForceSyncOutcome {
    fn refused(errmsg: &str) -> Self {
        Self { ok: false, errmsg: Some(errmsg.to_string()), ..Self::default() }
    }
}

/// The sync driver: owns the applier pools and the top-level loop that
/// chooses between idling, initial sync, and tailing.
///
/// Exactly one driver exists per node; constructing a second one on the
/// same [`NodeHandle`] fails.
pub struct SyncDriver {
    node: Arc<NodeHandle>,
    queue: Arc<dyn OplogSource>,
    local: Arc<dyn LocalStore>,
    locks: LockManager,
    applier: Arc<BatchApplier>,
    minvalid: MinValidJournal,
    initial: Arc<dyn InitialSyncHook>,
}

impl std::fmt::Debug for SyncDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncDriver").finish_non_exhaustive()
    }
}

impl SyncDriver {
    /// Creates the driver and its worker pools.
    ///
    /// # Errors
    /// Returns [`SyncError::DriverExists`] if a driver was already
    /// created for this node, or a pool error if workers cannot spawn.
    pub fn new(
        node: Arc<NodeHandle>,
        queue: Arc<dyn OplogSource>,
        engine: Arc<dyn DocumentEngine>,
        local: Arc<dyn LocalStore>,
        locks: LockManager,
        fetcher: Arc<dyn MissingFetcher>,
        initial: Arc<dyn InitialSyncHook>,
    ) -> SyncResult<Self> {
        if node.driver_started.swap(true, std::sync::atomic::Ordering::SeqCst) {
            error!("replSet error: more than one sync thread?");
            return Err(SyncError::DriverExists);
        }

        let applier = Arc::new(BatchApplier::new(
            engine,
            Arc::clone(&local),
            locks.clone(),
            node.state().clone(),
            fetcher,
            node.limits(),
        )?);
        let minvalid = MinValidJournal::new(Arc::clone(&local), locks.clone());

        Ok(Self { node, queue, local, locks, applier, minvalid, initial })
    }

    /// The node handle this driver serves.
    #[must_use]
    pub fn node(&self) -> &Arc<NodeHandle> {
        &self.node
    }

    fn tail(&self) -> OplogTail {
        OplogTail::new(
            Arc::clone(&self.node),
            Arc::clone(&self.queue),
            Arc::clone(&self.applier),
            Arc::clone(&self.local),
            self.locks.clone(),
        )
    }

    /// Runs the driver loop until shutdown, the node turns out to be an
    /// arbiter, or a fatal error parks it.
    ///
    /// # Panics
    /// Panics if an iteration starts while the thread holds locks.
    pub fn run(&self) {
        let limits = *self.node.limits();
        while !self.node.is_shutdown() {
            // After a reconfig we may not be in the set anymore; check
            // before trying to sync with anyone.
            let Some(config) = self.node.config() else {
                warn!("replSet warning did not receive a valid config yet, sleeping");
                thread::sleep(limits.sleep_no_config);
                continue;
            };
            match config.self_member() {
                None => {
                    warn!("replSet warning not in the member list, sleeping");
                    thread::sleep(limits.sleep_no_config);
                    continue;
                }
                Some(me) if me.arbiter_only => {
                    self.node.state().set(NodeState::Arbiter);
                    return;
                }
                Some(_) => {}
            }

            // Config received and we hold data: leave STARTUP.
            if self.node.state().get() == NodeState::Startup {
                self.node.state().set(NodeState::Recovering);
            }

            assert!(!LockManager::is_locked(), "driver iteration entered holding locks");

            match catch_unwind(AssertUnwindSafe(|| self.run_once())) {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_fatal() => {
                    error!(%err, "fatal sync error");
                    self.node.set_hb_msg(format!("syncThread: {err}"));
                    self.node.state().set(NodeState::Fatal);
                    return;
                }
                Ok(Err(err)) => {
                    self.node.set_hb_msg(format!("syncThread: {err}"));
                    thread::sleep(limits.sleep_recoverable);
                }
                Err(_) => {
                    self.node.set_hb_msg("unexpected exception in sync thread");
                    thread::sleep(limits.sleep_unknown);
                }
            }
            thread::sleep(limits.sleep_between);
        }
    }

    /// One driver pass: idle, initial-sync, or tail, by state.
    fn run_once(&self) -> SyncResult<()> {
        let limits = self.node.limits();
        match self.node.state().get() {
            NodeState::Primary => {
                thread::sleep(limits.sleep_primary);
                return Ok(());
            }
            NodeState::Fatal | NodeState::Startup => {
                thread::sleep(limits.sleep_blocked);
                return Ok(());
            }
            _ if self.node.options().block_sync() => {
                thread::sleep(limits.sleep_blocked);
                return Ok(());
            }
            _ => {}
        }

        // Do we have anything at all?
        if self.local.last_applied().is_null() {
            info!("replSet initial sync pending");
            let applier = InitialSyncApplier::new(self.tail());
            self.initial.run(&applier)?;
            // Re-called from the top in case the sync failed.
            return Ok(());
        }

        // We have some data. Continue tailing.
        self.tail().run()
    }

    /// Attempts the RECOVERING→SECONDARY transition now.
    pub fn try_go_live(&self) -> bool {
        self.minvalid.try_go_live(&self.node)
    }

    /// Handles the `forceSyncFrom` admin command: validate the candidate
    /// and set the forced target for the upstream fetcher's next cycle.
    #[must_use]
    pub fn force_sync_from(&self, host: &str) -> ForceSyncOutcome {
        let Some(config) = self.node.config() else {
            return ForceSyncOutcome::refused("no replica set config received yet");
        };

        // Initial sanity check.
        if config.self_member().is_some_and(|me| me.arbiter_only) {
            return ForceSyncOutcome::refused("arbiters don't sync");
        }

        // Find the member we want to sync from. This also catches a
        // request to sync from ourselves: we are not in our own peer
        // lookup.
        let Some(target) = config.find_host(host) else {
            return ForceSyncOutcome::refused("could not find member in replica set");
        };

        // More sanity checks.
        if target.arbiter_only {
            return ForceSyncOutcome::refused("I cannot sync from an arbiter");
        }
        if !target.builds_indexes && config.self_member().is_some_and(|me| me.builds_indexes) {
            return ForceSyncOutcome::refused("I cannot sync from a member who does not build indexes");
        }
        if !target.healthy {
            return ForceSyncOutcome::refused("I cannot reach the requested member");
        }

        let mut outcome = ForceSyncOutcome { ok: true, ..ForceSyncOutcome::default() };
        let ours = self.local.last_applied();
        if target.optime.secs() + 10 < ours.secs() {
            warn!(
                target = %target.host,
                target_optime = %target.optime,
                ours = %ours,
                "attempting to sync from a member more than 10 seconds behind us; this may not work"
            );
            outcome.warning =
                Some("requested member is more than 10 seconds behind us".to_string());
            // Not refusing, just warning.
        }

        // Record the previous member we were syncing from.
        outcome.prev_sync_target = self.queue.sync_target().map(|prev| prev.host);

        // Finally, set the new target.
        self.node.set_forced_sync_target(target.clone());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicaConfig;
    use crate::queue::QueueBuffer;
    use bytes::Bytes;
    use ripple_core::{Limits, Member, MemberId, OpTime, OplogEntry};
    use ripple_store::{MemoryEngine, MemoryLocalStore};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NoFetcher;

    impl MissingFetcher for NoFetcher {
        fn fetch(&self, _op: &OplogEntry) -> Option<Bytes> {
            None
        }
    }

    struct NoInitialSync;

    impl InitialSyncHook for NoInitialSync {
        fn run(&self, _applier: &InitialSyncApplier) -> SyncResult<()> {
            Ok(())
        }
    }

    struct CountingInitialSync {
        runs: AtomicU32,
    }

    impl InitialSyncHook for CountingInitialSync {
        fn run(&self, applier: &InitialSyncApplier) -> SyncResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            // Seed the node: apply one entry so last_applied is non-null.
            let gte = OplogEntry::noop(OpTime::new(1, 0));
            applier.apply_until(&gte, &gte)
        }
    }

    fn members() -> Vec<Member> {
        vec![
            Member::new(MemberId::new(0), "db0:27017").with_optime(OpTime::new(100, 0)),
            Member::new(MemberId::new(1), "db1:27017").with_optime(OpTime::new(100, 0)),
            Member::new(MemberId::new(2), "db2:27017").arbiter(),
            Member::new(MemberId::new(3), "db3:27017")
                .with_builds_indexes(false)
                .with_optime(OpTime::new(100, 0)),
            Member::new(MemberId::new(4), "db4:27017")
                .with_health(false)
                .with_optime(OpTime::new(100, 0)),
            Member::new(MemberId::new(5), "db5:27017").with_optime(OpTime::new(10, 0)),
        ]
    }

    struct Rig {
        driver: SyncDriver,
        queue: QueueBuffer,
        local: Arc<MemoryLocalStore>,
    }

    fn rig(initial: Arc<dyn InitialSyncHook>) -> Rig {
        let node = NodeHandle::new(Limits::for_testing());
        node.set_config(ReplicaConfig::new(members(), MemberId::new(0)));
        let queue = QueueBuffer::new();
        let local = Arc::new(MemoryLocalStore::new());
        let driver = SyncDriver::new(
            node,
            Arc::new(queue.clone()),
            Arc::new(MemoryEngine::new()),
            Arc::clone(&local) as Arc<dyn LocalStore>,
            LockManager::new(),
            Arc::new(NoFetcher),
            initial,
        )
        .unwrap();
        Rig { driver, queue, local }
    }

    #[test]
    fn test_second_driver_fails() {
        let rig = rig(Arc::new(NoInitialSync));
        let err = SyncDriver::new(
            Arc::clone(rig.driver.node()),
            Arc::new(rig.queue.clone()),
            Arc::new(MemoryEngine::new()),
            Arc::clone(&rig.local) as Arc<dyn LocalStore>,
            LockManager::new(),
            Arc::new(NoFetcher),
            Arc::new(NoInitialSync),
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::DriverExists));
    }

    #[test]
    fn test_null_position_triggers_initial_sync() {
        let hook = Arc::new(CountingInitialSync { runs: AtomicU32::new(0) });
        let rig = rig(Arc::clone(&hook) as Arc<dyn InitialSyncHook>);
        rig.driver.node().state().set(NodeState::Recovering);

        rig.driver.run_once().unwrap();
        assert_eq!(hook.runs.load(Ordering::SeqCst), 1);
        assert_eq!(rig.local.last_applied(), OpTime::new(1, 0));

        // With a position, the next pass tails instead. Make it return
        // promptly by turning primary.
        rig.driver.node().state().set(NodeState::Primary);
        rig.driver.run_once().unwrap();
        assert_eq!(hook.runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_run_exits_for_arbiter() {
        let node = NodeHandle::new(Limits::for_testing());
        let mut ms = members();
        ms[0] = Member::new(MemberId::new(0), "db0:27017").arbiter();
        node.set_config(ReplicaConfig::new(ms, MemberId::new(0)));
        let queue = QueueBuffer::new();
        let driver = SyncDriver::new(
            node,
            Arc::new(queue),
            Arc::new(MemoryEngine::new()),
            Arc::new(MemoryLocalStore::new()),
            LockManager::new(),
            Arc::new(NoFetcher),
            Arc::new(NoInitialSync),
        )
        .unwrap();

        driver.run();
        assert_eq!(driver.node().state().get(), NodeState::Arbiter);
    }

    #[test]
    fn test_force_sync_from_accepts_healthy_member() {
        let rig = rig(Arc::new(NoInitialSync));
        rig.queue.set_sync_target(Some(Member::new(MemberId::new(5), "db5:27017")));

        let outcome = rig.driver.force_sync_from("db1:27017");
        assert!(outcome.ok, "{outcome:?}");
        assert_eq!(outcome.prev_sync_target.as_deref(), Some("db5:27017"));
        assert!(outcome.warning.is_none());
        assert_eq!(rig.driver.node().forced_sync_target().unwrap().host, "db1:27017");
    }

    #[test]
    fn test_force_sync_from_rejects_unknown_and_self() {
        let rig = rig(Arc::new(NoInitialSync));
        assert!(!rig.driver.force_sync_from("nosuch:27017").ok);
        // Requesting ourselves reads as unknown.
        assert!(!rig.driver.force_sync_from("db0:27017").ok);
    }

    #[test]
    fn test_force_sync_from_rejects_bad_targets() {
        let rig = rig(Arc::new(NoInitialSync));

        let outcome = rig.driver.force_sync_from("db2:27017");
        assert_eq!(outcome.errmsg.as_deref(), Some("I cannot sync from an arbiter"));

        let outcome = rig.driver.force_sync_from("db3:27017");
        assert_eq!(
            outcome.errmsg.as_deref(),
            Some("I cannot sync from a member who does not build indexes")
        );

        let outcome = rig.driver.force_sync_from("db4:27017");
        assert_eq!(outcome.errmsg.as_deref(), Some("I cannot reach the requested member"));
    }

    #[test]
    fn test_force_sync_from_warns_for_stale_target() {
        let rig = rig(Arc::new(NoInitialSync));
        // Our position is far ahead of db5's optime (10s).
        rig.local.log_op(&OplogEntry::noop(OpTime::new(100, 0)));

        let outcome = rig.driver.force_sync_from("db5:27017");
        assert!(outcome.ok);
        assert!(outcome.warning.unwrap().contains("10 seconds behind"));
    }

    #[test]
    fn test_run_idles_until_shutdown() {
        let rig = rig(Arc::new(NoInitialSync));
        rig.driver.node().state().set(NodeState::Primary);
        let node = Arc::clone(rig.driver.node());

        let handle = std::thread::spawn(move || rig.driver.run());
        std::thread::sleep(std::time::Duration::from_millis(50));
        node.request_shutdown();
        handle.join().unwrap();
    }
}
