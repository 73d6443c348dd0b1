//! The apply engine: one op under the right lock, and whole batches
//! across the writer pool.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use ripple_core::{Limits, OpKind, OplogEntry, StateHandle};
use ripple_pool::{BatchPool, TaskPool};
use ripple_store::{
    DbWriteGuard, DocumentEngine, GlobalWriteGuard, LocalStore, LockManager, StoreError,
};
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::partition::fill_writer_partitions;

/// Which apply policy a batch runs under.
///
/// Initial sync tolerates duplicate keys (the document may already have
/// been cloned) and retries a missing-parent update once after fetching
/// the parent from the sync source. The normal tail tolerates nothing: an
/// unexpected leaf failure is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Normal oplog tailing.
    Tail,
    /// Initial-sync oplog application, after cloning.
    InitialSync,
}

/// Fetches a document this node is missing from the sync source. Used
/// only by the initial-sync retry path.
pub trait MissingFetcher: Send + Sync {
    /// Returns the current body of the document `op` targets, or `None`
    /// if the source no longer has it either.
    fn fetch(&self, op: &OplogEntry) -> Option<Bytes>;
}

/// Everything a writer or prefetch thread needs, behind one `Arc` so the
/// pool task captures a stable handle rather than a borrow of the
/// applier.
struct ApplyShared {
    engine: Arc<dyn DocumentEngine>,
    local: Arc<dyn LocalStore>,
    locks: LockManager,
    state: StateHandle,
    fetcher: Arc<dyn MissingFetcher>,
}

impl ApplyShared {
    /// Applies one op: fsync exclusion, lock selection, post-lock primary
    /// re-check, leaf apply, journal flush.
    fn sync_apply(&self, op: &OplogEntry, mode: ApplyMode) -> SyncResult<()> {
        // Prevent pending writer locks from blocking reader locks while
        // an fsync is active.
        let _fsync = self.locks.fsync_lock();

        if op.ns.is_blind() {
            // Often a no-op, but can't be sure; surface anything that
            // claims to be a real write.
            if op.kind != OpKind::Noop {
                warn!(ts = %op.ts, kind = ?op.kind, "skipping bad op in oplog");
            }
            return Ok(());
        }

        // A command may need anything; conservatively take the global
        // write lock. Everything else locks its database.
        let (_global, _db): (Option<GlobalWriteGuard>, Option<DbWriteGuard>) =
            if op.ns.is_command() {
                (Some(self.locks.global_write()), None)
            } else {
                (None, Some(self.locks.db_write(op.ns.db())))
            };

        // If we have become primary, we don't want to apply things from
        // elsewhere anymore. Elections happen inside the lock, so
        // checking after acquiring is safe.
        if self.state.is_primary() {
            info!("stopping apply, we are now primary");
            return Err(SyncError::BecamePrimary);
        }

        if let Err(err) = self.engine.apply(op) {
            self.handle_leaf_error(op, err, mode)?;
        }
        self.local.commit_if_needed();
        Ok(())
    }

    /// Mode-specific leaf failure policy.
    fn handle_leaf_error(
        &self,
        op: &OplogEntry,
        err: StoreError,
        mode: ApplyMode,
    ) -> SyncResult<()> {
        if mode == ApplyMode::InitialSync {
            // Duplicate keys are relatively common on initial sync: a
            // document inserted early in the clone step gets replayed by
            // the oplog and collides with its own copy.
            if err.is_duplicate_key() {
                debug!(ns = %op.ns, id = %op.id, "ignoring duplicate key during initial sync");
                return Ok(());
            }
            if err.is_document_missing() && op.kind == OpKind::Update {
                return self.retry_with_fetched(op);
            }
        }
        error!(ns = %op.ns, ts = %op.ts, %err, "writer worker caught exception");
        Err(SyncError::Fatal { reason: format!("{err} on {} at {}", op.ns, op.ts) })
    }

    /// The missing-parent path: fetch the document from the sync source,
    /// restore it locally, and retry the update once.
    fn retry_with_fetched(&self, op: &OplogEntry) -> SyncResult<()> {
        let Some(payload) = self.fetcher.fetch(op) else {
            // The source no longer has it either; the update is moot.
            warn!(ns = %op.ns, id = %op.id, "missing document not found on source, skipping");
            return Ok(());
        };
        self.engine
            .restore(&op.ns, op.id, payload)
            .map_err(|err| SyncError::Fatal { reason: format!("restoring missing object: {err}") })?;
        if let Err(err) = self.engine.apply(op) {
            error!(ns = %op.ns, id = %op.id, %err, "update still fails after adding missing object");
            return Err(SyncError::Fatal {
                reason: format!("update still fails after adding missing object: {err}"),
            });
        }
        Ok(())
    }

    /// Prefetch one op: read lock, page in whatever the op will touch.
    /// Advisory; errors are swallowed.
    fn prefetch_op(&self, op: &OplogEntry) {
        if op.ns.is_blind() {
            return;
        }
        let _ctx = self.locks.db_read(op.ns.db());
        self.engine.prefetch(op);
    }
}

/// Applies batches: prefetch on the reader pool, partition by namespace,
/// engage the batch barrier, run the writer pool, join.
pub struct BatchApplier {
    shared: Arc<ApplyShared>,
    writer_pool: BatchPool<OplogEntry>,
    prefetch_pool: TaskPool,
    writers: usize,
}

impl BatchApplier {
    /// Creates the applier and its two pools.
    ///
    /// # Errors
    /// Returns an error if the pools cannot be spawned.
    pub fn new(
        engine: Arc<dyn DocumentEngine>,
        local: Arc<dyn LocalStore>,
        locks: LockManager,
        state: StateHandle,
        fetcher: Arc<dyn MissingFetcher>,
        limits: &Limits,
    ) -> SyncResult<Self> {
        let writers = limits.writer_threads as usize;
        Ok(Self {
            shared: Arc::new(ApplyShared { engine, local, locks, state, fetcher }),
            writer_pool: BatchPool::new("repl writer", writers)?,
            prefetch_pool: TaskPool::new("repl prefetch", limits.prefetch_threads as usize)?,
            writers,
        })
    }

    /// Applies one entry on the calling thread. Used for the `applyGTE`
    /// entry of initial sync and by single-command batches.
    ///
    /// # Errors
    /// Returns the apply failure per the mode's policy.
    pub fn apply_single(&self, op: &OplogEntry, mode: ApplyMode) -> SyncResult<()> {
        self.shared.sync_apply(op, mode)
    }

    /// Applies a whole batch in parallel.
    ///
    /// A single-command batch short-circuits: commands apply alone on the
    /// calling thread, outside the writer phase. Everything else is
    /// prefetched, partitioned, and run across the writer pool under the
    /// batch barrier.
    ///
    /// # Errors
    /// Returns the first error a worker recorded; [`SyncError::Fatal`]
    /// means the node must not continue.
    pub fn multi_apply(&self, ops: &[OplogEntry], mode: ApplyMode) -> SyncResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        if ops.len() == 1 && ops[0].is_command() {
            return self.apply_single(&ops[0], mode);
        }

        self.prefetch_ops(ops);

        let partitions = fill_writer_partitions(ops, self.writers);

        // Stop all readers until we're done.
        let _barrier = self.shared.locks.batch_writer_scope();
        self.apply_partitions(partitions, mode)
    }

    /// Pages in every op of the batch on the reader pool, joining before
    /// the write phase starts. Converts random I/O into parallel reads
    /// taken before the writer phase holds its locks.
    fn prefetch_ops(&self, ops: &[OplogEntry]) {
        for op in ops {
            if op.ns.is_blind() {
                continue;
            }
            let shared = Arc::clone(&self.shared);
            let op = op.clone();
            self.prefetch_pool.schedule(move || shared.prefetch_op(&op));
        }
        self.prefetch_pool.join();
    }

    fn apply_partitions(
        &self,
        partitions: Vec<Vec<OplogEntry>>,
        mode: ApplyMode,
    ) -> SyncResult<()> {
        let first_error: Arc<Mutex<Option<SyncError>>> = Arc::new(Mutex::new(None));

        let shared = Arc::clone(&self.shared);
        let sink = Arc::clone(&first_error);
        self.writer_pool.set_task(move |op: OplogEntry| {
            LockManager::register_batch_participant();
            if let Err(err) = shared.sync_apply(&op, mode) {
                let mut slot = sink.lock().expect("batch error slot poisoned");
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
        });

        for (worker, partition) in partitions.into_iter().enumerate() {
            for op in partition {
                self.writer_pool.enqueue(worker, op);
            }
        }
        self.writer_pool.go();

        let taken = first_error.lock().expect("batch error slot poisoned").take();
        match taken {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
