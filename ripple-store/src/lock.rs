//! Scoped lock acquisition and the parallel-batch-writer barrier.
//!
//! Lock order is barrier → global → database. Reader and writer scopes on
//! user data first pass through the barrier in shared mode; a writer batch
//! holds the barrier exclusively, so no reader observes the partially
//! applied intermediate state of a batch. Writer-pool threads register as
//! batch participants once and bypass the barrier for the lifetime of the
//! thread.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

thread_local! {
    /// Set once on writer-pool threads; participant threads skip the
    /// batch barrier.
    static BATCH_PARTICIPANT: Cell<bool> = const { Cell::new(false) };

    /// Lock depth held by this thread, across all scopes.
    static HELD_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// A small reader-writer latch built on a mutex and condvar.
///
/// `std::sync::RwLock` guards borrow the lock; the scoped guards here must
/// own their latch through an `Arc` instead, so latching is explicit.
#[derive(Default)]
struct Latch {
    state: Mutex<LatchState>,
    cv: Condvar,
}

#[derive(Default)]
struct LatchState {
    readers: usize,
    writer: bool,
}

impl Latch {
    fn lock_shared(&self) {
        let mut state = self.state.lock().expect("latch poisoned");
        while state.writer {
            state = self.cv.wait(state).expect("latch poisoned");
        }
        state.readers += 1;
    }

    fn unlock_shared(&self) {
        let mut state = self.state.lock().expect("latch poisoned");
        state.readers -= 1;
        if state.readers == 0 {
            self.cv.notify_all();
        }
    }

    fn lock_exclusive(&self) {
        let mut state = self.state.lock().expect("latch poisoned");
        while state.writer || state.readers > 0 {
            state = self.cv.wait(state).expect("latch poisoned");
        }
        state.writer = true;
    }

    fn try_lock_shared(&self) -> bool {
        let mut state = self.state.lock().expect("latch poisoned");
        if state.writer {
            return false;
        }
        state.readers += 1;
        true
    }

    fn unlock_exclusive(&self) {
        let mut state = self.state.lock().expect("latch poisoned");
        state.writer = false;
        self.cv.notify_all();
    }
}

struct Inner {
    /// The parallel-batch-writer gate.
    barrier: Latch,
    /// Fsync exclusion: held briefly around each apply so pending writer
    /// locks cannot block reader locks while an fsync is active.
    fsync: Latch,
    /// Process-global lock; database scopes hold it shared.
    global: Latch,
    /// Per-database latches, created on first use.
    dbs: Mutex<HashMap<String, Arc<Latch>>>,
}

/// The lock manager: scoped acquisitions over user data plus the batch
/// barrier.
///
/// Cloning shares the underlying locks. All guards are RAII; release
/// happens on every exit path, including panics.
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    /// Creates a lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                barrier: Latch::default(),
                fsync: Latch::default(),
                global: Latch::default(),
                dbs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Marks the calling thread as a writer-batch participant; it will
    /// bypass the batch barrier from here on.
    pub fn register_batch_participant() {
        BATCH_PARTICIPANT.with(|flag| flag.set(true));
    }

    /// True if the calling thread holds any lock scope.
    #[must_use]
    pub fn is_locked() -> bool {
        HELD_DEPTH.with(Cell::get) > 0
    }

    fn db_latch(&self, db: &str) -> Arc<Latch> {
        let mut dbs = self.inner.dbs.lock().expect("db latch map poisoned");
        Arc::clone(dbs.entry(db.to_string()).or_default())
    }

    /// Passes the batch barrier in shared mode, unless the calling thread
    /// is a batch participant. Returns whether the barrier was taken.
    fn pass_barrier(&self) -> bool {
        if BATCH_PARTICIPANT.with(Cell::get) {
            return false;
        }
        self.inner.barrier.lock_shared();
        true
    }

    /// Acquires the fsync-exclusion mutex.
    #[must_use]
    pub fn fsync_lock(&self) -> FsyncGuard {
        self.inner.fsync.lock_exclusive();
        held_enter();
        FsyncGuard { mgr: self.clone() }
    }

    /// Acquires the global write lock (commands need it).
    #[must_use]
    pub fn global_write(&self) -> GlobalWriteGuard {
        let barrier = self.pass_barrier();
        self.inner.global.lock_exclusive();
        held_enter();
        GlobalWriteGuard { mgr: self.clone(), barrier }
    }

    /// Acquires a write lock on one database.
    #[must_use]
    pub fn db_write(&self, db: &str) -> DbWriteGuard {
        let barrier = self.pass_barrier();
        self.inner.global.lock_shared();
        let latch = self.db_latch(db);
        latch.lock_exclusive();
        held_enter();
        DbWriteGuard { mgr: self.clone(), latch, barrier }
    }

    /// Acquires a read lock on one database.
    #[must_use]
    pub fn db_read(&self, db: &str) -> DbReadGuard {
        let barrier = self.pass_barrier();
        self.inner.global.lock_shared();
        let latch = self.db_latch(db);
        latch.lock_shared();
        held_enter();
        DbReadGuard { mgr: self.clone(), latch, barrier }
    }

    /// Attempts a read lock on one database without blocking on the batch
    /// barrier. Returns `None` while a writer batch is active.
    #[must_use]
    pub fn try_db_read(&self, db: &str) -> Option<DbReadGuard> {
        let barrier = if BATCH_PARTICIPANT.with(Cell::get) {
            false
        } else if self.inner.barrier.try_lock_shared() {
            true
        } else {
            return None;
        };
        self.inner.global.lock_shared();
        let latch = self.db_latch(db);
        latch.lock_shared();
        held_enter();
        Some(DbReadGuard { mgr: self.clone(), latch, barrier })
    }

    /// Enters parallel-batch-writer mode: readers are excluded until the
    /// guard drops. Only one such scope can be active at a time.
    #[must_use]
    pub fn batch_writer_scope(&self) -> BatchWriterGuard {
        self.inner.barrier.lock_exclusive();
        BatchWriterGuard { mgr: self.clone() }
    }
}

fn held_enter() {
    HELD_DEPTH.with(|depth| depth.set(depth.get() + 1));
}

fn held_exit() {
    HELD_DEPTH.with(|depth| depth.set(depth.get() - 1));
}

/// Scoped fsync exclusion.
pub struct FsyncGuard {
    mgr: LockManager,
}

impl Drop for FsyncGuard {
    fn drop(&mut self) {
        self.mgr.inner.fsync.unlock_exclusive();
        held_exit();
    }
}

/// Scoped global write lock.
pub struct GlobalWriteGuard {
    mgr: LockManager,
    barrier: bool,
}

impl Drop for GlobalWriteGuard {
    fn drop(&mut self) {
        self.mgr.inner.global.unlock_exclusive();
        if self.barrier {
            self.mgr.inner.barrier.unlock_shared();
        }
        held_exit();
    }
}

/// Scoped database write lock.
pub struct DbWriteGuard {
    mgr: LockManager,
    latch: Arc<Latch>,
    barrier: bool,
}

impl Drop for DbWriteGuard {
    fn drop(&mut self) {
        self.latch.unlock_exclusive();
        self.mgr.inner.global.unlock_shared();
        if self.barrier {
            self.mgr.inner.barrier.unlock_shared();
        }
        held_exit();
    }
}

/// Scoped database read lock.
pub struct DbReadGuard {
    mgr: LockManager,
    latch: Arc<Latch>,
    barrier: bool,
}

impl Drop for DbReadGuard {
    fn drop(&mut self) {
        self.latch.unlock_shared();
        self.mgr.inner.global.unlock_shared();
        if self.barrier {
            self.mgr.inner.barrier.unlock_shared();
        }
        held_exit();
    }
}

/// Scoped parallel-batch-writer mode.
pub struct BatchWriterGuard {
    mgr: LockManager,
}

impl Drop for BatchWriterGuard {
    fn drop(&mut self) {
        self.mgr.inner.barrier.unlock_exclusive();
    }
}
