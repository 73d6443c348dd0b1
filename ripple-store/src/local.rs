//! The reserved local database: singletons, the local oplog, durability.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ripple_core::{OpTime, OplogEntry};

/// The local-database contract the applier consumes: singleton documents
/// (the `minValid` record lives in one), the append-only local oplog, and
/// journal flushing.
///
/// Singleton writes are journaled synchronously; oplog appends and the
/// `last_applied` position become durable only at `commit_if_needed`.
pub trait LocalStore: Send + Sync {
    /// Writes the singleton document of a reserved collection.
    fn put_singleton(&self, ns: &str, doc: &OplogEntry);

    /// Reads the singleton document of a reserved collection.
    fn get_singleton(&self, ns: &str) -> Option<OplogEntry>;

    /// Appends one applied entry to the local oplog and advances the
    /// node's applied position. Every accepted queue entry is appended,
    /// including noops.
    fn log_op(&self, op: &OplogEntry);

    /// Flushes the journal if the group-commit policy calls for it.
    fn commit_if_needed(&self);

    /// The optime of the last entry appended to the local oplog.
    fn last_applied(&self) -> OpTime;
}

struct LocalState {
    durable_singletons: HashMap<String, OplogEntry>,
    singleton_writes: Vec<(String, OpTime)>,
    durable_oplog: Vec<OplogEntry>,
    pending_oplog: Vec<OplogEntry>,
    durable_last_applied: OpTime,
    last_applied: OpTime,
    commits: u64,
}

/// In-memory local store with an explicit durable/volatile split, so
/// crash-recovery behavior is testable: [`MemoryLocalStore::crash`] drops
/// everything not yet journaled.
#[derive(Clone)]
pub struct MemoryLocalStore {
    state: Arc<Mutex<LocalState>>,
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLocalStore {
    /// Creates an empty local store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LocalState {
                durable_singletons: HashMap::new(),
                singleton_writes: Vec::new(),
                durable_oplog: Vec::new(),
                pending_oplog: Vec::new(),
                durable_last_applied: OpTime::NULL,
                last_applied: OpTime::NULL,
                commits: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().expect("local store poisoned")
    }

    /// Simulates a crash and reboot: volatile state is lost, journaled
    /// state survives.
    pub fn crash(&self) {
        let mut state = self.lock();
        state.pending_oplog.clear();
        state.last_applied = state.durable_last_applied;
    }

    /// All oplog entries visible to this process, durable and pending.
    #[must_use]
    pub fn oplog(&self) -> Vec<OplogEntry> {
        let state = self.lock();
        let mut entries = state.durable_oplog.clone();
        entries.extend(state.pending_oplog.iter().cloned());
        entries
    }

    /// How many journal commits have run.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }

    /// Every singleton write to `ns`, oldest first, as the written
    /// entry's optime.
    #[must_use]
    pub fn singleton_history(&self, ns: &str) -> Vec<OpTime> {
        self.lock()
            .singleton_writes
            .iter()
            .filter(|(written_ns, _)| written_ns == ns)
            .map(|(_, ts)| *ts)
            .collect()
    }
}

impl LocalStore for MemoryLocalStore {
    fn put_singleton(&self, ns: &str, doc: &OplogEntry) {
        let mut state = self.lock();
        state.singleton_writes.push((ns.to_string(), doc.ts));
        state.durable_singletons.insert(ns.to_string(), doc.clone());
    }

    fn get_singleton(&self, ns: &str) -> Option<OplogEntry> {
        self.lock().durable_singletons.get(ns).cloned()
    }

    fn log_op(&self, op: &OplogEntry) {
        let mut state = self.lock();
        state.pending_oplog.push(op.clone());
        state.last_applied = op.ts;
    }

    fn commit_if_needed(&self) {
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.pending_oplog);
        state.durable_oplog.extend(pending);
        state.durable_last_applied = state.last_applied;
        state.commits += 1;
    }

    fn last_applied(&self) -> OpTime {
        self.lock().last_applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(secs: u32) -> OplogEntry {
        OplogEntry::noop(OpTime::new(secs, 0))
    }

    #[test]
    fn test_log_op_advances_last_applied() {
        let store = MemoryLocalStore::new();
        assert!(store.last_applied().is_null());

        store.log_op(&noop(5));
        assert_eq!(store.last_applied(), OpTime::new(5, 0));
    }

    #[test]
    fn test_singleton_roundtrip() {
        let store = MemoryLocalStore::new();
        assert!(store.get_singleton("local.replset.minvalid").is_none());

        let entry = noop(9);
        store.put_singleton("local.replset.minvalid", &entry);
        assert_eq!(store.get_singleton("local.replset.minvalid").unwrap().ts, OpTime::new(9, 0));
    }

    #[test]
    fn test_crash_drops_uncommitted_oplog() {
        let store = MemoryLocalStore::new();
        store.log_op(&noop(1));
        store.commit_if_needed();
        store.log_op(&noop(2));

        store.crash();
        assert_eq!(store.last_applied(), OpTime::new(1, 0));
        assert_eq!(store.oplog().len(), 1);
    }

    #[test]
    fn test_singletons_survive_crash() {
        let store = MemoryLocalStore::new();
        store.put_singleton("local.replset.minvalid", &noop(7));
        store.crash();
        assert!(store.get_singleton("local.replset.minvalid").is_some());
    }

    #[test]
    fn test_clone_shares_state() {
        let store = MemoryLocalStore::new();
        let other = store.clone();
        store.log_op(&noop(3));
        assert_eq!(other.last_applied(), OpTime::new(3, 0));
    }
}
