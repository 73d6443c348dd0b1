//! The ghost registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use ripple_core::{Member, MemberId, OpTime, ReplicaId};
use tracing::{debug, info, warn};

use crate::cursor::{CursorState, ReaderFactory};

/// What the ghost tracker needs to know about this node and its replica
/// set: member lookup, the current sync target, and whether this node is
/// primary.
pub trait ReplicaView: Send + Sync {
    /// Resolves a member by config ordinal.
    fn find_member(&self, id: MemberId) -> Option<Member>;

    /// The node this node is currently syncing from, if any.
    fn sync_target(&self) -> Option<Member>;

    /// True if this node is currently primary.
    fn is_primary(&self) -> bool;
}

/// One tracked downstream.
struct GhostEntry {
    /// Resolved member, once `associate` finds it in the config.
    member: Option<Member>,
    /// The downstream's applied position. Advances monotonically.
    last_applied: OpTime,
    /// Read cursor over the sync source's oplog.
    cursor: CursorState,
}

impl GhostEntry {
    const fn initialized(&self) -> bool {
        self.member.is_some()
    }
}

/// Registry of downstream ghosts, keyed by persistent replica id.
///
/// The map is reader-writer locked; each entry has its own lock so a slow
/// percolation for one ghost does not stall updates for another.
pub struct GhostRegistry {
    ghosts: RwLock<HashMap<ReplicaId, Arc<Mutex<GhostEntry>>>>,
    view: Arc<dyn ReplicaView>,
    readers: Arc<dyn ReaderFactory>,
    /// Registration past this size warns.
    max_ghosts: u32,
}

impl GhostRegistry {
    /// Creates a registry.
    pub fn new(
        view: Arc<dyn ReplicaView>,
        readers: Arc<dyn ReaderFactory>,
        max_ghosts: u32,
    ) -> Self {
        Self {
            ghosts: RwLock::new(HashMap::new()),
            view,
            readers,
            max_ghosts,
        }
    }

    /// Number of tracked ghosts.
    ///
    /// # Panics
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ghosts.read().expect("ghost registry poisoned").len()
    }

    /// True if no ghost is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The stored applied position for a ghost, if tracked.
    ///
    /// # Panics
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn last_applied(&self, rid: ReplicaId) -> Option<OpTime> {
        let ghosts = self.ghosts.read().expect("ghost registry poisoned");
        ghosts.get(&rid).map(|entry| entry.lock().expect("ghost entry poisoned").last_applied)
    }

    /// True if the ghost has an open cursor.
    ///
    /// # Panics
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn cursor_open(&self, rid: ReplicaId) -> bool {
        let ghosts = self.ghosts.read().expect("ghost registry poisoned");
        ghosts
            .get(&rid)
            .is_some_and(|entry| entry.lock().expect("ghost entry poisoned").cursor.is_open())
    }

    /// Registers a downstream on its handshake. Idempotent: a second
    /// handshake for an initialized ghost is a no-op.
    ///
    /// # Panics
    /// Panics if the registry lock is poisoned.
    pub fn associate(&self, rid: ReplicaId, member_id: MemberId) {
        let mut ghosts = self.ghosts.write().expect("ghost registry poisoned");
        let entry = Arc::clone(ghosts.entry(rid).or_insert_with(|| {
            Arc::new(Mutex::new(GhostEntry {
                member: None,
                last_applied: OpTime::NULL,
                cursor: CursorState::Closed,
            }))
        }));
        if ghosts.len() as u64 > u64::from(self.max_ghosts) {
            warn!(count = ghosts.len(), "ghost registry over capacity");
        }
        drop(ghosts);

        let mut entry = entry.lock().expect("ghost entry poisoned");
        if entry.initialized() {
            debug!(%rid, "already tracking");
            return;
        }

        match self.view.find_member(member_id) {
            Some(member) => {
                info!(%rid, host = %member.host, "tracking downstream");
                entry.member = Some(member);
            }
            None => {
                info!(%rid, %member_id, "couldn't find member in config, not tracking");
            }
        }
    }

    /// Advances a ghost's applied position. Stale updates are discarded.
    ///
    /// # Panics
    /// Panics if the registry lock is poisoned.
    pub fn update(&self, rid: ReplicaId, ts: OpTime) {
        let ghosts = self.ghosts.read().expect("ghost registry poisoned");
        let Some(entry) = ghosts.get(&rid) else {
            warn!(%rid, "couldn't update ghost, no entry");
            return;
        };
        let mut entry = entry.lock().expect("ghost entry poisoned");
        if !entry.initialized() {
            debug!(%rid, "couldn't update ghost, not initialized");
            return;
        }
        if ts > entry.last_applied {
            entry.last_applied = ts;
        }
    }

    /// Walks the ghost's cursor over the sync source's oplog until the
    /// ghost's position passes `target_ts`, so the upstream learns of the
    /// downstream's progress.
    ///
    /// Refuses when there is no sync target, when this node is primary,
    /// or when the target is the ghost's own member (that would form a
    /// cycle). Network failures reset only this ghost's cursor; the next
    /// call retries.
    ///
    /// # Panics
    /// Panics if the registry lock is poisoned.
    pub fn percolate(&self, rid: ReplicaId, target_ts: OpTime) {
        let entry = {
            let ghosts = self.ghosts.read().expect("ghost registry poisoned");
            let Some(entry) = ghosts.get(&rid) else {
                debug!(%rid, "couldn't percolate ghost, no entry");
                return;
            };
            Arc::clone(entry)
        };

        let mut entry = entry.lock().expect("ghost entry poisoned");
        let entry = &mut *entry;
        let Some(member) = entry.member.clone() else {
            debug!(%rid, "couldn't percolate ghost, not initialized");
            return;
        };

        let Some(target) = self.view.sync_target() else {
            debug!(%rid, "ghost target no good: no sync target");
            return;
        };
        // The target never changes for an entry's lifetime the way a
        // Member handle does, so compare by identity and by name.
        if self.view.is_primary() || target.id == member.id || target.host == member.host {
            debug!(%rid, target = %target.host, "ghost target no good");
            return;
        }

        if !entry.cursor.is_open() {
            let from = entry.last_applied;
            match self.readers.connect(rid, member.id, &target.host) {
                Ok(mut reader) => {
                    if let Err(err) = reader.query_gte(from) {
                        debug!(%rid, %err, "ghost cursor query failed");
                        return;
                    }
                    entry.cursor = CursorState::Open(reader);
                }
                Err(err) => {
                    debug!(%rid, target = %target.host, %err, "ghost connect failed");
                    return;
                }
            }
        }

        if entry.last_applied > target_ts {
            return;
        }

        while entry.last_applied <= target_ts {
            let CursorState::Open(reader) = &mut entry.cursor else {
                return;
            };
            match reader.next() {
                Ok(Some(op)) => {
                    if op.ts > entry.last_applied {
                        entry.last_applied = op.ts;
                    }
                }
                Ok(None) => {
                    // Cursor exhausted for now; we'll be back.
                    return;
                }
                Err(err) => {
                    debug!(%rid, host = %member.host, %err, "ghost sync error");
                    entry.cursor = CursorState::Closed;
                    return;
                }
            }
        }
        debug!(%rid, last = %entry.last_applied, "ghost percolated");
    }
}
