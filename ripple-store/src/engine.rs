//! The leaf document engine: apply one operation under a held lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use bytes::Bytes;
use ripple_core::{DocumentId, Namespace, OpKind, OplogEntry};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// The storage engine's apply primitive.
///
/// The caller holds the appropriate lock scope before invoking `apply`;
/// the engine itself does not know about the lock manager. Implementations
/// report duplicate-key violations with the codes in
/// [`crate::DUPLICATE_KEY_CODES`] and missing update targets with
/// [`StoreError::DocumentMissing`]; the apply policy (tolerate, retry,
/// fail) belongs to the caller.
pub trait DocumentEngine: Send + Sync {
    /// Applies one operation to the local data.
    ///
    /// # Errors
    /// Returns the engine failure verbatim; the caller decides what is
    /// tolerable.
    fn apply(&self, op: &OplogEntry) -> StoreResult<()>;

    /// Pages in whatever `op` will touch. Advisory: failures are
    /// meaningless and implementations must not panic.
    fn prefetch(&self, op: &OplogEntry);

    /// Upserts a document fetched from elsewhere (the missing-parent
    /// retry path during initial sync).
    ///
    /// # Errors
    /// Returns the engine failure verbatim.
    fn restore(&self, ns: &Namespace, id: DocumentId, payload: Bytes) -> StoreResult<()>;
}

/// In-memory document engine.
///
/// Collections are maps keyed by document id. Commands mutate no
/// documents; they are recorded so tests can observe their application
/// order.
#[derive(Default)]
pub struct MemoryEngine {
    collections: RwLock<HashMap<String, BTreeMap<DocumentId, Bytes>>>,
    commands: Mutex<Vec<(Namespace, Bytes)>>,
    prefetches: AtomicU64,
}

impl MemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates a document, as the clone step of initial sync would.
    pub fn seed(&self, ns: &str, id: DocumentId, payload: Bytes) {
        let mut collections = self.collections.write().expect("engine poisoned");
        collections.entry(ns.to_string()).or_default().insert(id, payload);
    }

    /// Returns a document, if present.
    #[must_use]
    pub fn get(&self, ns: &str, id: DocumentId) -> Option<Bytes> {
        let collections = self.collections.read().expect("engine poisoned");
        collections.get(ns).and_then(|coll| coll.get(&id)).cloned()
    }

    /// Number of documents in a collection.
    #[must_use]
    pub fn len(&self, ns: &str) -> usize {
        let collections = self.collections.read().expect("engine poisoned");
        collections.get(ns).map_or(0, BTreeMap::len)
    }

    /// True if the collection is absent or empty.
    #[must_use]
    pub fn is_empty(&self, ns: &str) -> bool {
        self.len(ns) == 0
    }

    /// The commands applied so far, in application order.
    #[must_use]
    pub fn applied_commands(&self) -> Vec<(Namespace, Bytes)> {
        self.commands.lock().expect("engine poisoned").clone()
    }

    /// How many prefetch calls the engine has served.
    #[must_use]
    pub fn prefetch_count(&self) -> u64 {
        self.prefetches.load(Ordering::SeqCst)
    }
}

impl DocumentEngine for MemoryEngine {
    fn apply(&self, op: &OplogEntry) -> StoreResult<()> {
        match op.kind {
            OpKind::Insert => {
                let mut collections = self.collections.write().expect("engine poisoned");
                let coll = collections.entry(op.ns.as_str().to_string()).or_default();
                if coll.contains_key(&op.id) {
                    return Err(StoreError::DuplicateKey {
                        ns: op.ns.clone(),
                        id: op.id,
                        code: 11000,
                    });
                }
                coll.insert(op.id, op.payload.clone());
                Ok(())
            }
            OpKind::Update => {
                let mut collections = self.collections.write().expect("engine poisoned");
                let coll = collections.entry(op.ns.as_str().to_string()).or_default();
                match coll.get_mut(&op.id) {
                    Some(doc) => {
                        *doc = op.payload.clone();
                        Ok(())
                    }
                    None => Err(StoreError::DocumentMissing { ns: op.ns.clone(), id: op.id }),
                }
            }
            OpKind::Delete => {
                let mut collections = self.collections.write().expect("engine poisoned");
                if let Some(coll) = collections.get_mut(op.ns.as_str()) {
                    if coll.remove(&op.id).is_none() {
                        debug!(ns = %op.ns, id = %op.id, "delete of absent document");
                    }
                }
                Ok(())
            }
            OpKind::Command => {
                let mut commands = self.commands.lock().expect("engine poisoned");
                commands.push((op.ns.clone(), op.payload.clone()));
                Ok(())
            }
            OpKind::Noop => Ok(()),
        }
    }

    fn prefetch(&self, op: &OplogEntry) {
        // Touch the target so the pages would be warm; here that is just
        // the lookup itself.
        let collections = self.collections.read().expect("engine poisoned");
        let _ = collections.get(op.ns.as_str()).map(|coll| coll.get(&op.id));
        self.prefetches.fetch_add(1, Ordering::SeqCst);
    }

    fn restore(&self, ns: &Namespace, id: DocumentId, payload: Bytes) -> StoreResult<()> {
        let mut collections = self.collections.write().expect("engine poisoned");
        collections.entry(ns.as_str().to_string()).or_default().insert(id, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::OpTime;

    fn insert(ts: u32, ns: &str, id: u64) -> OplogEntry {
        OplogEntry::insert(
            OpTime::new(ts, 0),
            ns,
            DocumentId::new(id),
            Bytes::from_static(b"doc"),
        )
    }

    #[test]
    fn test_insert_then_get() {
        let engine = MemoryEngine::new();
        engine.apply(&insert(1, "db.a", 1)).unwrap();
        assert_eq!(engine.get("db.a", DocumentId::new(1)).unwrap(), Bytes::from_static(b"doc"));
    }

    #[test]
    fn test_duplicate_insert_reports_dup_key() {
        let engine = MemoryEngine::new();
        engine.apply(&insert(1, "db.a", 1)).unwrap();
        let err = engine.apply(&insert(2, "db.a", 1)).unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn test_update_missing_reports_document_missing() {
        let engine = MemoryEngine::new();
        let op = OplogEntry::update(
            OpTime::new(1, 0),
            "db.a",
            DocumentId::new(9),
            Bytes::from_static(b"v2"),
        );
        let err = engine.apply(&op).unwrap_err();
        assert!(err.is_document_missing());
    }

    #[test]
    fn test_update_after_restore_succeeds() {
        let engine = MemoryEngine::new();
        let ns = Namespace::new("db.a");
        engine.restore(&ns, DocumentId::new(9), Bytes::from_static(b"v1")).unwrap();

        let op = OplogEntry::update(
            OpTime::new(1, 0),
            "db.a",
            DocumentId::new(9),
            Bytes::from_static(b"v2"),
        );
        engine.apply(&op).unwrap();
        assert_eq!(engine.get("db.a", DocumentId::new(9)).unwrap(), Bytes::from_static(b"v2"));
    }

    #[test]
    fn test_delete_absent_is_ok() {
        let engine = MemoryEngine::new();
        let op = OplogEntry::delete(OpTime::new(1, 0), "db.a", DocumentId::new(4));
        engine.apply(&op).unwrap();
    }

    #[test]
    fn test_commands_recorded_in_order() {
        let engine = MemoryEngine::new();
        for (i, name) in [b"create" as &[u8], b"drop"].into_iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let ts = OpTime::new(i as u32 + 1, 0);
            engine.apply(&OplogEntry::command(ts, "db", Bytes::copy_from_slice(name))).unwrap();
        }
        let commands = engine.applied_commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].1, Bytes::from_static(b"create"));
        assert_eq!(commands[1].1, Bytes::from_static(b"drop"));
    }

    #[test]
    fn test_prefetch_counts() {
        let engine = MemoryEngine::new();
        engine.prefetch(&insert(1, "db.a", 1));
        engine.prefetch(&insert(2, "db.b", 2));
        assert_eq!(engine.prefetch_count(), 2);
    }
}
