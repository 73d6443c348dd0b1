//! Oplog read cursors over the sync source.

use ripple_core::{MemberId, OpTime, OplogEntry, ReplicaId};

use crate::error::GhostResult;

/// A read cursor over a remote node's oplog, opened on a ghost's behalf.
pub trait OplogReader: Send {
    /// Positions the cursor at the first entry with `ts >= from`.
    ///
    /// # Errors
    /// Returns a transient error on any network failure.
    fn query_gte(&mut self, from: OpTime) -> GhostResult<()>;

    /// Returns the next entry, or `None` when the cursor is exhausted for
    /// now (more may arrive later).
    ///
    /// # Errors
    /// Returns a transient error on any network failure.
    fn next(&mut self) -> GhostResult<Option<OplogEntry>>;
}

/// Opens oplog read cursors against a sync source.
pub trait ReaderFactory: Send + Sync {
    /// Connects a cursor for ghost `rid` (member `member`) to `host`.
    ///
    /// # Errors
    /// Returns a transient error if the connection cannot be established.
    fn connect(
        &self,
        rid: ReplicaId,
        member: MemberId,
        host: &str,
    ) -> GhostResult<Box<dyn OplogReader>>;
}

/// Lifecycle of a ghost's cursor. An error path closes the cursor; there
/// is no half-open state.
pub enum CursorState {
    /// No cursor. The next percolation connects one.
    Closed,
    /// A live cursor over the sync source's oplog.
    Open(Box<dyn OplogReader>),
}

impl CursorState {
    /// True if a cursor is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }
}

impl std::fmt::Debug for CursorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("Closed"),
            Self::Open(_) => f.write_str("Open"),
        }
    }
}
