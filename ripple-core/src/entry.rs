//! Oplog entries: the unit of replication.
//!
//! An oplog entry is an opaque record of one write operation, totally
//! ordered by its [`OpTime`]. Entries are immutable once produced by the
//! upstream; the applier only reads them.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::optime::OpTime;
use crate::types::DocumentId;

/// The kind of operation an oplog entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Document insert.
    Insert,
    /// Document update.
    Update,
    /// Document delete.
    Delete,
    /// Database command (DDL and friends). Applied alone, single-threaded.
    Command,
    /// No-op marker. Carried through the oplog but mutates nothing.
    Noop,
}

impl OpKind {
    /// Returns the single-character wire code for this kind.
    #[must_use]
    pub const fn code(self) -> char {
        match self {
            Self::Insert => 'i',
            Self::Update => 'u',
            Self::Delete => 'd',
            Self::Command => 'c',
            Self::Noop => 'n',
        }
    }

    /// Parses a wire code into a kind.
    ///
    /// # Errors
    /// Returns [`Error::UnknownOpKind`] for any character outside
    /// `i/u/d/c/n`.
    pub const fn from_code(ch: char) -> Result<Self> {
        match ch {
            'i' => Ok(Self::Insert),
            'u' => Ok(Self::Update),
            'd' => Ok(Self::Delete),
            'c' => Ok(Self::Command),
            'n' => Ok(Self::Noop),
            _ => Err(Error::UnknownOpKind { ch }),
        }
    }
}

/// A `"db.collection"` namespace string.
///
/// Special forms: the empty namespace and namespaces with a leading dot
/// name no user collection and are applied as no-ops; a namespace
/// containing `.$cmd` addresses the database's command collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Creates a namespace from a string.
    pub fn new(ns: impl Into<String>) -> Self {
        Self(ns.into())
    }

    /// Returns the raw namespace string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the namespace bytes (the partitioner's hash input).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// True for namespaces that name no user collection: empty, or with a
    /// leading dot. Entries addressed to them are applied as no-ops.
    #[must_use]
    pub fn is_blind(&self) -> bool {
        self.0.is_empty() || self.0.starts_with('.')
    }

    /// True if the namespace addresses a command collection (`.$cmd`).
    #[must_use]
    pub fn is_command(&self) -> bool {
        self.0.contains(".$cmd")
    }

    /// Returns the database portion (everything before the first dot).
    #[must_use]
    pub fn db(&self) -> &str {
        match self.0.find('.') {
            Some(idx) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(ns: &str) -> Self {
        Self::new(ns)
    }
}

impl From<String> for Namespace {
    fn from(ns: String) -> Self {
        Self::new(ns)
    }
}

/// One oplog entry.
///
/// `ts` defines the total order; `id` is the target document key (ignored
/// for commands and noops); `payload` is the opcode-specific body, opaque
/// to everything but the document engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OplogEntry {
    /// Position in the oplog.
    pub ts: OpTime,
    /// Operation kind.
    pub kind: OpKind,
    /// Target namespace.
    pub ns: Namespace,
    /// Target document key.
    pub id: DocumentId,
    /// Opcode-specific body.
    pub payload: Bytes,
}

impl OplogEntry {
    /// Creates an insert entry.
    pub fn insert(ts: OpTime, ns: impl Into<Namespace>, id: DocumentId, payload: Bytes) -> Self {
        Self { ts, kind: OpKind::Insert, ns: ns.into(), id, payload }
    }

    /// Creates an update entry.
    pub fn update(ts: OpTime, ns: impl Into<Namespace>, id: DocumentId, payload: Bytes) -> Self {
        Self { ts, kind: OpKind::Update, ns: ns.into(), id, payload }
    }

    /// Creates a delete entry.
    pub fn delete(ts: OpTime, ns: impl Into<Namespace>, id: DocumentId) -> Self {
        Self { ts, kind: OpKind::Delete, ns: ns.into(), id, payload: Bytes::new() }
    }

    /// Creates a command entry addressed to `db`'s command collection.
    pub fn command(ts: OpTime, db: &str, payload: Bytes) -> Self {
        Self {
            ts,
            kind: OpKind::Command,
            ns: Namespace::new(format!("{db}.$cmd")),
            id: DocumentId::new(0),
            payload,
        }
    }

    /// Creates a noop entry with an empty namespace.
    #[must_use]
    pub fn noop(ts: OpTime) -> Self {
        Self {
            ts,
            kind: OpKind::Noop,
            ns: Namespace::new(""),
            id: DocumentId::new(0),
            payload: Bytes::new(),
        }
    }

    /// True if this entry is a command.
    #[must_use]
    pub fn is_command(&self) -> bool {
        self.kind == OpKind::Command
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_kind_codes() {
        for kind in [OpKind::Insert, OpKind::Update, OpKind::Delete, OpKind::Command, OpKind::Noop]
        {
            assert_eq!(OpKind::from_code(kind.code()).unwrap(), kind);
        }
        assert!(OpKind::from_code('x').is_err());
    }

    #[test]
    fn test_namespace_blind() {
        assert!(Namespace::new("").is_blind());
        assert!(Namespace::new(".local").is_blind());
        assert!(!Namespace::new("db.coll").is_blind());
    }

    #[test]
    fn test_namespace_command() {
        assert!(Namespace::new("admin.$cmd").is_command());
        assert!(!Namespace::new("admin.users").is_command());
    }

    #[test]
    fn test_namespace_db() {
        assert_eq!(Namespace::new("db.coll").db(), "db");
        assert_eq!(Namespace::new("db.coll.sub").db(), "db");
        assert_eq!(Namespace::new("nodot").db(), "nodot");
        assert_eq!(Namespace::new("").db(), "");
    }

    #[test]
    fn test_command_constructor() {
        let cmd = OplogEntry::command(OpTime::new(1, 0), "admin", Bytes::from_static(b"create"));
        assert!(cmd.is_command());
        assert!(cmd.ns.is_command());
        assert_eq!(cmd.ns.db(), "admin");
    }
}
