//! Store error types.

use ripple_core::{DocumentId, Namespace};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error codes a storage engine reports for a duplicate key violation.
///
/// During initial sync these are ignored: a document inserted early in the
/// clone step will be replayed by the oplog and collide with itself.
pub const DUPLICATE_KEY_CODES: [u32; 3] = [11000, 11001, 12582];

/// Errors that can occur applying an operation to the storage engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("duplicate key (code {code}) in {ns}: {id}")]
    DuplicateKey {
        /// The namespace of the collision.
        ns: Namespace,
        /// The colliding document key.
        id: DocumentId,
        /// Engine error code.
        code: u32,
    },

    /// An update targeted a document that does not exist.
    #[error("document missing in {ns}: {id}")]
    DocumentMissing {
        /// The namespace of the update.
        ns: Namespace,
        /// The missing document key.
        id: DocumentId,
    },

    /// An I/O error from the underlying engine.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },
}

impl StoreError {
    /// True if this is a duplicate-key violation with a recognized code.
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { code, .. } if DUPLICATE_KEY_CODES.contains(code))
    }

    /// True if this is a missing-document failure.
    #[must_use]
    pub fn is_document_missing(&self) -> bool {
        matches!(self, Self::DocumentMissing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_key_codes() {
        for code in DUPLICATE_KEY_CODES {
            let err = StoreError::DuplicateKey {
                ns: Namespace::new("db.coll"),
                id: DocumentId::new(1),
                code,
            };
            assert!(err.is_duplicate_key());
        }

        let err = StoreError::DuplicateKey {
            ns: Namespace::new("db.coll"),
            id: DocumentId::new(1),
            code: 1,
        };
        assert!(!err.is_duplicate_key());
    }

    #[test]
    fn test_document_missing() {
        let err = StoreError::DocumentMissing {
            ns: Namespace::new("db.coll"),
            id: DocumentId::new(7),
        };
        assert!(err.is_document_missing());
        assert!(!err.is_duplicate_key());
    }
}
