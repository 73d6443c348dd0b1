//! Ghost tracking error types.

use thiserror::Error;

/// Result type for ghost operations.
pub type GhostResult<T> = Result<T, GhostError>;

/// Errors from ghost cursors. All of these are transient: the affected
/// ghost's cursor is reset and the next percolation retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GhostError {
    /// Connecting a read cursor to the sync source failed.
    #[error("could not connect to {host}: {message}")]
    Connect {
        /// The sync source host.
        host: String,
        /// Error message.
        message: String,
    },

    /// Reading from an open cursor failed.
    #[error("cursor read failed: {message}")]
    Cursor {
        /// Error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GhostError::Connect {
            host: "db2:27017".to_string(),
            message: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("db2:27017"));
        assert!(msg.contains("refused"));
    }
}
