//! Pool error types.

use thiserror::Error;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors that can occur constructing a pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Spawning a worker thread failed.
    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        /// The thread name that failed to spawn.
        name: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_error_display() {
        let err = PoolError::Spawn {
            name: "writer worker 3".to_string(),
            source: std::io::Error::other("out of threads"),
        };
        let msg = err.to_string();
        assert!(msg.contains("writer worker 3"));
        assert!(msg.contains("out of threads"));
    }
}
