//! Error types for Ripple core operations.

use std::fmt;

/// The result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An invalid argument was provided.
    InvalidArgument {
        /// The name of the argument.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// An unknown operation kind character was encountered.
    UnknownOpKind {
        /// The character that did not name an operation kind.
        ch: char,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument '{name}': {reason}")
            }
            Self::UnknownOpKind { ch } => write!(f, "unknown op kind: '{ch}'"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidArgument {
            name: "batch_max",
            reason: "must be positive",
        };
        assert_eq!(format!("{err}"), "invalid argument 'batch_max': must be positive");

        let err = Error::UnknownOpKind { ch: 'x' };
        assert!(format!("{err}").contains('x'));
    }
}
