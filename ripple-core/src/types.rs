//! Strongly-typed identifiers for Ripple entities.
//!
//! Explicit ID types prevent bugs from mixing up identifiers that happen
//! to share a representation. All IDs are 64-bit.

use std::fmt;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `MemberId` with `ReplicaId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// Replica set membership.
define_id!(MemberId, "member", "Ordinal of a member within the replica set config.");
define_id!(
    ReplicaId,
    "rid",
    "Persistent replica id of a downstream node, the key of its ghost entry."
);

// Document addressing.
define_id!(DocumentId, "doc", "Key of a document targeted by an oplog entry.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_type_safety() {
        let member = MemberId::new(3);
        let rid = ReplicaId::new(3);

        // Same raw value, different types; they can't be compared directly.
        assert_eq!(member.get(), rid.get());
    }

    #[test]
    fn test_id_display() {
        let rid = ReplicaId::new(42);
        assert_eq!(format!("{rid}"), "rid-42");
        assert_eq!(format!("{rid:?}"), "rid(42)");
    }

    #[test]
    fn test_id_ordering() {
        assert!(DocumentId::new(1) < DocumentId::new(2));
        assert_eq!(MemberId::new(7), MemberId::from(7));
    }
}
