//! The writer partitioner.
//!
//! Ops routed to the same writer slot apply in arrival order; ops in
//! different slots touch disjoint namespaces by construction. The hash is
//! MurmurHash3-x86-32 with seed 0 over the namespace bytes, so placement
//! is stable across runs, platforms, and processes.

use std::io::Cursor;

use ripple_core::{Namespace, OplogEntry};

/// Maps a namespace to a writer slot. Pure function of the namespace
/// bytes and the writer count.
///
/// # Panics
/// Panics if `writers` is zero.
#[must_use]
pub fn partition_index(ns: &Namespace, writers: usize) -> usize {
    assert!(writers > 0, "at least one writer slot");
    let hash = murmur3::murmur3_32(&mut Cursor::new(ns.as_bytes()), 0)
        .expect("hashing in-memory bytes cannot fail");
    hash as usize % writers
}

/// Distributes a batch into `writers` ordered sequences by namespace
/// hash. Within each sequence, queue order is preserved.
///
/// Commands never reach the partitioner; they apply single-threaded
/// outside the writer phase.
///
/// # Panics
/// Panics if `writers` is zero or the batch contains a command.
#[must_use]
pub fn fill_writer_partitions(ops: &[OplogEntry], writers: usize) -> Vec<Vec<OplogEntry>> {
    let mut partitions = vec![Vec::new(); writers];
    for op in ops {
        assert!(!op.is_command(), "commands are never partitioned");
        partitions[partition_index(&op.ns, writers)].push(op.clone());
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ripple_core::{DocumentId, OpTime};

    fn insert(secs: u32, ns: &str, id: u64) -> OplogEntry {
        OplogEntry::insert(
            OpTime::new(secs, 0),
            ns,
            DocumentId::new(id),
            Bytes::from_static(b"doc"),
        )
    }

    #[test]
    fn test_hash_is_pinned() {
        // MurmurHash3-x86-32("db.a", seed 0). A change here breaks
        // cross-version placement stability.
        let idx = partition_index(&Namespace::new("db.a"), 1 << 31);
        assert_eq!(idx, 0x567c_5e52);
    }

    #[test]
    fn test_partition_is_deterministic() {
        let ns = Namespace::new("app.users");
        for writers in [1, 2, 4, 16, 31] {
            let first = partition_index(&ns, writers);
            assert!(first < writers);
            assert_eq!(first, partition_index(&ns, writers));
        }
    }

    #[test]
    fn test_equal_namespaces_land_together_in_order() {
        let ops: Vec<_> = (0..20).map(|i| insert(i, "db.a", u64::from(i))).collect();
        let partitions = fill_writer_partitions(&ops, 8);

        let occupied: Vec<_> = partitions.iter().filter(|p| !p.is_empty()).collect();
        assert_eq!(occupied.len(), 1);
        let ts: Vec<_> = occupied[0].iter().map(|op| op.ts).collect();
        assert_eq!(ts, (0..20).map(|i| OpTime::new(i, 0)).collect::<Vec<_>>());
    }

    #[test]
    fn test_two_namespaces_two_partitions() {
        // db.a hashes to slot 2 and db.b to slot 3 (mod 4).
        let mut ops = Vec::new();
        for i in 0..256u32 {
            let ns = if i % 2 == 0 { "db.a" } else { "db.b" };
            ops.push(insert(i, ns, u64::from(i)));
        }
        let partitions = fill_writer_partitions(&ops, 4);

        assert!(partitions[0].is_empty());
        assert!(partitions[1].is_empty());
        assert_eq!(partitions[2].len(), 128);
        assert_eq!(partitions[3].len(), 128);

        // Each partition's subsequence equals the per-namespace input
        // subsequence.
        assert!(partitions[2].iter().all(|op| op.ns.as_str() == "db.a"));
        assert!(partitions[3].iter().all(|op| op.ns.as_str() == "db.b"));
        let a_ts: Vec<_> = partitions[2].iter().map(|op| op.ts.secs()).collect();
        assert_eq!(a_ts, (0..256).filter(|i| i % 2 == 0).collect::<Vec<_>>());
    }

    #[test]
    #[should_panic(expected = "commands are never partitioned")]
    fn test_commands_rejected() {
        let cmd = OplogEntry::command(OpTime::new(1, 0), "db", Bytes::from_static(b"create"));
        let _ = fill_writer_partitions(&[cmd], 4);
    }
}
