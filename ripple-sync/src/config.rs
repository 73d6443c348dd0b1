//! Replica set configuration and runtime tunables.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ripple_core::{Member, MemberId};

/// The received replica set configuration, as this node sees it.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// All members, this node included.
    pub members: Vec<Member>,
    /// Which member this node is.
    pub self_id: MemberId,
}

impl ReplicaConfig {
    /// Creates a config.
    #[must_use]
    pub fn new(members: Vec<Member>, self_id: MemberId) -> Self {
        Self { members, self_id }
    }

    /// This node's own member entry, if the config includes it.
    #[must_use]
    pub fn self_member(&self) -> Option<&Member> {
        self.find_member(self.self_id)
    }

    /// Finds a member by ordinal.
    #[must_use]
    pub fn find_member(&self, id: MemberId) -> Option<&Member> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Finds a member by host string. Never returns this node itself, so
    /// a request to sync from ourselves reads as an unknown member.
    #[must_use]
    pub fn find_host(&self, host: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.host == host && m.id != self.self_id)
    }

    /// True for a one-member set. Such a set has no heartbeat traffic to
    /// notice a stepdown, so the tail loop nudges the state check itself.
    #[must_use]
    pub fn is_single_node(&self) -> bool {
        self.members.len() == 1
    }
}

/// Runtime-mutable replication tunables, shared across every thread of
/// the engine. Admin threads flip these mid-flight; the loops re-read
/// them at their next check.
#[derive(Debug, Default)]
pub struct SyncOptions {
    /// Artificial lag, in seconds, to hold this node behind its source.
    slave_delay_secs: AtomicU64,
    /// While positive, the node stays in RECOVERING.
    maintenance_mode: AtomicU64,
    /// While set, the node stays in RECOVERING and will not go live.
    block_sync: AtomicBool,
    /// Test-only: fail the next N initial-sync passes.
    force_initial_sync_failure: AtomicU64,
}

impl SyncOptions {
    /// Creates options with everything off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The configured slave delay in seconds.
    #[must_use]
    pub fn slave_delay_secs(&self) -> u64 {
        self.slave_delay_secs.load(Ordering::SeqCst)
    }

    /// Sets the slave delay. Takes effect within one sleep segment.
    pub fn set_slave_delay_secs(&self, secs: u64) {
        self.slave_delay_secs.store(secs, Ordering::SeqCst);
    }

    /// The maintenance-mode counter.
    #[must_use]
    pub fn maintenance_mode(&self) -> u64 {
        self.maintenance_mode.load(Ordering::SeqCst)
    }

    /// Enters maintenance mode (counts).
    pub fn enter_maintenance(&self) {
        self.maintenance_mode.fetch_add(1, Ordering::SeqCst);
    }

    /// Leaves maintenance mode once.
    pub fn leave_maintenance(&self) {
        let _ = self.maintenance_mode.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            n.checked_sub(1)
        });
    }

    /// True while sync is administratively blocked.
    #[must_use]
    pub fn block_sync(&self) -> bool {
        self.block_sync.load(Ordering::SeqCst)
    }

    pub(crate) fn set_block_sync(&self, block: bool) {
        self.block_sync.store(block, Ordering::SeqCst);
    }

    /// Arms the forced initial-sync failure counter (test hook).
    pub fn force_initial_sync_failures(&self, count: u64) {
        self.force_initial_sync_failure.store(count, Ordering::SeqCst);
    }

    /// Consumes one forced failure if armed.
    #[must_use]
    pub fn take_forced_failure(&self) -> bool {
        self.force_initial_sync_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_host_excludes_self() {
        let config = ReplicaConfig::new(
            vec![
                Member::new(MemberId::new(0), "db0:27017"),
                Member::new(MemberId::new(1), "db1:27017"),
            ],
            MemberId::new(0),
        );
        assert!(config.find_host("db0:27017").is_none());
        assert_eq!(config.find_host("db1:27017").unwrap().id, MemberId::new(1));
    }

    #[test]
    fn test_single_node() {
        let config =
            ReplicaConfig::new(vec![Member::new(MemberId::new(0), "db0:27017")], MemberId::new(0));
        assert!(config.is_single_node());
    }

    #[test]
    fn test_maintenance_counts() {
        let options = SyncOptions::new();
        assert_eq!(options.maintenance_mode(), 0);
        options.enter_maintenance();
        options.enter_maintenance();
        assert_eq!(options.maintenance_mode(), 2);
        options.leave_maintenance();
        options.leave_maintenance();
        options.leave_maintenance(); // extra leave saturates at zero
        assert_eq!(options.maintenance_mode(), 0);
    }

    #[test]
    fn test_forced_failure_counts_down() {
        let options = SyncOptions::new();
        assert!(!options.take_forced_failure());

        options.force_initial_sync_failures(2);
        assert!(options.take_forced_failure());
        assert!(options.take_forced_failure());
        assert!(!options.take_forced_failure());
    }
}
