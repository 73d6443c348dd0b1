//! The `minValid` journal and the go-live gate it feeds.

use std::sync::Arc;

use ripple_core::{NodeState, OpTime, OplogEntry};
use ripple_store::{LocalStore, LockManager};
use tracing::debug;

use crate::node::NodeHandle;

/// The reserved local collection holding the `minValid` singleton.
pub const MINVALID_NS: &str = "local.replset.minvalid";

/// Crash-safe record of the last op the current batch intends to apply.
///
/// Written before each writer batch starts. After a crash mid-batch the
/// node reboots into RECOVERING and stays there until its applied
/// position reaches the recorded optime; only then is its data a clean
/// prefix of the primary's again.
#[derive(Clone)]
pub struct MinValidJournal {
    local: Arc<dyn LocalStore>,
    locks: LockManager,
}

impl MinValidJournal {
    /// Creates the journal over the node's local store.
    pub fn new(local: Arc<dyn LocalStore>, locks: LockManager) -> Self {
        Self { local, locks }
    }

    /// Records `last` as the op that closes the upcoming batch.
    pub fn record(&self, last: &OplogEntry) {
        let _ctx = self.locks.db_write("local");
        self.local.put_singleton(MINVALID_NS, last);
    }

    /// Reads the recorded gate optime, if any.
    #[must_use]
    pub fn read(&self) -> Option<OpTime> {
        let _ctx = self.locks.db_read("local");
        self.local.get_singleton(MINVALID_NS).map(|entry| entry.ts)
    }

    /// Attempts the RECOVERING→SECONDARY transition.
    ///
    /// Refused outright when the node is already primary or secondary,
    /// while maintenance mode pins it, or while sync is blocked. Otherwise
    /// the gate is `minValid ≤ last_applied`; an absent record means this
    /// must have been the original member, which goes live immediately.
    ///
    /// Returns true if the node transitioned (or was already past the
    /// gate and transitioned now).
    pub fn try_go_live(&self, node: &NodeHandle) -> bool {
        match node.state().get() {
            NodeState::Primary | NodeState::Secondary => return false,
            _ => {}
        }

        if node.options().maintenance_mode() > 0 {
            debug!("not going live, maintenance mode");
            return false;
        }
        if node.options().block_sync() {
            return false;
        }

        let golive = match self.read() {
            Some(minvalid) => {
                if minvalid <= self.local.last_applied() {
                    true
                } else {
                    node.set_hb_msg(format!(
                        "still syncing, not yet to minValid optime {minvalid}"
                    ));
                    false
                }
            }
            // Must have been the original member.
            None => true,
        };

        if golive {
            node.set_hb_msg("");
            node.state().set(NodeState::Secondary);
        }
        golive
    }
}
