//! The shared node handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ripple_core::{Limits, Member, NodeState, StateHandle};
use tracing::info;

use crate::config::{ReplicaConfig, SyncOptions};

/// Shared node-level context: replication state, runtime tunables,
/// received configuration, and the operator-visible heartbeat message.
///
/// One `NodeHandle` exists per node; every engine component holds a clone
/// of the same `Arc`. The handle also anchors the sync-driver singleton:
/// constructing a second driver on the same handle fails.
pub struct NodeHandle {
    state: StateHandle,
    options: Arc<SyncOptions>,
    limits: Limits,
    config: RwLock<Option<ReplicaConfig>>,
    hb_msg: Mutex<String>,
    force_sync_target: Mutex<Option<Member>>,
    state_check_hook: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
    pub(crate) driver_started: AtomicBool,
    shutdown: AtomicBool,
}

impl NodeHandle {
    /// Creates a node handle in `STARTUP`.
    #[must_use]
    pub fn new(limits: Limits) -> Arc<Self> {
        Arc::new(Self {
            state: StateHandle::new(),
            options: Arc::new(SyncOptions::new()),
            limits,
            config: RwLock::new(None),
            hb_msg: Mutex::new(String::new()),
            force_sync_target: Mutex::new(None),
            state_check_hook: Mutex::new(None),
            driver_started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        })
    }

    /// The node's replication state.
    #[must_use]
    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    /// The runtime tunables.
    #[must_use]
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// The system limits.
    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Installs or replaces the replica set configuration.
    ///
    /// # Panics
    /// Panics if the config lock is poisoned.
    pub fn set_config(&self, config: ReplicaConfig) {
        *self.config.write().expect("config poisoned") = Some(config);
    }

    /// The current configuration, if one has arrived.
    ///
    /// # Panics
    /// Panics if the config lock is poisoned.
    #[must_use]
    pub fn config(&self) -> Option<ReplicaConfig> {
        self.config.read().expect("config poisoned").clone()
    }

    /// The operator-visible status message.
    ///
    /// # Panics
    /// Panics if the message lock is poisoned.
    #[must_use]
    pub fn hb_msg(&self) -> String {
        self.hb_msg.lock().expect("hb_msg poisoned").clone()
    }

    /// Publishes a status message for operators.
    ///
    /// # Panics
    /// Panics if the message lock is poisoned.
    pub fn set_hb_msg(&self, msg: impl Into<String>) {
        let msg = msg.into();
        if !msg.is_empty() {
            info!(msg = %msg, "replSet status");
        }
        *self.hb_msg.lock().expect("hb_msg poisoned") = msg;
    }

    /// Administratively blocks or unblocks syncing. Blocking pins the
    /// node in `RECOVERING`; going live is how a node becomes secondary,
    /// so it stays recovering until unblocked.
    pub fn block_sync(&self, block: bool) {
        self.options.set_block_sync(block);
        if block {
            self.state.set(NodeState::Recovering);
        }
    }

    /// The forced sync target, if an operator set one. The upstream
    /// fetcher honors this on its next cycle.
    ///
    /// # Panics
    /// Panics if the target lock is poisoned.
    #[must_use]
    pub fn forced_sync_target(&self) -> Option<Member> {
        self.force_sync_target.lock().expect("force target poisoned").clone()
    }

    /// True if a forced sync target is pending.
    #[must_use]
    pub fn got_force_sync(&self) -> bool {
        self.forced_sync_target().is_some()
    }

    pub(crate) fn set_forced_sync_target(&self, target: Member) {
        *self.force_sync_target.lock().expect("force target poisoned") = Some(target);
    }

    /// Installs the hook the tail loop nudges in single-node sets, where
    /// no heartbeat thread would otherwise re-check electability.
    ///
    /// # Panics
    /// Panics if the hook lock is poisoned.
    pub fn set_state_check_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.state_check_hook.lock().expect("hook poisoned") = Some(Box::new(hook));
    }

    pub(crate) fn request_state_check(&self) {
        if let Some(hook) = self.state_check_hook.lock().expect("hook poisoned").as_ref() {
            hook();
        }
    }

    /// Asks every engine loop to wind down.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// True once shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::MemberId;

    #[test]
    fn test_block_sync_pins_recovering() {
        let node = NodeHandle::new(Limits::for_testing());
        node.state().set(NodeState::Secondary);

        node.block_sync(true);
        assert_eq!(node.state().get(), NodeState::Recovering);
        assert!(node.options().block_sync());

        node.block_sync(false);
        // Unblocking does not change state by itself; going live does.
        assert_eq!(node.state().get(), NodeState::Recovering);
        assert!(!node.options().block_sync());
    }

    #[test]
    fn test_config_roundtrip() {
        let node = NodeHandle::new(Limits::for_testing());
        assert!(node.config().is_none());

        node.set_config(ReplicaConfig::new(
            vec![Member::new(MemberId::new(0), "db0:27017")],
            MemberId::new(0),
        ));
        assert!(node.config().unwrap().is_single_node());
    }

    #[test]
    fn test_hb_msg() {
        let node = NodeHandle::new(Limits::for_testing());
        node.set_hb_msg("still syncing");
        assert_eq!(node.hb_msg(), "still syncing");
        node.set_hb_msg("");
        assert!(node.hb_msg().is_empty());
    }

    #[test]
    fn test_state_check_hook_fires() {
        use std::sync::atomic::AtomicU32;

        let node = NodeHandle::new(Limits::for_testing());
        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = Arc::clone(&fired);
        node.set_state_check_hook(move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        node.request_state_check();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
