//! Replica set member view.

use crate::optime::OpTime;
use crate::types::MemberId;

/// The locally known view of a replica set member.
///
/// This is what sync-source selection and ghost cycle checks see: identity,
/// address, and the last heartbeat-reported position. Health and optime are
/// maintained by the heartbeat machinery outside this workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Ordinal within the replica set config.
    pub id: MemberId,
    /// Host and port, `"host:port"`.
    pub host: String,
    /// Voting-only member; never holds data.
    pub arbiter_only: bool,
    /// Whether the member builds indexes.
    pub builds_indexes: bool,
    /// Last heartbeat succeeded.
    pub healthy: bool,
    /// Last heartbeat-reported optime.
    pub optime: OpTime,
}

impl Member {
    /// Creates a healthy, index-building, non-arbiter member view.
    pub fn new(id: MemberId, host: impl Into<String>) -> Self {
        Self {
            id,
            host: host.into(),
            arbiter_only: false,
            builds_indexes: true,
            healthy: true,
            optime: OpTime::NULL,
        }
    }

    /// Marks the member as an arbiter.
    #[must_use]
    pub fn arbiter(mut self) -> Self {
        self.arbiter_only = true;
        self
    }

    /// Sets whether the member builds indexes.
    #[must_use]
    pub fn with_builds_indexes(mut self, builds: bool) -> Self {
        self.builds_indexes = builds;
        self
    }

    /// Sets the member's health.
    #[must_use]
    pub fn with_health(mut self, healthy: bool) -> Self {
        self.healthy = healthy;
        self
    }

    /// Sets the member's heartbeat-reported optime.
    #[must_use]
    pub fn with_optime(mut self, optime: OpTime) -> Self {
        self.optime = optime;
        self
    }
}
