//! Batched parallel oplog application for Ripple secondaries.
//!
//! A secondary consumes an ordered stream of oplog entries from its sync
//! source and applies them locally, so that modulo a bounded lag its data
//! is a prefix of the primary's. This crate is the application side of
//! that pipeline:
//!
//! 1. The [`SyncDriver`] decides, per iteration, between initial sync and
//!    tailing, and owns the RECOVERING→SECONDARY transition.
//! 2. The tail loop ([`OplogTail`]) drains a batch from the queue
//!    ([`OplogSource`]), records `minValid` ([`MinValidJournal`]), and
//!    paces slave delay.
//! 3. The [`BatchApplier`] prefetches the batch on a reader pool,
//!    partitions it across writer slots by namespace hash, engages the
//!    batch barrier, and applies each partition on its writer thread.
//! 4. Applied entries are appended to the local oplog and the upstream is
//!    notified.
//!
//! Commands never share a batch with other ops and apply single-threaded
//! under the global write lock. Within a partition, arrival order is
//! preserved; across partitions, namespaces are disjoint by construction.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod apply;
mod config;
mod driver;
mod error;
mod initial;
mod minvalid;
mod node;
mod partition;
mod queue;
mod tail;

pub use apply::{ApplyMode, BatchApplier, MissingFetcher};
pub use config::{ReplicaConfig, SyncOptions};
pub use driver::{ForceSyncOutcome, InitialSyncHook, SyncDriver};
pub use error::{SyncError, SyncResult};
pub use initial::InitialSyncApplier;
pub use minvalid::{MinValidJournal, MINVALID_NS};
pub use node::NodeHandle;
pub use partition::{fill_writer_partitions, partition_index};
pub use queue::{OplogSource, QueueBuffer};
pub use tail::OplogTail;
