//! Ripple Core - Shared types for the Ripple replication engine.
//!
//! This crate provides the vocabulary the rest of the workspace speaks:
//! strongly-typed identifiers, optimes, oplog entries, node states, member
//! views, and the system-wide limits. It performs no I/O and holds no
//! threads.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: prevent mixing up a `MemberId` with a
//!   `ReplicaId`.
//! - **Explicit limits**: every queue, map, and sleep has a bounded
//!   maximum, collected in [`Limits`].
//! - **No unsafe code**: safety > performance.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod entry;
mod error;
mod limits;
mod member;
mod optime;
mod state;
mod types;

pub use entry::{Namespace, OpKind, OplogEntry};
pub use error::{Error, Result};
pub use limits::Limits;
pub use member::Member;
pub use optime::OpTime;
pub use state::{NodeState, StateHandle};
pub use types::{DocumentId, MemberId, ReplicaId};
