//! Thread pools for the Ripple batch applier.
//!
//! Two pool shapes, for two different scheduling problems:
//!
//! - [`BatchPool`]: a fixed worker set with **one queue per worker**. The
//!   caller routes each item to a chosen worker while the pool is parked,
//!   then releases the whole batch with [`BatchPool::go`], which blocks
//!   until every queue is drained. The writer partitioner picks the worker
//!   to preserve per-namespace ordering, so the queues must not be shared.
//! - [`TaskPool`]: a conventional shared-queue pool: schedule closures,
//!   then [`TaskPool::join`] until everything scheduled has run. Used for
//!   prefetch, where routing does not matter.
//!
//! Both are plain OS threads over one mutex and condition variables; there
//! is no async machinery here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod batch;
mod error;
mod task;

pub use batch::BatchPool;
pub use error::{PoolError, PoolResult};
pub use task::TaskPool;
