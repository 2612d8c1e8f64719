//! The queue runtime hosting the replication worker.
//!
//! A [WorkerQueue] hands submitted jobs to a supervisor task that runs each
//! attempt on its own spawned task, bounded by a per-attempt timeout.
//! Failed and timed-out attempts are retried within the configured budget;
//! jobs that exhaust it are reported on an optional failure channel. Jobs
//! are addressable by id for cancellation, and a completed attempt may
//! chain a follow-up job into the backlog.

mod dispatcher;
mod processor;
mod queue;

pub use processor::*;
pub use queue::*;
