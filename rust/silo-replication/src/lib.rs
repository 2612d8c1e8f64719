#![warn(missing_docs)]

//! The secret replication worker of the Silo service.
//!
//! Replication propagates encrypted secrets from a *source folder* to every
//! destination folder that subscribed to it via a replicated import. The
//! worker consumes [ReplicationJob]s from a queue, serializes concurrent
//! episodes per source secret with a distributed multi-key lock, reconciles
//! each destination's reserved folder against the source under blind-index
//! identity, and either writes the classified changes transactionally or
//! records them as an approval request when a policy binds the destination.
//! Direct writes cascade: a downstream sync batch is enqueued so that
//! destinations which are themselves replication sources propagate further.

#[macro_use]
extern crate tracing;

mod client;
mod context;
mod job;
mod policy;
mod processor;
mod replicator;
mod sync;

pub mod worker_queue;

pub use client::*;
pub use context::*;
pub use job::*;
pub use policy::*;
pub use processor::*;
pub use replicator::*;
pub use sync::*;
