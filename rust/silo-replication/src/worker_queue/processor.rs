use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use silo_core::data::JobId;
use std::fmt::Debug;

#[cfg(doc)]
use super::WorkerQueue;

/// A unit of work with a stable identity. The identity is what makes
/// cancellation and failure notifications addressable: redeliveries of the
/// same logical job carry the same id.
pub trait QueueJob: Debug + Clone + Send + Serialize + 'static {
    /// The stable identity of this job
    fn job_id(&self) -> &JobId;
}

/// The work a [WorkerQueue] performs.
///
/// A processor carries whatever collaborators its jobs need and is cheap to
/// clone; every attempt runs on its own task against a clone. On success an
/// attempt may hand back a follow-up job, which re-enters the queue as if
/// freshly submitted.
#[async_trait]
pub trait Processor: Clone + Send + Sync + 'static {
    /// Type representing an individual unit of work
    type Job: QueueJob;

    /// Perform one job to completion
    async fn process(&self, job: Self::Job) -> Result<Option<Self::Job>>;
}

/// A job that exhausted its attempts, as delivered on the failure
/// notification channel
#[derive(Clone, Debug)]
pub struct FailedJob<J> {
    /// The job as last attempted
    pub job: J,
    /// How many attempts were made
    pub attempts: usize,
    /// Message of the terminal error
    pub error: String,
}
