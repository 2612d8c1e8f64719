use std::sync::Arc;

use anyhow::Result;
use silo_core::data::JobId;
use silo_storage::{EphemeralStore, LockStore, ReplicaStore};

use crate::{
    worker_queue::WorkerQueue, ApprovalPolicyOracle, ReplicationJob, ReplicationJobProcessor,
    SyncEnqueuer,
};

/// [JobClient] allows other services to submit replication jobs to be
/// processed, and to withdraw ones that have become moot.
pub trait JobClient: Clone + Send + Sync {
    /// Submit a [ReplicationJob] to be processed.
    fn submit(&self, job: ReplicationJob) -> Result<()>;

    /// Cancel a previously submitted job by id.
    fn cancel(&self, job_id: &JobId) -> Result<()>;
}

/// A [JobClient] backed by an in-process [WorkerQueue]
#[derive(Clone)]
pub struct QueueJobClient<S, K, A, D>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore + 'static,
    A: ApprovalPolicyOracle + 'static,
    D: SyncEnqueuer + 'static,
{
    queue: Arc<WorkerQueue<ReplicationJobProcessor<S, K, A, D>>>,
}

impl<S, K, A, D> QueueJobClient<S, K, A, D>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore + 'static,
    A: ApprovalPolicyOracle + 'static,
    D: SyncEnqueuer + 'static,
{
    /// Wrap a running [WorkerQueue] in a [QueueJobClient]
    pub fn new(queue: WorkerQueue<ReplicationJobProcessor<S, K, A, D>>) -> Self {
        Self {
            queue: Arc::new(queue),
        }
    }
}

impl<S, K, A, D> JobClient for QueueJobClient<S, K, A, D>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore + 'static,
    A: ApprovalPolicyOracle + 'static,
    D: SyncEnqueuer + 'static,
{
    fn submit(&self, job: ReplicationJob) -> Result<()> {
        self.queue.submit(job)
    }

    fn cancel(&self, job_id: &JobId) -> Result<()> {
        self.queue.cancel(job_id)
    }
}
