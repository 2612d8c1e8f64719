use anyhow::Result;
use async_trait::async_trait;
use silo_storage::{EphemeralStore, LockStore, ReplicaStore};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

use crate::{
    replicate_folder,
    worker_queue::{FailedJob, Processor},
    ApprovalPolicyOracle, ReplicationContext, ReplicationJob, SyncEnqueuer,
};

/// Performs [ReplicationJob]s against the collaborator bundle it carries.
#[derive(Clone)]
pub struct ReplicationJobProcessor<S, K, A, D>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore,
    A: ApprovalPolicyOracle,
    D: SyncEnqueuer,
{
    context: ReplicationContext<S, K, A, D>,
}

impl<S, K, A, D> ReplicationJobProcessor<S, K, A, D>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore,
    A: ApprovalPolicyOracle,
    D: SyncEnqueuer,
{
    /// Creates a new processor over the given collaborators.
    pub fn new(context: ReplicationContext<S, K, A, D>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl<S, K, A, D> Processor for ReplicationJobProcessor<S, K, A, D>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore + 'static,
    A: ApprovalPolicyOracle + 'static,
    D: SyncEnqueuer + 'static,
{
    type Job = ReplicationJob;

    async fn process(&self, job: Self::Job) -> Result<Option<Self::Job>> {
        replicate_folder(self.context.clone(), job)
            .await
            .map_err(Into::into)
    }
}

/// Spawn the `failed` listener of the replication queue: terminal job
/// failures are logged with their full payload, and nothing else is done
/// with them. Per-import failures never reach this channel; those are
/// recorded on the import rows as the job runs.
pub fn spawn_failure_logger(
    mut failures: UnboundedReceiver<FailedJob<ReplicationJob>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(failed) = failures.recv().await {
            let payload = serde_json::to_string(&failed.job)
                .unwrap_or_else(|_| format!("{:?}", failed.job));
            error!(
                attempts = failed.attempts,
                job = %payload,
                "Replication job failed: {}",
                failed.error
            );
        }
    })
}
