use silo_storage::{EphemeralStore, LockStore, ReplicaStore};

use crate::{ApprovalPolicyOracle, SyncEnqueuer};

/// Context provided to the replication processor: the collaborator bundle
/// every job needs to do its work.
#[derive(Clone)]
pub struct ReplicationContext<S, K, A, D>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore,
    A: ApprovalPolicyOracle,
    D: SyncEnqueuer,
{
    /// The persistence gateway
    pub store: S,
    /// Shared coordination: idempotency markers and the replication locks
    pub coordinator: K,
    /// The approval policy oracle
    pub policies: A,
    /// The downstream sync enqueuer
    pub syncer: D,
}

impl<S, K, A, D> ReplicationContext<S, K, A, D>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore,
    A: ApprovalPolicyOracle,
    D: SyncEnqueuer,
{
    /// Creates a new [ReplicationContext].
    pub fn new(store: S, coordinator: K, policies: A, syncer: D) -> Self {
        Self {
            store,
            coordinator,
            policies,
            syncer,
        }
    }
}
