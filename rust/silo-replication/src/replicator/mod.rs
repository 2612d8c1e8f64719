//! The replication worker itself: the top-level job protocol, the
//! per-import protocol, and the two terminal write paths.

mod approval;
mod diff;
mod direct;
mod keys;

pub use diff::*;
pub use keys::*;

use std::collections::HashMap;

use chrono::Utc;
use silo_core::{
    data::{
        truncate_replication_status, BlindIndex, BoundPolicy, Folder, Membership, Secret,
        SecretId, SecretImport, SecretKind, SecretVersion, SecretVersionId,
    },
    error::ReplicationError,
};
use silo_storage::{EphemeralStore, LockStore, ReplicaStore};

use crate::{
    Actor, ApprovalPolicyOracle, NestedSecret, ReplicationContext, ReplicationJob,
    SecretOperation, SecretSyncBatch, SyncEnqueuer,
};

/// The two terminal routes of the per-import protocol. Both record the same
/// classified diff against the destination; they differ in whether the
/// record is an immediate transactional write or a pending approval.
enum WritePath {
    /// Write into the reserved folder and report the materialized changes
    Direct,
    /// Park the diff as an approval request for the bound policy
    Approval {
        policy: BoundPolicy,
        membership: Membership,
    },
}

impl WritePath {
    async fn record<S, K, A, D>(
        self,
        context: &ReplicationContext<S, K, A, D>,
        reserve: &Folder,
        classified: &[ClassifiedOp],
    ) -> Result<Option<Vec<NestedSecret>>, ReplicationError>
    where
        S: ReplicaStore,
        K: EphemeralStore + LockStore,
        A: ApprovalPolicyOracle,
        D: SyncEnqueuer,
    {
        match self {
            WritePath::Direct => Ok(Some(
                direct::apply_directly(&context.store, reserve, classified).await?,
            )),
            WritePath::Approval { policy, membership } => {
                approval::record_for_approval(
                    &context.store,
                    &policy,
                    &membership,
                    reserve,
                    classified,
                )
                .await?;
                Ok(None)
            }
        }
    }
}

/// Run one replication job to completion.
///
/// Discovers the subscribed imports, re-reads the source versions (earlier
/// jobs may already have advanced them), filters to the replication-eligible
/// set, and serializes against concurrent episodes with a multi-key lock
/// over the source secret ids. Each import is then processed independently:
/// a failure is recorded on its row and the next import proceeds. After the
/// loop, every eligible source version is promoted to replicated whether or
/// not any import succeeded; the promotion records that the versions were
/// attempted and eligible, not that every destination took them.
#[instrument(skip(context, job), fields(job_id = %job.job_id))]
pub async fn replicate_folder<S, K, A, D>(
    context: ReplicationContext<S, K, A, D>,
    job: ReplicationJob,
) -> Result<Option<ReplicationJob>, ReplicationError>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore,
    A: ApprovalPolicyOracle,
    D: SyncEnqueuer,
{
    if job.secrets.is_empty() {
        return Ok(None);
    }

    let mut imports = context
        .store
        .find_replication_imports(&job.secret_path, &job.environment_id)
        .await?;
    if let Some(picked) = &job.pick_only_import_ids {
        imports.retain(|import| picked.contains(&import.id));
    }
    if imports.is_empty() {
        debug!("No replication subscribers for {}", job.secret_path);
        return Ok(None);
    }

    let source_ids: Vec<SecretId> = job
        .secrets
        .iter()
        .map(|operation| operation.id.clone())
        .collect();
    let versions = context
        .store
        .find_secret_versions(&job.folder_id, &source_ids)
        .await?;

    let replicated: Vec<SecretVersion> = versions
        .into_iter()
        .filter(|version| {
            version.kind == SecretKind::Shared && version.is_replication_eligible()
        })
        .collect();

    let mut sources_by_id: HashMap<SecretId, SecretVersion> = HashMap::new();
    for version in &replicated {
        sources_by_id
            .entry(version.secret_id.clone())
            .or_insert_with(|| version.clone());
    }

    // Entries without an eligible source document drop out here; this is
    // what excludes personal secrets and stale versions.
    let operations: Vec<SecretOperation> = job
        .secrets
        .iter()
        .filter(|operation| sources_by_id.contains_key(&operation.id))
        .cloned()
        .collect();
    if operations.is_empty() {
        return Ok(None);
    }

    let lock_keys: Vec<String> = replicated
        .iter()
        .map(|version| replication_lock_key(&version.secret_id))
        .collect();
    let _lease = context
        .coordinator
        .acquire(lock_keys, LOCK_ACQUIRE_WAIT, LOCK_TTL)
        .await
        .map_err(|error| ReplicationError::LockUnavailable(error.to_string()))?;

    for import in &imports {
        if let Err(error) =
            replicate_import(&context, &job, import, &replicated, &sources_by_id, &operations)
                .await
        {
            if matches!(error, ReplicationError::MembershipMissing(_, _)) {
                error!("Aborting replication job: {}", error);
                return Err(error);
            }

            warn!("Replication to import {} failed: {}", import.id, error);
            let status = truncate_replication_status(&error.to_string());
            if let Err(update_error) = context
                .store
                .update_import_replication_state(&import.id, Utc::now(), Some(status), false)
                .await
            {
                warn!(
                    "Could not record failure on import {}: {}",
                    import.id, update_error
                );
            }
        }
    }

    let version_ids: Vec<SecretVersionId> = replicated
        .iter()
        .map(|version| version.id.clone())
        .collect();
    context
        .store
        .mark_versions_replicated(&version_ids)
        .await?;

    debug!(
        "Replicated {} source secrets across {} imports",
        operations.len(),
        imports.len()
    );
    Ok(None)
}

/// The per-import protocol: idempotency short-circuit, destination path
/// resolution, reserved folder materialization, local state read,
/// classification, policy routing, and success marking.
async fn replicate_import<S, K, A, D>(
    context: &ReplicationContext<S, K, A, D>,
    job: &ReplicationJob,
    import: &SecretImport,
    replicated: &[SecretVersion],
    sources_by_id: &HashMap<SecretId, SecretVersion>,
    operations: &[SecretOperation],
) -> Result<(), ReplicationError>
where
    S: ReplicaStore,
    K: EphemeralStore + LockStore,
    A: ApprovalPolicyOracle,
    D: SyncEnqueuer,
{
    let marker_key = success_key(&job.job_id, &import.id);
    let marker: Option<ReplicationStamp> = context.coordinator.get_key(&marker_key).await?;
    if marker.is_some() {
        debug!(
            "Import {} already completed by job {}; skipping",
            import.id, job.job_id
        );
        return Ok(());
    }

    let destination = context
        .store
        .find_secret_path(&job.project_id, &import.folder_id)
        .await?
        .ok_or_else(|| ReplicationError::ImportedFolderMissing(import.folder_id.clone()))?;

    let reserve = context
        .store
        .find_or_create_reserved_folder(&import.folder_id, &import.id)
        .await?;

    let indexes: Vec<BlindIndex> = replicated
        .iter()
        .filter_map(|version| version.blind_index.clone())
        .collect();
    let local = context
        .store
        .find_secrets_by_blind_indexes(&reserve.id, &indexes)
        .await?;
    let mut local_by_index: HashMap<BlindIndex, Secret> = HashMap::new();
    for secret in local {
        if let Some(blind_index) = secret.blind_index.clone() {
            local_by_index.entry(blind_index).or_insert(secret);
        }
    }

    let classified = classify(operations, sources_by_id, &local_by_index);

    let policy = context
        .policies
        .bound_policy(
            &job.project_id,
            &destination.environment_slug,
            &destination.path,
        )
        .await?;

    let path = match (policy, job.actor) {
        (Some(policy), Actor::User) => {
            let membership = context
                .store
                .find_membership(&job.project_id, &job.actor_id)
                .await?
                .ok_or_else(|| {
                    ReplicationError::MembershipMissing(
                        job.actor_id.clone(),
                        job.project_id.clone(),
                    )
                })?;
            WritePath::Approval { policy, membership }
        }
        _ => WritePath::Direct,
    };

    if let Some(nested) = path.record(context, &reserve, &classified).await? {
        context
            .syncer
            .enqueue(SecretSyncBatch {
                project_id: job.project_id.clone(),
                secret_path: destination.path.clone(),
                environment_slug: destination.environment_slug.clone(),
                environment_id: reserve.env_id.clone(),
                folder_id: reserve.id.clone(),
                secrets: nested,
                actor: job.actor,
                actor_id: job.actor_id.clone(),
                dedupe_replication_queue: job.dedupe_replication_queue.clone(),
                dedupe_queue: job.dedupe_queue.clone(),
            })
            .await?;
    }

    context
        .coordinator
        .set_key(
            &marker_key,
            ReplicationStamp {
                completed_at: Utc::now(),
            },
            Some(SUCCESS_MARKER_TTL),
        )
        .await?;
    context
        .store
        .update_import_replication_state(&import.id, Utc::now(), None, true)
        .await?;

    Ok(())
}
