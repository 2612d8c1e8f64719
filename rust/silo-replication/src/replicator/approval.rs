use rand::{distributions::Alphanumeric, Rng};
use silo_core::{
    data::{
        ApprovalRequest, ApprovalRequestSecret, ApprovalStatus, BoundPolicy, Folder, Membership,
        Operation, RequestId, SecretId,
    },
    error::ReplicationError,
};
use silo_storage::{ReplicaStore, StoreTransaction};

use super::diff::ClassifiedOp;

const APPROVAL_SLUG_LEN: usize = 10;

/// Record a classified diff as an open approval request instead of writing
/// it: one request row plus one change row per classified operation, all in
/// one transaction. Updates and deletes pin the local secret and its latest
/// version so the eventual merge applies precisely. Nothing is enqueued
/// downstream; the sync has to wait for the merge.
pub(crate) async fn record_for_approval<S>(
    store: &S,
    policy: &BoundPolicy,
    membership: &Membership,
    reserve: &Folder,
    classified: &[ClassifiedOp],
) -> Result<(), ReplicationError>
where
    S: ReplicaStore,
{
    // Latest local versions of every non-create target, read in one batch
    // before the transaction opens.
    let local_ids: Vec<SecretId> = classified
        .iter()
        .filter(|op| op.operation != Operation::Create)
        .filter_map(|op| op.local.as_ref().map(|local| local.id.clone()))
        .collect();
    let latest_versions = store.find_latest_versions(&reserve.id, &local_ids).await?;

    let request = ApprovalRequest {
        id: RequestId::generate(),
        folder_id: reserve.id.clone(),
        slug: approval_slug(),
        policy_id: policy.id.clone(),
        status: ApprovalStatus::Open,
        has_merged: false,
        committer_id: membership.id.clone(),
        is_replicated: true,
    };

    let mut secrets = Vec::with_capacity(classified.len());
    let mut tags: Vec<String> = Vec::new();

    for op in classified {
        let (secret_id, secret_version_id) = match (op.operation, &op.local) {
            (Operation::Create, _) | (_, None) => (None, None),
            (_, Some(local)) => (
                Some(local.id.clone()),
                latest_versions
                    .get(&local.id)
                    .map(|version| version.id.clone()),
            ),
        };

        for tag in &op.source.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        secrets.push(ApprovalRequestSecret {
            request_id: request.id.clone(),
            op: op.operation,
            blind_index: op.source.blind_index.clone(),
            kind: op.source.kind,
            key_encoding: op.source.key_encoding,
            algorithm: op.source.algorithm.clone(),
            metadata: op.source.metadata.clone(),
            secret_key: op.source.secret_key.clone(),
            secret_value: op.source.secret_value.clone(),
            secret_comment: op.source.secret_comment.clone(),
            skip_multiline_encoding: op.source.skip_multiline_encoding,
            is_replicated: true,
            secret_id,
            secret_version_id,
        });
    }

    let request_id = request.id.clone();
    store
        .transaction(move |tx| async move {
            let request = tx.create_approval_request(request).await?;
            tx.insert_approval_request_secrets(secrets).await?;
            tx.insert_approval_secret_tags(&request.id, tags).await?;
            Ok(())
        })
        .await
        .map_err(|error| ReplicationError::Transaction(error.to_string()))?;

    debug!("Opened replication approval request {}", request_id);
    Ok(())
}

/// A fresh alphanumeric handle for review UIs
fn approval_slug() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(APPROVAL_SLUG_LEN)
        .map(char::from)
        .collect()
}
