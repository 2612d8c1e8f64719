use silo_core::{
    data::{Folder, Operation, SecretVersion},
    error::ReplicationError,
};
use silo_storage::{NewSecret, ReplicaStore, SecretReferenceUpsert, SecretUpdate, StoreTransaction};

use super::diff::ClassifiedOp;
use crate::NestedSecret;

/// Apply a classified diff directly to the reserved folder: one transaction
/// covering the bulk insert, the bulk update and the delete, fanning out
/// version rows and reference joins the way the ordinary write path does.
/// Returns the materialized changes for the downstream sync batch.
pub(crate) async fn apply_directly<S>(
    store: &S,
    reserve: &Folder,
    classified: &[ClassifiedOp],
) -> Result<Vec<NestedSecret>, ReplicationError>
where
    S: ReplicaStore,
{
    let mut creates = Vec::new();
    let mut updates = Vec::new();
    let mut deletes = Vec::new();

    for op in classified {
        match op.operation {
            Operation::Create => creates.push(replicated_content(&op.source)),
            Operation::Update => {
                if let Some(local) = &op.local {
                    updates.push(SecretUpdate {
                        id: local.id.clone(),
                        content: replicated_content(&op.source),
                    });
                }
            }
            Operation::Delete => {
                // The delete must target the replica's own row; the source
                // id matches nothing in this folder.
                if let Some(local) = &op.local {
                    deletes.push(local.id.clone());
                }
            }
        }
    }

    let folder_id = reserve.id.clone();
    let nested = store
        .transaction(move |tx| async move {
            let inserted = tx.insert_secrets(&folder_id, creates).await?;
            let updated = tx.update_secrets(&folder_id, updates).await?;
            let deleted = tx.delete_replicated_secrets(&folder_id, &deletes).await?;

            let references = inserted
                .iter()
                .chain(updated.iter())
                .map(|secret| SecretReferenceUpsert {
                    secret_id: secret.id.clone(),
                    references: secret.tags.clone(),
                })
                .collect();
            tx.upsert_secret_references(references).await?;

            let mut nested = Vec::new();
            nested.extend(inserted.into_iter().map(|secret| NestedSecret {
                id: secret.id,
                version: secret.version,
                operation: Operation::Create,
            }));
            nested.extend(updated.into_iter().map(|secret| NestedSecret {
                id: secret.id,
                version: secret.version,
                operation: Operation::Update,
            }));
            nested.extend(deleted.into_iter().map(|secret| NestedSecret {
                id: secret.id,
                version: secret.version,
                operation: Operation::Delete,
            }));
            Ok(nested)
        })
        .await
        .map_err(|error| ReplicationError::Transaction(error.to_string()))?;

    Ok(nested)
}

/// The content written into a replica: every field of the source document,
/// verbatim, with the replicated flag raised
fn replicated_content(source: &SecretVersion) -> NewSecret {
    NewSecret {
        blind_index: source.blind_index.clone(),
        kind: source.kind,
        key_encoding: source.key_encoding,
        algorithm: source.algorithm.clone(),
        metadata: source.metadata.clone(),
        secret_key: source.secret_key.clone(),
        secret_value: source.secret_value.clone(),
        secret_comment: source.secret_comment.clone(),
        skip_multiline_encoding: source.skip_multiline_encoding,
        is_replicated: true,
        tags: source.tags.clone(),
    }
}
