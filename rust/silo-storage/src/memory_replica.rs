use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use silo_core::data::{
    reserved_folder_name, ActorId, ApprovalRequest, ApprovalRequestSecret, BlindIndex,
    EnvironmentId, Folder, FolderId, FolderPath, ImportId, Membership, ProjectId, RequestId,
    Secret, SecretId, SecretImport, SecretKind, SecretVersion, SecretVersionId,
};
use tokio::sync::Mutex;

use crate::{
    NewSecret, ReplicaStore, SecretReferenceUpsert, SecretUpdate, StoreTransaction,
};

#[derive(Clone, Debug, Default)]
struct ReplicaState {
    environments: HashMap<EnvironmentId, String>,
    folders: HashMap<FolderId, Folder>,
    secrets: HashMap<SecretId, Secret>,
    versions: Vec<SecretVersion>,
    imports: HashMap<ImportId, SecretImport>,
    memberships: Vec<Membership>,
    secret_references: HashMap<SecretId, Vec<String>>,
    approval_requests: HashMap<RequestId, ApprovalRequest>,
    approval_request_secrets: Vec<ApprovalRequestSecret>,
    approval_secret_tags: HashMap<RequestId, Vec<String>>,
    insert_faults: HashSet<FolderId>,
}

impl ReplicaState {
    fn latest_version_of(&self, secret_id: &SecretId) -> Option<&SecretVersion> {
        self.versions
            .iter()
            .filter(|version| &version.secret_id == secret_id)
            .max_by_key(|version| version.version)
    }
}

/// An in-memory [ReplicaStore]: the whole persistence gateway behind one
/// shared, clone-to-share state. Suitable for tests and single-process
/// deployments; a SQL-backed implementation would hold the same surface.
#[derive(Clone, Debug, Default)]
pub struct MemoryReplicaStore {
    state: Arc<Mutex<ReplicaState>>,
}

impl MemoryReplicaStore {
    /// Creates a new, empty [MemoryReplicaStore]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an environment and its external-facing slug
    pub async fn add_environment(&self, env_id: EnvironmentId, slug: impl Into<String>) {
        self.state
            .lock()
            .await
            .environments
            .insert(env_id, slug.into());
    }

    /// Insert a folder row
    pub async fn add_folder(&self, folder: Folder) {
        self.state
            .lock()
            .await
            .folders
            .insert(folder.id.clone(), folder);
    }

    /// Insert an import row
    pub async fn add_import(&self, import: SecretImport) {
        self.state
            .lock()
            .await
            .imports
            .insert(import.id.clone(), import);
    }

    /// Insert a membership row
    pub async fn add_membership(&self, membership: Membership) {
        self.state.lock().await.memberships.push(membership);
    }

    /// Insert a secret row
    pub async fn add_secret(&self, secret: Secret) {
        self.state
            .lock()
            .await
            .secrets
            .insert(secret.id.clone(), secret);
    }

    /// Insert a secret version row
    pub async fn add_version(&self, version: SecretVersion) {
        self.state.lock().await.versions.push(version);
    }

    /// All secrets currently in a folder
    pub async fn secrets_in_folder(&self, folder_id: &FolderId) -> Vec<Secret> {
        self.state
            .lock()
            .await
            .secrets
            .values()
            .filter(|secret| &secret.folder_id == folder_id)
            .cloned()
            .collect()
    }

    /// All child folders of the given folder
    pub async fn child_folders(&self, folder_id: &FolderId) -> Vec<Folder> {
        self.state
            .lock()
            .await
            .folders
            .values()
            .filter(|folder| folder.parent_id.as_ref() == Some(folder_id))
            .cloned()
            .collect()
    }

    /// All version rows of a secret, oldest first
    pub async fn versions_of(&self, secret_id: &SecretId) -> Vec<SecretVersion> {
        let mut versions: Vec<SecretVersion> = self
            .state
            .lock()
            .await
            .versions
            .iter()
            .filter(|version| &version.secret_id == secret_id)
            .cloned()
            .collect();
        versions.sort_by_key(|version| version.version);
        versions
    }

    /// Read back an import row
    pub async fn get_import(&self, import_id: &ImportId) -> Option<SecretImport> {
        self.state.lock().await.imports.get(import_id).cloned()
    }

    /// All approval requests targeting a folder
    pub async fn approval_requests_in_folder(&self, folder_id: &FolderId) -> Vec<ApprovalRequest> {
        self.state
            .lock()
            .await
            .approval_requests
            .values()
            .filter(|request| &request.folder_id == folder_id)
            .cloned()
            .collect()
    }

    /// The classified changes belonging to an approval request
    pub async fn approval_secrets_of(&self, request_id: &RequestId) -> Vec<ApprovalRequestSecret> {
        self.state
            .lock()
            .await
            .approval_request_secrets
            .iter()
            .filter(|secret| &secret.request_id == request_id)
            .cloned()
            .collect()
    }

    /// Reference slugs joined to a secret
    pub async fn references_of(&self, secret_id: &SecretId) -> Vec<String> {
        self.state
            .lock()
            .await
            .secret_references
            .get(secret_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Tag slugs joined to an approval request
    pub async fn approval_tags_of(&self, request_id: &RequestId) -> Vec<String> {
        self.state
            .lock()
            .await
            .approval_secret_tags
            .get(request_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Force every subsequent bulk insert into the given folder to fail,
    /// simulating a persistence outage scoped to one destination
    #[cfg(feature = "helpers")]
    pub async fn inject_insert_fault(&self, folder_id: FolderId) {
        self.state.lock().await.insert_faults.insert(folder_id);
    }
}

/// Transaction handle of [MemoryReplicaStore]: writes stage against a copy
/// of the store state and commit by write-back when the enclosing closure
/// succeeds
#[derive(Clone, Debug)]
pub struct MemoryTransaction {
    state: Arc<Mutex<ReplicaState>>,
}

fn write_secret_version(state: &mut ReplicaState, secret: &Secret) {
    // Replicated rows stay eligible for onward replication; ordinary rows
    // carry their propagation watermark forward.
    let latest_replicated_version = if secret.is_replicated {
        Some(secret.version)
    } else {
        state
            .latest_version_of(&secret.id)
            .and_then(|previous| previous.latest_replicated_version)
    };

    state.versions.push(SecretVersion {
        id: SecretVersionId::generate(),
        secret_id: secret.id.clone(),
        version: secret.version,
        latest_replicated_version,
        is_replicated: secret.is_replicated,
        blind_index: secret.blind_index.clone(),
        kind: secret.kind,
        key_encoding: secret.key_encoding,
        algorithm: secret.algorithm.clone(),
        metadata: secret.metadata.clone(),
        secret_key: secret.secret_key.clone(),
        secret_value: secret.secret_value.clone(),
        secret_comment: secret.secret_comment.clone(),
        skip_multiline_encoding: secret.skip_multiline_encoding,
        tags: secret.tags.clone(),
    });
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_secrets(
        &self,
        folder_id: &FolderId,
        secrets: Vec<NewSecret>,
    ) -> Result<Vec<Secret>> {
        let mut state = self.state.lock().await;

        if state.insert_faults.contains(folder_id) {
            bail!("Bulk insert into folder {} failed", folder_id);
        }
        if !state.folders.contains_key(folder_id) {
            bail!("Folder {} not found", folder_id);
        }

        let mut written = Vec::with_capacity(secrets.len());

        for content in secrets {
            if content.kind == SecretKind::Shared {
                if let Some(blind_index) = &content.blind_index {
                    let duplicate = state.secrets.values().any(|existing| {
                        &existing.folder_id == folder_id
                            && existing.kind == SecretKind::Shared
                            && existing.blind_index.as_ref() == Some(blind_index)
                    });
                    if duplicate {
                        bail!(
                            "Shared secret with blind index {} already exists in folder {}",
                            blind_index,
                            folder_id
                        );
                    }
                }
            }

            let secret = Secret {
                id: SecretId::generate(),
                folder_id: folder_id.clone(),
                blind_index: content.blind_index,
                kind: content.kind,
                version: 1,
                is_replicated: content.is_replicated,
                key_encoding: content.key_encoding,
                algorithm: content.algorithm,
                metadata: content.metadata,
                secret_key: content.secret_key,
                secret_value: content.secret_value,
                secret_comment: content.secret_comment,
                skip_multiline_encoding: content.skip_multiline_encoding,
                tags: content.tags,
            };

            write_secret_version(&mut state, &secret);
            state.secrets.insert(secret.id.clone(), secret.clone());
            written.push(secret);
        }

        Ok(written)
    }

    async fn update_secrets(
        &self,
        folder_id: &FolderId,
        updates: Vec<SecretUpdate>,
    ) -> Result<Vec<Secret>> {
        let mut state = self.state.lock().await;
        let mut written = Vec::with_capacity(updates.len());

        for update in updates {
            let existing = state
                .secrets
                .get(&update.id)
                .filter(|secret| &secret.folder_id == folder_id)
                .cloned()
                .ok_or_else(|| {
                    anyhow!("Secret {} not found in folder {}", update.id, folder_id)
                })?;

            let content = update.content;
            let secret = Secret {
                id: existing.id.clone(),
                folder_id: existing.folder_id.clone(),
                blind_index: content.blind_index,
                kind: content.kind,
                version: existing.version + 1,
                is_replicated: content.is_replicated,
                key_encoding: content.key_encoding,
                algorithm: content.algorithm,
                metadata: content.metadata,
                secret_key: content.secret_key,
                secret_value: content.secret_value,
                secret_comment: content.secret_comment,
                skip_multiline_encoding: content.skip_multiline_encoding,
                tags: content.tags,
            };

            write_secret_version(&mut state, &secret);
            state.secrets.insert(secret.id.clone(), secret.clone());
            written.push(secret);
        }

        Ok(written)
    }

    async fn delete_replicated_secrets(
        &self,
        folder_id: &FolderId,
        secret_ids: &[SecretId],
    ) -> Result<Vec<Secret>> {
        let mut state = self.state.lock().await;
        let mut deleted = Vec::new();

        for secret_id in secret_ids {
            let matches = state
                .secrets
                .get(secret_id)
                .map_or(false, |secret| {
                    &secret.folder_id == folder_id && secret.is_replicated
                });
            if matches {
                if let Some(secret) = state.secrets.remove(secret_id) {
                    state.secret_references.remove(secret_id);
                    deleted.push(secret);
                }
            }
        }

        Ok(deleted)
    }

    async fn upsert_secret_references(
        &self,
        references: Vec<SecretReferenceUpsert>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        for upsert in references {
            state
                .secret_references
                .insert(upsert.secret_id, upsert.references);
        }
        Ok(())
    }

    async fn create_approval_request(&self, request: ApprovalRequest) -> Result<ApprovalRequest> {
        let mut state = self.state.lock().await;
        state
            .approval_requests
            .insert(request.id.clone(), request.clone());
        Ok(request)
    }

    async fn insert_approval_request_secrets(
        &self,
        secrets: Vec<ApprovalRequestSecret>,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .approval_request_secrets
            .extend(secrets);
        Ok(())
    }

    async fn insert_approval_secret_tags(
        &self,
        request_id: &RequestId,
        tags: Vec<String>,
    ) -> Result<()> {
        self.state
            .lock()
            .await
            .approval_secret_tags
            .entry(request_id.clone())
            .or_default()
            .extend(tags);
        Ok(())
    }
}

#[async_trait]
impl ReplicaStore for MemoryReplicaStore {
    type Tx = MemoryTransaction;

    async fn find_replication_imports(
        &self,
        import_path: &str,
        import_env: &EnvironmentId,
    ) -> Result<Vec<SecretImport>> {
        Ok(self
            .state
            .lock()
            .await
            .imports
            .values()
            .filter(|import| {
                import.is_replication
                    && import.import_path == import_path
                    && &import.import_env == import_env
            })
            .cloned()
            .collect())
    }

    async fn find_secret_versions(
        &self,
        folder_id: &FolderId,
        secret_ids: &[SecretId],
    ) -> Result<Vec<SecretVersion>> {
        let state = self.state.lock().await;
        let mut versions = Vec::new();

        for secret_id in secret_ids {
            let in_folder = state
                .secrets
                .get(secret_id)
                .map_or(false, |secret| &secret.folder_id == folder_id);
            if !in_folder {
                continue;
            }
            if let Some(version) = state.latest_version_of(secret_id) {
                versions.push(version.clone());
            }
        }

        Ok(versions)
    }

    async fn find_secret_path(
        &self,
        _project_id: &ProjectId,
        folder_id: &FolderId,
    ) -> Result<Option<FolderPath>> {
        let state = self.state.lock().await;
        let folder = match state.folders.get(folder_id) {
            Some(folder) => folder,
            None => return Ok(None),
        };
        let slug = state
            .environments
            .get(&folder.env_id)
            .ok_or_else(|| anyhow!("Environment {} not registered", folder.env_id))?;

        Ok(Some(FolderPath {
            environment_slug: slug.clone(),
            environment_id: folder.env_id.clone(),
            path: folder.path.clone(),
        }))
    }

    async fn find_or_create_reserved_folder(
        &self,
        parent_id: &FolderId,
        import_id: &ImportId,
    ) -> Result<Folder> {
        let mut state = self.state.lock().await;
        let name = reserved_folder_name(import_id);

        // Lookup and create happen under the same state lock, which stands
        // in for a unique constraint on (parent_id, name, is_reserved).
        if let Some(existing) = state.folders.values().find(|folder| {
            folder.parent_id.as_ref() == Some(parent_id)
                && folder.name == name
                && folder.is_reserved
        }) {
            return Ok(existing.clone());
        }

        let parent = state
            .folders
            .get(parent_id)
            .ok_or_else(|| anyhow!("Folder {} not found", parent_id))?;

        let folder = Folder {
            id: FolderId::generate(),
            env_id: parent.env_id.clone(),
            parent_id: Some(parent_id.clone()),
            name: name.clone(),
            path: format!("{}/{}", parent.path.trim_end_matches('/'), name),
            is_reserved: true,
        };
        state.folders.insert(folder.id.clone(), folder.clone());

        debug!("Created reserved replication folder {}", folder.path);
        Ok(folder)
    }

    async fn find_secrets_by_blind_indexes(
        &self,
        folder_id: &FolderId,
        indexes: &[BlindIndex],
    ) -> Result<Vec<Secret>> {
        Ok(self
            .state
            .lock()
            .await
            .secrets
            .values()
            .filter(|secret| {
                &secret.folder_id == folder_id
                    && secret
                        .blind_index
                        .as_ref()
                        .map_or(false, |blind_index| indexes.contains(blind_index))
            })
            .cloned()
            .collect())
    }

    async fn find_latest_versions(
        &self,
        folder_id: &FolderId,
        secret_ids: &[SecretId],
    ) -> Result<HashMap<SecretId, SecretVersion>> {
        let state = self.state.lock().await;
        let mut latest = HashMap::new();

        for secret_id in secret_ids {
            let in_folder = state
                .secrets
                .get(secret_id)
                .map_or(false, |secret| &secret.folder_id == folder_id);
            if !in_folder {
                continue;
            }
            if let Some(version) = state.latest_version_of(secret_id) {
                latest.insert(secret_id.clone(), version.clone());
            }
        }

        Ok(latest)
    }

    async fn find_membership(
        &self,
        project_id: &ProjectId,
        user_id: &ActorId,
    ) -> Result<Option<Membership>> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .iter()
            .find(|membership| {
                &membership.project_id == project_id && &membership.user_id == user_id
            })
            .cloned())
    }

    async fn update_import_replication_state(
        &self,
        import_id: &ImportId,
        last_replicated: DateTime<Utc>,
        replication_status: Option<String>,
        is_replication_success: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let import = state
            .imports
            .get_mut(import_id)
            .ok_or_else(|| anyhow!("Import {} not found", import_id))?;

        import.last_replicated = Some(last_replicated);
        import.replication_status = replication_status;
        import.is_replication_success = Some(is_replication_success);
        Ok(())
    }

    async fn mark_versions_replicated(&self, version_ids: &[SecretVersionId]) -> Result<()> {
        let mut state = self.state.lock().await;
        for version in state.versions.iter_mut() {
            if version_ids.contains(&version.id) {
                version.is_replicated = true;
            }
        }
        Ok(())
    }

    fn transaction<'a, T, F, Fut>(&'a self, op: F) -> BoxFuture<'a, Result<T>>
    where
        T: Send + 'a,
        F: FnOnce(Self::Tx) -> Fut + Send + 'a,
        Fut: Future<Output = Result<T>> + Send + 'a,
    {
        async move {
            // The outer lock is held for the whole transaction, which both
            // serializes transactions and makes rollback trivial: the staged
            // copy is simply discarded on error.
            let mut guard = self.state.lock().await;
            let staged = Arc::new(Mutex::new(guard.clone()));

            let value = op(MemoryTransaction {
                state: staged.clone(),
            })
            .await?;

            *guard = staged.lock().await.clone();
            Ok(value)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::data::{CipherText, KeyEncoding};

    fn folder(id: &str, env: &str, path: &str) -> Folder {
        Folder {
            id: FolderId::from(id),
            env_id: EnvironmentId::from(env),
            parent_id: None,
            name: path.trim_start_matches('/').to_owned(),
            path: path.to_owned(),
            is_reserved: false,
        }
    }

    fn content(blind_index: &str) -> NewSecret {
        NewSecret {
            blind_index: Some(BlindIndex::from(blind_index)),
            kind: SecretKind::Shared,
            key_encoding: KeyEncoding::Utf8,
            algorithm: "aes-256-gcm".into(),
            metadata: None,
            secret_key: CipherText::new("iv", "tag", "key"),
            secret_value: CipherText::new("iv", "tag", "value"),
            secret_comment: None,
            skip_multiline_encoding: None,
            is_replicated: true,
            tags: vec!["replication".into()],
        }
    }

    #[tokio::test]
    async fn it_commits_staged_writes_on_success() -> Result<()> {
        let store = MemoryReplicaStore::new();
        store.add_folder(folder("f-1", "env-1", "/app")).await;

        let written = store
            .transaction(|tx| async move {
                tx.insert_secrets(&FolderId::from("f-1"), vec![content("bi-1")])
                    .await
            })
            .await?;

        assert_eq!(written.len(), 1);
        assert_eq!(written[0].version, 1);

        let secrets = store.secrets_in_folder(&FolderId::from("f-1")).await;
        assert_eq!(secrets.len(), 1);
        assert_eq!(store.versions_of(&secrets[0].id).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn it_rolls_back_every_staged_write_on_error() -> Result<()> {
        let store = MemoryReplicaStore::new();
        store.add_folder(folder("f-1", "env-1", "/app")).await;

        let result = store
            .transaction(|tx| async move {
                tx.insert_secrets(&FolderId::from("f-1"), vec![content("bi-1")])
                    .await?;
                // A failing write after a successful one must discard both.
                tx.insert_secrets(&FolderId::from("f-missing"), vec![content("bi-2")])
                    .await
            })
            .await;

        assert!(result.is_err());
        assert!(store
            .secrets_in_folder(&FolderId::from("f-1"))
            .await
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_duplicate_shared_blind_indexes_within_a_folder() -> Result<()> {
        let store = MemoryReplicaStore::new();
        store.add_folder(folder("f-1", "env-1", "/app")).await;

        store
            .transaction(|tx| async move {
                tx.insert_secrets(&FolderId::from("f-1"), vec![content("bi-1")])
                    .await
            })
            .await?;

        let duplicate = store
            .transaction(|tx| async move {
                tx.insert_secrets(&FolderId::from("f-1"), vec![content("bi-1")])
                    .await
            })
            .await;

        assert!(duplicate.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn it_appends_a_version_row_per_update() -> Result<()> {
        let store = MemoryReplicaStore::new();
        store.add_folder(folder("f-1", "env-1", "/app")).await;

        let written = store
            .transaction(|tx| async move {
                tx.insert_secrets(&FolderId::from("f-1"), vec![content("bi-1")])
                    .await
            })
            .await?;
        let secret_id = written[0].id.clone();

        let update_id = secret_id.clone();
        let updated = store
            .transaction(|tx| async move {
                tx.update_secrets(
                    &FolderId::from("f-1"),
                    vec![SecretUpdate {
                        id: update_id,
                        content: content("bi-1"),
                    }],
                )
                .await
            })
            .await?;

        assert_eq!(updated[0].version, 2);
        assert_eq!(store.versions_of(&secret_id).await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn it_only_deletes_replicated_rows() -> Result<()> {
        let store = MemoryReplicaStore::new();
        store.add_folder(folder("f-1", "env-1", "/app")).await;

        let mut ordinary = content("bi-1");
        ordinary.is_replicated = false;
        let written = store
            .transaction(|tx| async move {
                tx.insert_secrets(&FolderId::from("f-1"), vec![ordinary, content("bi-2")])
                    .await
            })
            .await?;

        let ids: Vec<SecretId> = written.iter().map(|secret| secret.id.clone()).collect();
        let delete_ids = ids.clone();
        let deleted = store
            .transaction(|tx| async move {
                tx.delete_replicated_secrets(&FolderId::from("f-1"), &delete_ids)
                    .await
            })
            .await?;

        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].blind_index, Some(BlindIndex::from("bi-2")));
        assert_eq!(
            store.secrets_in_folder(&FolderId::from("f-1")).await.len(),
            1
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_creates_reserved_folders_exactly_once() -> Result<()> {
        let store = MemoryReplicaStore::new();
        store.add_environment(EnvironmentId::from("env-1"), "dev").await;
        store.add_folder(folder("f-1", "env-1", "/app")).await;

        let import_id = ImportId::from("imp-1");
        let first = store
            .find_or_create_reserved_folder(&FolderId::from("f-1"), &import_id)
            .await?;
        let second = store
            .find_or_create_reserved_folder(&FolderId::from("f-1"), &import_id)
            .await?;

        assert_eq!(first.id, second.id);
        assert!(first.is_reserved);
        assert_eq!(first.name, reserved_folder_name(&import_id));
        assert_eq!(first.path, "/app/__reserve_replication_imp-1");
        assert_eq!(
            store.child_folders(&FolderId::from("f-1")).await.len(),
            1
        );
        Ok(())
    }
}
