use std::{collections::HashMap, future::Future};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use silo_core::data::{
    ActorId, ApprovalRequest, ApprovalRequestSecret, BlindIndex, CipherText, EnvironmentId,
    Folder, FolderId, FolderPath, ImportId, KeyEncoding, Membership, ProjectId, RequestId, Secret,
    SecretId, SecretImport, SecretKind, SecretVersion, SecretVersionId,
};

/// Content of a secret to be written into a replica folder. Everything here
/// is copied verbatim from a source document; the store assigns the row id
/// and version number.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewSecret {
    /// Cross-folder identity of the secret's key
    pub blind_index: Option<BlindIndex>,
    /// Shared or personal
    pub kind: SecretKind,
    /// Encoding of the plaintext prior to encryption
    pub key_encoding: KeyEncoding,
    /// Name of the cipher used by the upstream crypto layer
    pub algorithm: String,
    /// Application-defined metadata, carried verbatim
    pub metadata: Option<serde_json::Value>,
    /// Encrypted secret key (name)
    pub secret_key: CipherText,
    /// Encrypted secret value
    pub secret_value: CipherText,
    /// Encrypted secret comment, when present
    pub secret_comment: Option<CipherText>,
    /// Upstream flag controlling multiline handling at materialization time
    pub skip_multiline_encoding: Option<bool>,
    /// Whether the written row is a replicated copy
    pub is_replicated: bool,
    /// Slugs of tags to join to the written secret
    pub tags: Vec<String>,
}

/// A bulk update of one existing secret: the row to overwrite and the
/// content to overwrite it with
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretUpdate {
    /// The local secret row to overwrite
    pub id: SecretId,
    /// The new content
    pub content: NewSecret,
}

/// A secret-to-references join row, upserted by the shared write fan-out
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretReferenceUpsert {
    /// The secret owning the references
    pub secret_id: SecretId,
    /// Reference slugs joined to the secret
    pub references: Vec<String>,
}

/// The write surface available inside a [ReplicaStore::transaction]. Every
/// operation stages against the same transaction; either all staged writes
/// commit or none do.
#[async_trait]
pub trait StoreTransaction: Clone + Send + Sync {
    /// Bulk-insert secrets into a folder. The insert fans out the way the
    /// ordinary write path does: initial version rows and tag joins are
    /// written alongside the secrets themselves.
    async fn insert_secrets(
        &self,
        folder_id: &FolderId,
        secrets: Vec<NewSecret>,
    ) -> Result<Vec<Secret>>;

    /// Bulk-overwrite existing secrets in a folder, appending a new version
    /// row per updated secret
    async fn update_secrets(
        &self,
        folder_id: &FolderId,
        updates: Vec<SecretUpdate>,
    ) -> Result<Vec<Secret>>;

    /// Delete the replicated secrets among `secret_ids` within a folder,
    /// returning the deleted rows. Rows that are not replicated copies are
    /// left untouched.
    async fn delete_replicated_secrets(
        &self,
        folder_id: &FolderId,
        secret_ids: &[SecretId],
    ) -> Result<Vec<Secret>>;

    /// Upsert secret-to-reference join rows
    async fn upsert_secret_references(
        &self,
        references: Vec<SecretReferenceUpsert>,
    ) -> Result<()>;

    /// Insert a new approval request
    async fn create_approval_request(&self, request: ApprovalRequest) -> Result<ApprovalRequest>;

    /// Insert the classified changes belonging to an approval request
    async fn insert_approval_request_secrets(
        &self,
        secrets: Vec<ApprovalRequestSecret>,
    ) -> Result<()>;

    /// Join tag slugs to an approval request's change set
    async fn insert_approval_secret_tags(
        &self,
        request_id: &RequestId,
        tags: Vec<String>,
    ) -> Result<()>;
}

/// A [ReplicaStore] is the persistence gateway of the replication worker:
/// read access to secrets, versions, folders, imports and memberships, plus
/// a transaction primitive scoping a set of writes atomically.
///
/// All reads outside a transaction observe committed state only.
#[async_trait]
pub trait ReplicaStore: Clone + Send + Sync + 'static {
    /// The transaction handle type passed to [ReplicaStore::transaction]
    /// closures
    type Tx: StoreTransaction + 'static;

    /// Find every replication-eligible import subscribed to the given
    /// source path and environment
    async fn find_replication_imports(
        &self,
        import_path: &str,
        import_env: &EnvironmentId,
    ) -> Result<Vec<SecretImport>>;

    /// Batch-read the current version rows of the given secrets within a
    /// source folder
    async fn find_secret_versions(
        &self,
        folder_id: &FolderId,
        secret_ids: &[SecretId],
    ) -> Result<Vec<SecretVersion>>;

    /// Resolve the external-facing `(environment slug, path)` of a folder
    /// within a project
    async fn find_secret_path(
        &self,
        project_id: &ProjectId,
        folder_id: &FolderId,
    ) -> Result<Option<FolderPath>>;

    /// Find the reserved replication folder for an import under the given
    /// parent, creating it if absent. Creation is atomic with the lookup:
    /// two concurrent calls for the same import observe the same folder.
    async fn find_or_create_reserved_folder(
        &self,
        parent_id: &FolderId,
        import_id: &ImportId,
    ) -> Result<Folder>;

    /// Find the secrets within a folder whose blind index is among
    /// `indexes`
    async fn find_secrets_by_blind_indexes(
        &self,
        folder_id: &FolderId,
        indexes: &[BlindIndex],
    ) -> Result<Vec<Secret>>;

    /// Batch-read the latest version row of each given secret within a
    /// folder
    async fn find_latest_versions(
        &self,
        folder_id: &FolderId,
        secret_ids: &[SecretId],
    ) -> Result<HashMap<SecretId, SecretVersion>>;

    /// Look up a user's membership in a project
    async fn find_membership(
        &self,
        project_id: &ProjectId,
        user_id: &ActorId,
    ) -> Result<Option<Membership>>;

    /// Record the outcome of a replication attempt on the import row
    async fn update_import_replication_state(
        &self,
        import_id: &ImportId,
        last_replicated: DateTime<Utc>,
        replication_status: Option<String>,
        is_replication_success: bool,
    ) -> Result<()>;

    /// Promote the given version rows to `is_replicated = true`
    async fn mark_versions_replicated(&self, version_ids: &[SecretVersionId]) -> Result<()>;

    /// Run `op` within a transaction: the closure receives a
    /// [StoreTransaction] handle, and every write staged through it commits
    /// atomically when the closure returns `Ok`. An `Err` return rolls the
    /// whole transaction back.
    fn transaction<'a, T, F, Fut>(&'a self, op: F) -> BoxFuture<'a, Result<T>>
    where
        T: Send + 'a,
        F: FnOnce(Self::Tx) -> Fut + Send + 'a,
        Fut: Future<Output = Result<T>> + Send + 'a;
}
