use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use silo_core::data::{ActorId, EnvironmentId, FolderId, ImportId, JobId, Operation, ProjectId, SecretId};

use crate::worker_queue::QueueJob;

/// The principal on whose behalf a replication job runs. Only user actors
/// are subject to approval policies; machine actors always write directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    /// A human user acting through the dashboard or API
    User,
    /// A service token
    Service,
    /// A machine identity
    Identity,
    /// The platform itself (scheduled maintenance, migrations)
    Platform,
}

/// One incoming change notification: a source secret id and the operation
/// the dashboard reported for it. The reported operation is a hint only;
/// reconciliation against the destination decides the effective one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretOperation {
    /// Source secret id
    pub id: SecretId,
    /// Reported operation
    pub operation: Operation,
}

/// A queued replication job describing a batch of changes in one source
/// folder. Delivery is at-least-once; replays of the same `job_id` are
/// deduplicated per import via short-lived success markers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationJob {
    /// Stable identity of this job across redeliveries
    pub job_id: JobId,
    /// The changed source secrets
    pub secrets: Vec<SecretOperation>,
    /// The source folder
    pub folder_id: FolderId,
    /// Path of the source folder
    pub secret_path: String,
    /// Environment of the source folder
    pub environment_id: EnvironmentId,
    /// Project the source folder belongs to
    pub project_id: ProjectId,
    /// Kind of principal that caused the change
    pub actor: Actor,
    /// Identity of that principal
    pub actor_id: ActorId,
    /// When present, only these imports are considered (used by retries and
    /// by targeted resyncs)
    pub pick_only_import_ids: Option<HashSet<ImportId>>,
    /// Dedup hints forwarded to downstream replication enqueues
    pub dedupe_replication_queue: Option<HashSet<String>>,
    /// Dedup hints forwarded to downstream integration-sync enqueues
    pub dedupe_queue: Option<HashSet<String>>,
}

impl QueueJob for ReplicationJob {
    fn job_id(&self) -> &JobId {
        &self.job_id
    }
}
