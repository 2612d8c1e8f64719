use std::{collections::HashSet, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use silo_core::data::{ActorId, EnvironmentId, FolderId, Operation, ProjectId, SecretId};
use tokio::sync::Mutex;

use crate::Actor;

/// One materialized change within a sync batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedSecret {
    /// The written (or deleted) local secret
    pub id: SecretId,
    /// Its version after the write
    pub version: u32,
    /// What happened to it
    pub operation: Operation,
}

/// A batch describing a folder that just received secret changes, handed to
/// the downstream sync enqueuer so further propagation (cascading
/// replication, external integrations) can occur. The dedup hint sets are
/// forwarded verbatim from the inbound job so downstream enqueues keep
/// deduplicating across the fan-out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretSyncBatch {
    /// Project the folder belongs to
    pub project_id: ProjectId,
    /// External-facing path of the destination folder
    pub secret_path: String,
    /// External-facing environment slug of the destination folder
    pub environment_slug: String,
    /// Environment of the written folder
    pub environment_id: EnvironmentId,
    /// The folder that received the changes
    pub folder_id: FolderId,
    /// The materialized changes
    pub secrets: Vec<NestedSecret>,
    /// Kind of principal that caused the originating change
    pub actor: Actor,
    /// Identity of that principal
    pub actor_id: ActorId,
    /// Dedup hints for downstream replication enqueues
    pub dedupe_replication_queue: Option<HashSet<String>>,
    /// Dedup hints for downstream integration-sync enqueues
    pub dedupe_queue: Option<HashSet<String>>,
}

/// A [SyncEnqueuer] accepts sync batches for further propagation. The queue
/// behind it is a black box here.
#[async_trait]
pub trait SyncEnqueuer: Clone + Send + Sync {
    /// Enqueue one batch
    async fn enqueue(&self, batch: SecretSyncBatch) -> Result<()>;
}

/// An in-memory [SyncEnqueuer] that records every batch it is handed
#[derive(Clone, Debug, Default)]
pub struct MemorySyncEnqueuer {
    batches: Arc<Mutex<Vec<SecretSyncBatch>>>,
}

impl MemorySyncEnqueuer {
    /// Creates a new, empty enqueuer
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch enqueued so far, in order
    pub async fn batches(&self) -> Vec<SecretSyncBatch> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl SyncEnqueuer for MemorySyncEnqueuer {
    async fn enqueue(&self, batch: SecretSyncBatch) -> Result<()> {
        self.batches.lock().await.push(batch);
        Ok(())
    }
}
