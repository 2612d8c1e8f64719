//! Replication errors

use crate::data::{ActorId, FolderId, ProjectId};
use thiserror::Error;

/// High-level error kinds surfaced by the replication worker. Per-import
/// failures are recorded on the import row and do not abort a job; the
/// remaining kinds propagate to the queue runtime's failure channel.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Any other collaborator failure (persistence, key-value store, policy
    /// oracle, sync enqueuer) not covered by the other errors
    #[error("{0}")]
    Other(anyhow::Error),

    /// Destination folder vanished between subscriber discovery and path
    /// resolution
    #[error("Imported folder {0} is missing")]
    ImportedFolderMissing(FolderId),

    /// On the approval path, the acting user has no membership in the
    /// project and therefore no standing to produce approvals
    #[error("Actor {0} has no membership in project {1}")]
    MembershipMissing(ActorId, ProjectId),

    /// The multi-key replication lock could not be acquired in time
    #[error("Replication locks unavailable: {0}")]
    LockUnavailable(String),

    /// A persistence transaction rolled back
    #[error("Transaction failed: {0}")]
    Transaction(String),
}

impl From<anyhow::Error> for ReplicationError {
    fn from(error: anyhow::Error) -> Self {
        ReplicationError::Other(error)
    }
}
