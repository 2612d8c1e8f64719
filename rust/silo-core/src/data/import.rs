use super::{EnvironmentId, FolderId, ImportId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of characters of an error message preserved on the import row when
/// a per-import replication attempt fails
pub const REPLICATION_STATUS_MAX_LEN: usize = 500;

/// A secret import relationship. The *destination* is `folder_id`; the
/// *source* is `(import_env, import_path)`. Only imports with
/// `is_replication` set participate in replication; the remaining fields are
/// bookkeeping written back after every attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretImport {
    /// Identifier of this import
    pub id: ImportId,
    /// Destination folder that subscribed to the source
    pub folder_id: FolderId,
    /// Path of the source folder
    pub import_path: String,
    /// Environment of the source folder
    pub import_env: EnvironmentId,
    /// Whether this import materializes replicated copies (as opposed to a
    /// purely virtual import resolved at read time)
    pub is_replication: bool,
    /// When replication last attempted this import
    pub last_replicated: Option<DateTime<Utc>>,
    /// Truncated error message of the last failed attempt, cleared on
    /// success
    pub replication_status: Option<String>,
    /// Outcome of the last attempt
    pub is_replication_success: Option<bool>,
}

/// Truncate an error message for storage in
/// [SecretImport::replication_status]
pub fn truncate_replication_status(message: &str) -> String {
    message.chars().take(REPLICATION_STATUS_MAX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_truncates_replication_status_messages() {
        let long = "x".repeat(REPLICATION_STATUS_MAX_LEN * 2);
        assert_eq!(
            truncate_replication_status(&long).len(),
            REPLICATION_STATUS_MAX_LEN
        );
        assert_eq!(truncate_replication_status("short"), "short");
    }
}
