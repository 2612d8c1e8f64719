use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use silo_core::data::{ImportId, JobId, SecretId};
use std::time::Duration;

/// The key-value namespace owned by secret replication. No other consumer
/// writes under it.
pub const REPLICATION_NAMESPACE: &str = "secret-replication";

/// How long a replication lock lease lasts before a crashed holder's keys
/// free themselves
pub const LOCK_TTL: Duration = Duration::from_secs(5);

/// How long a contending job waits for the replication locks before giving
/// up and failing over to queue redelivery
pub const LOCK_ACQUIRE_WAIT: Duration = Duration::from_secs(5);

/// Lifetime of per-import success markers. The marker's only job is to span
/// the window between its write and the queue's ack of the enclosing job,
/// so that a redelivery inside that window does not repeat the import.
pub const SUCCESS_MARKER_TTL: Duration = Duration::from_secs(10);

/// The lock key serializing replication episodes of one source secret
pub fn replication_lock_key(secret_id: &SecretId) -> String {
    format!("{REPLICATION_NAMESPACE}/lock/{secret_id}")
}

/// The idempotency marker recording that a given job already completed a
/// given import
pub fn success_key(job_id: &JobId, import_id: &ImportId) -> String {
    format!("{REPLICATION_NAMESPACE}/success/{job_id}/{import_id}")
}

/// Value stored under [success_key]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationStamp {
    /// When the import completed
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_keeps_lock_and_success_keys_in_the_replication_namespace() {
        let lock = replication_lock_key(&SecretId::from("sec-1"));
        let success = success_key(&JobId::from("job-1"), &ImportId::from("imp-1"));

        assert_eq!(lock, "secret-replication/lock/sec-1");
        assert_eq!(success, "secret-replication/success/job-1/imp-1");
        assert!(lock.starts_with(REPLICATION_NAMESPACE));
        assert!(success.starts_with(REPLICATION_NAMESPACE));
    }
}
