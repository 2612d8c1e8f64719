use super::{BlindIndex, CipherText, FolderId, KeyEncoding, SecretId, SecretVersionId};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Whether a secret is shared across the project or personal to one user.
/// Personal secrets never replicate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretKind {
    /// Visible to every member of the project
    #[default]
    Shared,
    /// Scoped to a single user
    Personal,
}

/// A change to apply to a secret, as carried by queue payloads and approval
/// request rows
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Insert a new secret
    Create,
    /// Overwrite an existing secret
    Update,
    /// Remove an existing secret
    Delete,
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A secret row. The ciphertext triple for key, value and comment is opaque
/// here; only the blind index gives secrets an identity across folders.
///
/// Invariant: within one folder there is at most one shared secret per blind
/// index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Secret {
    /// Identifier of this secret row
    pub id: SecretId,
    /// Folder the secret lives in
    pub folder_id: FolderId,
    /// Cross-folder identity of the secret's key, when one was computed
    pub blind_index: Option<BlindIndex>,
    /// Shared or personal
    pub kind: SecretKind,
    /// Current version number, starting at 1
    pub version: u32,
    /// Whether this row is a replicated copy owned by a reserved folder
    pub is_replicated: bool,
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
    /// Slugs of tags joined to this secret
    pub tags: Vec<String>,
}

/// An immutable version row of a secret. Versions are what replication
/// actually reads: the eligibility of a change is judged against the version
/// row, and `latest_replicated_version` records how far replication has
/// already propagated this secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretVersion {
    /// Identifier of this version row
    pub id: SecretVersionId,
    /// The secret this version belongs to
    pub secret_id: SecretId,
    /// Version number, starting at 1
    pub version: u32,
    /// Highest source version already propagated from this secret, if any
    pub latest_replicated_version: Option<u32>,
    /// Whether this version has been through a replication episode
    pub is_replicated: bool,
    /// Cross-folder identity of the secret's key, when one was computed
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
    /// Slugs of tags joined to this version
    pub tags: Vec<String>,
}

impl SecretVersion {
    /// Whether this version may be propagated to replicas: it must carry a
    /// blind index, and must either be the first version of its secret or
    /// not precede a version that already replicated.
    pub fn is_replication_eligible(&self) -> bool {
        self.blind_index.is_some()
            && (self.version == 1
                || self
                    .latest_replicated_version
                    .map_or(false, |latest| latest <= self.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(version: u32, latest_replicated_version: Option<u32>) -> SecretVersion {
        SecretVersion {
            id: SecretVersionId::generate(),
            secret_id: SecretId::generate(),
            version,
            latest_replicated_version,
            is_replicated: false,
            blind_index: Some(BlindIndex::from("bi")),
            kind: SecretKind::Shared,
            key_encoding: KeyEncoding::Utf8,
            algorithm: "aes-256-gcm".into(),
            metadata: None,
            secret_key: CipherText::default(),
            secret_value: CipherText::default(),
            secret_comment: None,
            skip_multiline_encoding: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn it_always_considers_first_versions_eligible() {
        assert!(version(1, None).is_replication_eligible());
        assert!(version(1, Some(9)).is_replication_eligible());
    }

    #[test]
    fn it_requires_monotonic_progress_past_the_first_version() {
        assert!(version(3, Some(2)).is_replication_eligible());
        assert!(version(3, Some(3)).is_replication_eligible());
        assert!(!version(3, Some(4)).is_replication_eligible());
        assert!(!version(3, None).is_replication_eligible());
    }

    #[test]
    fn it_rejects_versions_without_a_blind_index() {
        let mut subject = version(1, None);
        subject.blind_index = None;
        assert!(!subject.is_replication_eligible());
    }
}
