use super::{
    BlindIndex, CipherText, FolderId, KeyEncoding, MembershipId, Operation, PolicyId, RequestId,
    SecretId, SecretKind, SecretVersionId,
};
use serde::{Deserialize, Serialize};

/// Lifecycle of an approval request. Requests open, then are closed or
/// merged by external review workflows; replication only ever creates open
/// ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting review
    #[default]
    Open,
    /// Rejected or withdrawn without merging
    Closed,
    /// Reviewed and applied to the destination folder
    Merged,
}

/// An approval policy bound to a destination path, as returned by the policy
/// oracle. The evaluator behind it is a black box; replication only needs
/// the binding itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundPolicy {
    /// Identifier of the policy
    pub id: PolicyId,
    /// Human-readable policy name
    pub name: String,
}

/// A pending change set against a destination replication folder, produced
/// instead of a direct write when a policy binds the destination and the
/// acting principal is a user
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Identifier of this request
    pub id: RequestId,
    /// Destination reserved replication folder the change set targets
    pub folder_id: FolderId,
    /// Short alphanumeric handle for review UIs
    pub slug: String,
    /// Policy that required the approval
    pub policy_id: PolicyId,
    /// Current lifecycle state
    pub status: ApprovalStatus,
    /// Whether the change set was applied
    pub has_merged: bool,
    /// Membership of the user who committed the change set
    pub committer_id: MembershipId,
    /// Whether this request was produced by replication
    pub is_replicated: bool,
}

/// One classified change within an approval request, carrying the source
/// ciphertexts verbatim. For updates and deletes the targeted local secret
/// and its latest version are referenced so the merge can be applied
/// precisely.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApprovalRequestSecret {
    /// The request this change belongs to
    pub request_id: RequestId,
    /// The change to apply on merge
    pub op: Operation,
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
    /// Whether this change was produced by replication
    pub is_replicated: bool,
    /// Local secret targeted by an update or delete
    pub secret_id: Option<SecretId>,
    /// Latest local version of that secret at request time
    pub secret_version_id: Option<SecretVersionId>,
}
