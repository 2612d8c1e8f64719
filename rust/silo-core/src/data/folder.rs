use super::{EnvironmentId, FolderId, ImportId};
use serde::{Deserialize, Serialize};

/// Name prefix of reserved replication folders. The full name of the
/// reserved folder for an import is this prefix followed by the import id;
/// external collaborators may rely on the prefix to recognize reserved
/// folders, so it is part of the public contract.
pub const RESERVED_FOLDER_PREFIX: &str = "__reserve_replication_";

/// The name of the reserved child folder that hosts replicated copies of
/// secrets for the given import
pub fn reserved_folder_name(import_id: &ImportId) -> String {
    format!("{}{}", RESERVED_FOLDER_PREFIX, import_id)
}

/// A secret folder. Folders form a tree per environment; a *reserved* folder
/// is a child folder that hosts replicated secrets for exactly one import
/// and whose name encodes that import's id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Folder {
    /// Identifier of this folder
    pub id: FolderId,
    /// Environment this folder belongs to
    pub env_id: EnvironmentId,
    /// Parent folder, if this is not an environment root
    pub parent_id: Option<FolderId>,
    /// Display name; for reserved folders this is
    /// [reserved_folder_name]`(import_id)`
    pub name: String,
    /// Slash-separated path of this folder within its environment
    pub path: String,
    /// Whether this folder is reserved for hosting replicated secrets
    pub is_reserved: bool,
}

/// The external-facing location of a folder, as surfaced to approval
/// policies and downstream sync consumers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderPath {
    /// Slug of the environment the folder lives in
    pub environment_slug: String,
    /// Identifier of that environment
    pub environment_id: EnvironmentId,
    /// Slash-separated path of the folder
    pub path: String,
}
