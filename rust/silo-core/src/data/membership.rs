use super::{ActorId, MembershipId, ProjectId};
use serde::{Deserialize, Serialize};

/// A user's membership in a project. Approval requests are committed by
/// memberships, not bare user ids, so the approval path requires one to
/// exist for the acting user.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Membership {
    /// Identifier of this membership row
    pub id: MembershipId,
    /// The project the user belongs to
    pub project_id: ProjectId,
    /// The user
    pub user_id: ActorId,
}
