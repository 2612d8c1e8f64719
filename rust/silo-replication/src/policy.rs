use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use silo_core::data::{BoundPolicy, ProjectId};
use tokio::sync::Mutex;

/// An [ApprovalPolicyOracle] answers one question: is an approval policy
/// bound to the given destination? The evaluation machinery behind the
/// answer (reviewer sets, thresholds) is somebody else's concern.
#[async_trait]
pub trait ApprovalPolicyOracle: Clone + Send + Sync {
    /// The policy bound to `(project, environment, path)`, if any
    async fn bound_policy(
        &self,
        project_id: &ProjectId,
        environment_slug: &str,
        path: &str,
    ) -> Result<Option<BoundPolicy>>;
}

/// An in-memory [ApprovalPolicyOracle] backed by explicit bindings
#[derive(Clone, Debug, Default)]
pub struct MemoryPolicyOracle {
    bindings: Arc<Mutex<HashMap<(ProjectId, String, String), BoundPolicy>>>,
}

impl MemoryPolicyOracle {
    /// Creates a new oracle with no bindings
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a policy to a destination
    pub async fn bind_policy(
        &self,
        project_id: ProjectId,
        environment_slug: impl Into<String>,
        path: impl Into<String>,
        policy: BoundPolicy,
    ) {
        self.bindings
            .lock()
            .await
            .insert((project_id, environment_slug.into(), path.into()), policy);
    }
}

#[async_trait]
impl ApprovalPolicyOracle for MemoryPolicyOracle {
    async fn bound_policy(
        &self,
        project_id: &ProjectId,
        environment_slug: &str,
        path: &str,
    ) -> Result<Option<BoundPolicy>> {
        Ok(self
            .bindings
            .lock()
            .await
            .get(&(
                project_id.clone(),
                environment_slug.to_owned(),
                path.to_owned(),
            ))
            .cloned())
    }
}
