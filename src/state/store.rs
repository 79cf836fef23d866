use super::{DeploymentRecord, Environment, ProjectId, ProjectRecord};
use crate::error::DeployError;
use async_trait::async_trait;

/// Marker for whatever keeps a deployment lock alive. Dropping it releases
/// the lock.
pub trait LockGuard: Send + Sync {}

/// Exclusive right to run the orchestrator or rollback for one
/// (project, environment) pair.
pub struct DeploymentLock {
    project: ProjectId,
    environment: Environment,
    _guard: Box<dyn LockGuard>,
}

impl DeploymentLock {
    pub fn new(project: ProjectId, environment: Environment, guard: Box<dyn LockGuard>) -> Self {
        Self {
            project,
            environment,
            _guard: guard,
        }
    }

    pub fn project(&self) -> &ProjectId {
        &self.project
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }
}

impl std::fmt::Debug for DeploymentLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentLock")
            .field("project", &self.project)
            .field("environment", &self.environment)
            .finish()
    }
}

/// Persistent source of truth for deployment records.
///
/// `save` must be atomic: a reader sees either the previous or the new record,
/// never a partial write. Callers save synchronously before every
/// side-effecting step.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn load(
        &self,
        project: &ProjectId,
        environment: Environment,
    ) -> Result<Option<DeploymentRecord>, DeployError>;

    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeployError>;

    /// Removing an absent record is not an error.
    async fn delete(&self, project: &ProjectId, environment: Environment)
        -> Result<(), DeployError>;

    /// All records of a project, ordered by environment.
    async fn list(&self, project: &ProjectId) -> Result<Vec<DeploymentRecord>, DeployError>;

    async fn load_project(&self, project: &ProjectId) -> Result<Option<ProjectRecord>, DeployError>;

    async fn save_project(&self, project: &ProjectRecord) -> Result<(), DeployError>;

    /// Fails fast with `DeploymentInProgress` when another run holds the lock.
    /// The lock must not outlive the process that took it.
    async fn try_lock(
        &self,
        project: &ProjectId,
        environment: Environment,
    ) -> Result<DeploymentLock, DeployError>;
}
