//! Persistent deployment state.

mod file;
mod memory;
mod record;
mod store;

pub use file::FileDeploymentStore;
pub use memory::MemoryStore;
pub use record::{
    DeploymentRecord, Environment, FailureInfo, LifecycleStatus, ProjectId, ProjectRecord,
    ResourceHandle, ResourceKind, ResourceStatus,
};
pub use store::{DeploymentLock, DeploymentStore, LockGuard};
