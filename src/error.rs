//! Error taxonomy for the deployment engine.
//!
//! Every variant has a stable machine-readable code (printed by the CLI and
//! persisted in failed records) and a process exit code.

use crate::state::{Environment, ProjectId, ResourceHandle, ResourceKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Sub-kind of a provisioning failure. All are retried the same way, so they
/// are surfaced uniformly as `ProvisioningFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProvisioningFailure {
    PermissionDenied,
    QuotaExceeded,
    Timeout,
    Unknown,
}

impl ProvisioningFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningFailure::PermissionDenied => "permission-denied",
            ProvisioningFailure::QuotaExceeded => "quota-exceeded",
            ProvisioningFailure::Timeout => "timeout",
            ProvisioningFailure::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ProvisioningFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("ambiguous framework: found {candidates:?}")]
    AmbiguousFramework { candidates: Vec<String> },

    #[error("unsupported framework: no supported project markers under {}", root.display())]
    UnsupportedFramework { root: PathBuf },

    #[error("invalid manifest {}: {message}", path.display())]
    InvalidManifest { path: PathBuf, message: String },

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("provisioning {kind} failed ({failure}): {message}")]
    ProvisioningFailed {
        kind: ResourceKind,
        failure: ProvisioningFailure,
        message: String,
    },

    #[error("deploy failed: {0}")]
    DeployFailed(String),

    #[error("strategy mismatch: record uses {recorded}, project now requires {detected}; roll back first")]
    StrategyMismatch { recorded: String, detected: String },

    #[error("deployment already in progress for {project}/{environment}")]
    DeploymentInProgress {
        project: ProjectId,
        environment: Environment,
    },

    #[error("no active deployment for {project}/{environment}")]
    NoActiveDeployment {
        project: ProjectId,
        environment: Environment,
    },

    #[error("partial rollback: {} resource(s) survived", surviving.len())]
    PartialRollback { surviving: Vec<ResourceHandle> },

    #[error("failed to fetch source {origin}: {message}")]
    SourceFetchFailed { origin: String, message: String },

    #[error("project {0} is not initialized; run `init` first")]
    ProjectNotInitialized(String),

    #[error("invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },

    #[error("cancelled during {0}")]
    Cancelled(&'static str),

    #[error("state store error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DeployError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DeployError::AmbiguousFramework { .. } => "E_AMBIGUOUS_FRAMEWORK",
            DeployError::UnsupportedFramework { .. } => "E_UNSUPPORTED_FRAMEWORK",
            DeployError::InvalidManifest { .. } => "E_INVALID_MANIFEST",
            DeployError::BuildFailed(_) => "E_BUILD_FAILED",
            DeployError::ProvisioningFailed { .. } => "E_PROVISIONING_FAILED",
            DeployError::DeployFailed(_) => "E_DEPLOY_FAILED",
            DeployError::StrategyMismatch { .. } => "E_STRATEGY_MISMATCH",
            DeployError::DeploymentInProgress { .. } => "E_DEPLOYMENT_IN_PROGRESS",
            DeployError::NoActiveDeployment { .. } => "E_NO_ACTIVE_DEPLOYMENT",
            DeployError::PartialRollback { .. } => "E_PARTIAL_ROLLBACK",
            DeployError::SourceFetchFailed { .. } => "E_SOURCE_FETCH_FAILED",
            DeployError::ProjectNotInitialized(_) => "E_PROJECT_NOT_INITIALIZED",
            DeployError::InvalidTransition { .. } => "E_INVALID_TRANSITION",
            DeployError::Cancelled(_) => "E_CANCELLED",
            DeployError::Storage(_) => "E_STORAGE",
            DeployError::Config(_) => "E_CONFIG",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::AmbiguousFramework { .. }
            | DeployError::UnsupportedFramework { .. }
            | DeployError::InvalidManifest { .. } => 2,
            DeployError::BuildFailed(_) => 3,
            DeployError::ProvisioningFailed { .. } => 4,
            DeployError::DeployFailed(_) => 5,
            DeployError::StrategyMismatch { .. } => 6,
            DeployError::DeploymentInProgress { .. } => 7,
            DeployError::NoActiveDeployment { .. } => 8,
            DeployError::PartialRollback { .. } => 9,
            DeployError::Cancelled(_) => 130,
            _ => 1,
        }
    }

    /// Detection and build errors leave no external state behind.
    pub fn leaves_external_state(&self) -> bool {
        matches!(
            self,
            DeployError::ProvisioningFailed { .. }
                | DeployError::DeployFailed(_)
                | DeployError::PartialRollback { .. }
        )
    }
}
