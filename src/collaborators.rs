//! Interfaces to the systems the engine drives but does not implement.
//!
//! Build tooling, the cloud API, remote hosts and source control are reached
//! only through these traits. Process-backed implementations live in
//! [`crate::adapters`]; tests substitute in-memory fakes.

use crate::detection::FrameworkVariant;
use crate::error::ProvisioningFailure;
use crate::state::ResourceKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Region and credential profile handed to the cloud collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudContext {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl CloudContext {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            profile: None,
        }
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }
}

/// A single build tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl BuildCommand {
    pub fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Canonical build for a framework: install dependencies, then build.
    /// Next.js is built on the host from its container descriptor.
    pub fn canonical(framework: FrameworkVariant) -> Vec<BuildCommand> {
        match framework {
            FrameworkVariant::React | FrameworkVariant::ReactVite | FrameworkVariant::Angular => {
                vec![
                    BuildCommand::new("npm", &["install"]),
                    BuildCommand::new("npm", &["run", "build"]),
                ]
            }
            FrameworkVariant::NextJs => Vec::new(),
        }
    }
}

impl fmt::Display for BuildCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Failure of a local or remote process collaborator.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("`{command}` exited with {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to launch `{command}`: {message}")]
    Spawn { command: String, message: String },

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait BuildRunner: Send + Sync {
    async fn run(&self, app_root: &Path, command: &BuildCommand) -> Result<(), ExecutionError>;
}

/// Errors reported by the cloud gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// The outcome of the call is unknown; the resource may or may not exist.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }
}

impl From<&GatewayError> for ProvisioningFailure {
    fn from(err: &GatewayError) -> Self {
        match err {
            GatewayError::PermissionDenied(_) => ProvisioningFailure::PermissionDenied,
            GatewayError::QuotaExceeded(_) => ProvisioningFailure::QuotaExceeded,
            GatewayError::Timeout(_) => ProvisioningFailure::Timeout,
            GatewayError::NotFound(_) | GatewayError::Other(_) => ProvisioningFailure::Unknown,
        }
    }
}

/// Everything the gateway needs to create one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Deterministic name; creation is tagged with it so it can be looked up.
    pub name: String,
    pub region: String,
    pub tags: BTreeMap<String, String>,
    /// External ids of resources this one attaches to.
    pub depends_on: BTreeMap<ResourceKind, String>,
    pub ingress_ports: Vec<u16>,
    pub instance_type: Option<String>,
    pub image_id: Option<String>,
    pub public_key_path: Option<PathBuf>,
}

#[async_trait]
pub trait CloudGateway: Send + Sync {
    /// Creates a resource and returns its external id.
    async fn create(&self, kind: ResourceKind, spec: &ResourceSpec)
        -> Result<String, GatewayError>;

    /// Destroys a resource. `NotFound` means it is already gone.
    async fn destroy(&self, kind: ResourceKind, external_id: &str) -> Result<(), GatewayError>;

    /// Applies the setup `create` performs once the resource itself exists.
    /// Safe to repeat; run when adopting a resource whose create was never
    /// confirmed, since existing does not mean configured.
    async fn configure(
        &self,
        kind: ResourceKind,
        external_id: &str,
        spec: &ResourceSpec,
    ) -> Result<(), GatewayError>;

    /// Finds a resource by the deterministic name it was created with.
    async fn lookup(&self, kind: ResourceKind, name: &str) -> Result<Option<String>, GatewayError>;

    /// Syncs a local artifact directory into a bucket.
    async fn upload_artifacts(&self, bucket: &str, artifacts: &Path) -> Result<(), GatewayError>;

    /// Public address of a compute instance.
    async fn public_address(&self, instance_id: &str) -> Result<String, GatewayError>;
}

/// Connection details of a provisioned host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub address: String,
    pub user: String,
    pub ssh_key: Option<PathBuf>,
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Installs the container runtime if missing.
    async fn ensure_runtime(&self, host: &RemoteHost) -> Result<(), ExecutionError>;

    /// Transfers the descriptor and build context, builds and (re)starts the
    /// container, and returns the URL it is served on.
    async fn deploy_container(
        &self,
        host: &RemoteHost,
        descriptor: &Path,
        build_context: &Path,
    ) -> Result<String, ExecutionError>;
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetches `origin` into `dest`, which must not exist yet.
    async fn fetch(&self, origin: &str, dest: &Path) -> Result<(), ExecutionError>;
}

/// Whether an `init` argument names a remote repository rather than a path.
pub fn is_remote_origin(source: &str) -> bool {
    source.starts_with("http://")
        || source.starts_with("https://")
        || source.starts_with("ssh://")
        || source.starts_with("git@")
        || source.ends_with(".git")
}
