//! Persisted deployment records.
//!
//! A [`DeploymentRecord`] is the unit of truth for one (project, environment)
//! pair. Its resource list is append-only while provisioning and shrinks from
//! the tail during rollback, only after a destruction is confirmed.

use crate::detection::DetectionResult;
use crate::error::DeployError;
use crate::strategy::StrategyKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Stable project identity: `<slug>-<12 hex chars of sha256(origin)>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the identity from a repository URL or a canonical local path.
    pub fn derive(origin: &str) -> Self {
        let trimmed = origin.trim_end_matches('/');
        let last = trimmed
            .rsplit(['/', '\\', ':'])
            .next()
            .unwrap_or(trimmed)
            .trim_end_matches(".git");

        let mut slug: String = last
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        slug = slug.trim_matches('-').to_string();
        slug.truncate(40);
        if slug.is_empty() {
            slug = "project".to_string();
        }

        let digest = Sha256::digest(trimmed.as_bytes());
        let hash = hex::encode(digest);
        Self(format!("{}-{}", slug, &hash[..12]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn all() -> &'static [Environment] {
        &[Environment::Dev, Environment::Staging, Environment::Prod]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "staging" | "stage" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Prod),
            other => Err(DeployError::Config(format!(
                "unknown environment '{}'. Valid options: dev, staging, prod",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    ObjectStoreBucket,
    ComputeInstance,
    SecurityGroup,
    KeyPair,
    BucketPolicy,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ObjectStoreBucket => "object-store-bucket",
            ResourceKind::ComputeInstance => "compute-instance",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::KeyPair => "key-pair",
            ResourceKind::BucketPolicy => "bucket-policy",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceStatus {
    /// Create requested; the external id is not confirmed yet.
    Provisioning,
    Active,
    Destroying,
    Destroyed,
    /// Exists (or existed) outside the tool's confirmed knowledge.
    Orphaned,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Provisioning => "provisioning",
            ResourceStatus::Active => "active",
            ResourceStatus::Destroying => "destroying",
            ResourceStatus::Destroyed => "destroyed",
            ResourceStatus::Orphaned => "orphaned",
        }
    }
}

/// A cloud resource this tool created and is responsible for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub id: String,
    pub kind: ResourceKind,
    /// Deterministic name used at creation time; lets a lost create be found.
    pub name: String,
    /// Opaque identifier returned by the gateway. Equals `name` until confirmed.
    pub external_id: String,
    pub region: String,
    pub created_at: DateTime<Utc>,
    pub status: ResourceStatus,
}

impl ResourceHandle {
    pub fn intent(kind: ResourceKind, name: impl Into<String>, region: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            external_id: name.clone(),
            name,
            region: region.into(),
            created_at: Utc::now(),
            status: ResourceStatus::Provisioning,
        }
    }
}

/// Lifecycle state machine of a deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    Init,
    Detected,
    Building,
    Provisioning,
    Deploying,
    Exposed,
    Failed,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Init => "INIT",
            LifecycleStatus::Detected => "DETECTED",
            LifecycleStatus::Building => "BUILDING",
            LifecycleStatus::Provisioning => "PROVISIONING",
            LifecycleStatus::Deploying => "DEPLOYING",
            LifecycleStatus::Exposed => "EXPOSED",
            LifecycleStatus::Failed => "FAILED",
        }
    }

    /// States a live run passes through; finding one on load means the
    /// previous run died mid-stage.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::Building | LifecycleStatus::Provisioning | LifecycleStatus::Deploying
        )
    }

    pub fn can_transition_to(&self, next: LifecycleStatus) -> bool {
        use LifecycleStatus::*;

        if next == Failed {
            return *self != Failed;
        }

        matches!(
            (self, next),
            (Init, Detected)
                | (Detected, Building)
                | (Building, Provisioning)
                | (Provisioning, Deploying)
                | (Deploying, Exposed)
                | (Exposed, Building)
                | (Failed, Building)
                | (Failed, Provisioning)
        )
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a record is in `FAILED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub code: String,
    pub message: String,
    pub stage: LifecycleStatus,
    pub at: DateTime<Utc>,
}

/// Project registered by `init`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub root: PathBuf,
    pub origin: Option<String>,
    pub detection: DetectionResult,
    pub initialized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub project_id: ProjectId,
    pub environment: Environment,
    pub detection: DetectionResult,
    pub strategy: StrategyKind,
    pub resources: Vec<ResourceHandle>,
    pub status: LifecycleStatus,
    pub last_error: Option<FailureInfo>,
    pub public_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn new(
        project_id: ProjectId,
        environment: Environment,
        detection: DetectionResult,
        strategy: StrategyKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            project_id,
            environment,
            detection,
            strategy,
            resources: Vec::new(),
            status: LifecycleStatus::Init,
            last_error: None,
            public_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to `next`, rejecting edges the state machine does not allow.
    pub fn transition(&mut self, next: LifecycleStatus) -> Result<(), DeployError> {
        if !self.status.can_transition_to(next) {
            return Err(DeployError::InvalidTransition {
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        // url is only meaningful while EXPOSED
        self.public_url = None;
        if next != LifecycleStatus::Failed {
            self.last_error = None;
        }
        self.touch();
        Ok(())
    }

    pub fn expose(&mut self, url: impl Into<String>) -> Result<(), DeployError> {
        self.transition(LifecycleStatus::Exposed)?;
        self.public_url = Some(url.into());
        Ok(())
    }

    /// Records the failure and moves to `FAILED`. Resources are left untouched.
    /// Failing an already failed record keeps the stage of the first failure.
    pub fn fail(&mut self, error: &DeployError) {
        let stage = match (&self.last_error, self.status) {
            (Some(previous), LifecycleStatus::Failed) => previous.stage,
            (_, status) => status,
        };
        self.status = LifecycleStatus::Failed;
        self.public_url = None;
        self.last_error = Some(FailureInfo {
            code: error.code().to_string(),
            message: error.to_string(),
            stage,
            at: Utc::now(),
        });
        self.touch();
    }

    /// Stage the previous run was in when it failed.
    pub fn failed_stage(&self) -> Option<LifecycleStatus> {
        self.last_error.as_ref().map(|e| e.stage)
    }

    pub fn resource(&self, kind: ResourceKind) -> Option<&ResourceHandle> {
        self.resources.iter().find(|h| h.kind == kind)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut ResourceHandle> {
        self.resources.iter_mut().find(|h| h.id == id)
    }

    pub fn active_resource(&self, kind: ResourceKind) -> Option<&ResourceHandle> {
        self.resources
            .iter()
            .find(|h| h.kind == kind && h.status == ResourceStatus::Active)
    }

    pub fn track(&mut self, handle: ResourceHandle) {
        self.resources.push(handle);
        self.touch();
    }

    pub fn untrack(&mut self, id: &str) -> Option<ResourceHandle> {
        let pos = self.resources.iter().position(|h| h.id == id)?;
        self.touch();
        Some(self.resources.remove(pos))
    }

    pub fn set_resource_status(&mut self, id: &str, status: ResourceStatus) {
        if let Some(handle) = self.resource_mut(id) {
            handle.status = status;
        }
        self.touch();
    }

    pub fn resource_kinds(&self) -> Vec<ResourceKind> {
        self.resources.iter().map(|h| h.kind).collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
