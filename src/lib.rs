//! deploy-tool - frontend deployment orchestration
//!
//! Detects the framework of a frontend project, selects a deployment strategy,
//! provisions the cloud resources the strategy needs and records each of them
//! in a persistent per-(project, environment) record, so that a deployment can
//! be resumed after a failure or rolled back completely.
//!
//! # Core Concepts
//!
//! - **Detection**: [`FrameworkDetector`] evaluates an ordered rule chain
//!   (Angular, Next.js, React+Vite, React) against the project tree.
//! - **Strategy**: [`StrategySelector`] binds a framework to static-site or
//!   containerized-host deployment and the resources it needs.
//! - **State**: a [`DeploymentStore`] holds one [`DeploymentRecord`] per
//!   project and environment; it is written before every external side effect.
//! - **Orchestration**: [`DeploymentOrchestrator`] drives
//!   `INIT → DETECTED → BUILDING → PROVISIONING → DEPLOYING → EXPOSED`.
//! - **Rollback**: [`RollbackManager`] destroys tracked resources newest first.
//!
//! External systems (build tools, cloud API, remote hosts, git) are reached
//! through the traits in [`collaborators`]; [`adapters`] holds the
//! process-backed implementations.

pub mod adapters;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod descriptor;
pub mod detection;
pub mod error;
pub mod fs;
pub mod orchestrator;
pub mod progress;
pub mod provisioner;
pub mod rollback;
pub mod state;
pub mod strategy;
pub mod util;

pub use collaborators::{
    BuildCommand, BuildRunner, CloudContext, CloudGateway, ExecutionError, GatewayError,
    RemoteExecutor, RemoteHost, ResourceSpec, SourceFetcher,
};
pub use config::{ConfigError, DeployConfig};
pub use detection::{DetectionResult, FrameworkDetector, FrameworkVariant};
pub use error::{DeployError, ProvisioningFailure};
pub use orchestrator::{Collaborators, DeploymentOrchestrator, OrchestratorSettings};
pub use provisioner::{ProvisionerSettings, ResourceProvisioner};
pub use rollback::{RollbackManager, RollbackOptions, RollbackReport};
pub use state::{
    DeploymentRecord, DeploymentStore, Environment, FileDeploymentStore, LifecycleStatus,
    MemoryStore, ProjectId, ProjectRecord, ResourceHandle, ResourceKind, ResourceStatus,
};
pub use strategy::{DeploymentStrategy, StrategyKind, StrategySelector};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
