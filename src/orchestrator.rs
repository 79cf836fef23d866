//! Deployment state machine.
//!
//! `INIT → DETECTED → BUILDING → PROVISIONING → DEPLOYING → EXPOSED`, with any
//! stage able to fall into `FAILED`. The record is saved after every
//! transition and before every side effect, so a rerun after a crash, a
//! failure or a cancellation resumes from what the store says exists.

use crate::collaborators::{
    is_remote_origin, BuildCommand, BuildRunner, CloudContext, CloudGateway, RemoteExecutor,
    RemoteHost, ResourceSpec, SourceFetcher,
};
use crate::descriptor::{self, APP_PORT, DESCRIPTOR_FILE};
use crate::detection::{DetectionResult, FrameworkDetector, FrameworkVariant};
use crate::error::DeployError;
use crate::fs::FileSystem;
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::provisioner::{ProvisionerSettings, ResourceProvisioner};
use crate::state::{
    DeploymentRecord, DeploymentStore, Environment, LifecycleStatus, ProjectId, ProjectRecord,
    ResourceKind,
};
use crate::strategy::{DeploymentStrategy, StrategyKind, StrategySelector};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum length of an object-store bucket name.
const MAX_BUCKET_NAME: usize = 63;

/// External systems the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DeploymentStore>,
    pub gateway: Arc<dyn CloudGateway>,
    pub builder: Arc<dyn BuildRunner>,
    pub remote: Arc<dyn RemoteExecutor>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub fs: Arc<dyn FileSystem>,
    pub progress: Arc<dyn ProgressHandler>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub cloud: CloudContext,
    /// Directory holding `<project-id>/source` checkouts of remote origins.
    pub projects_dir: PathBuf,
    pub bucket_prefix: String,
    pub instance_type: String,
    pub image_id: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    pub ssh_user: String,
    pub build_timeout: Duration,
    pub deploy_timeout: Duration,
    pub provisioner: ProvisionerSettings,
}

impl OrchestratorSettings {
    pub fn new(cloud: CloudContext, projects_dir: PathBuf) -> Self {
        Self {
            cloud,
            projects_dir,
            bucket_prefix: "static-site".to_string(),
            instance_type: "t3.micro".to_string(),
            image_id: None,
            ssh_key_path: None,
            ssh_user: "ubuntu".to_string(),
            build_timeout: Duration::from_secs(900),
            deploy_timeout: Duration::from_secs(900),
            provisioner: ProvisionerSettings::default(),
        }
    }
}

pub struct DeploymentOrchestrator {
    collaborators: Collaborators,
    settings: OrchestratorSettings,
    detector: FrameworkDetector,
    cancel: CancellationToken,
}

impl DeploymentOrchestrator {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        let detector = FrameworkDetector::new(collaborators.fs.clone());
        Self {
            collaborators,
            settings,
            detector,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling the token aborts the running external call; the record
    /// moves to FAILED and keeps every tracked resource.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Registers a project: fetches remote sources, runs detection and
    /// persists the project record. Rerunning on an unchanged tree keeps the
    /// stored detection untouched.
    pub async fn init(&self, source: &str) -> Result<ProjectRecord, DeployError> {
        let (id, root, origin, _locks) = if is_remote_origin(source) {
            let id = ProjectId::derive(source);
            // deploys build from the checkout; no environment may run while it is replaced
            let mut locks = Vec::with_capacity(Environment::all().len());
            for environment in Environment::all() {
                locks.push(self.collaborators.store.try_lock(&id, *environment).await?);
            }
            let dest = self
                .settings
                .projects_dir
                .join(id.as_str())
                .join("source");
            self.fetch_source(source, &dest).await?;
            (id, dest, Some(source.to_string()), locks)
        } else {
            let root = self
                .collaborators
                .fs
                .canonicalize(Path::new(source))
                .map_err(|e| DeployError::Config(format!("cannot use {}: {}", source, e)))?;
            let id = ProjectId::derive(&root.to_string_lossy());
            (id, root, None, Vec::new())
        };

        let detection = self.detector.detect(&root)?;
        let store = &self.collaborators.store;

        if let Some(existing) = store.load_project(&id).await? {
            if existing.detection.same_outcome(&detection) && existing.root == root {
                debug!(project = %id, "Project unchanged");
                return Ok(existing);
            }
        }

        let strategy = StrategySelector::select(detection.framework).kind;
        for record in store.list(&id).await? {
            if record.strategy != strategy && !record.resources.is_empty() {
                return Err(DeployError::StrategyMismatch {
                    recorded: record.strategy.to_string(),
                    detected: strategy.to_string(),
                });
            }
        }

        let project = ProjectRecord {
            id: id.clone(),
            root,
            origin,
            detection,
            initialized_at: Utc::now(),
        };
        store.save_project(&project).await?;
        info!(
            project = %id,
            framework = %project.detection.framework,
            strategy = %strategy,
            "Project initialized"
        );
        Ok(project)
    }

    async fn fetch_source(&self, origin: &str, dest: &Path) -> Result<(), DeployError> {
        let fetch_failed = |message: String| DeployError::SourceFetchFailed {
            origin: origin.to_string(),
            message,
        };

        match tokio::fs::remove_dir_all(dest).await {
            Ok(()) => debug!(dest = %dest.display(), "Removed previous checkout"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(fetch_failed(e.to_string())),
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| fetch_failed(e.to_string()))?;
        }

        info!(origin = %origin, dest = %dest.display(), "Fetching source");
        self.collaborators
            .fetcher
            .fetch(origin, dest)
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;

        match tokio::fs::remove_dir_all(dest.join(".git")).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(fetch_failed(format!("failed to remove .git: {}", e))),
        }
    }

    /// Drives one environment of a project to EXPOSED.
    ///
    /// Detection and strategy errors return without touching the record.
    /// Everything later is recorded as FAILED with the stage it happened in.
    pub async fn deploy(
        &self,
        project_id: &ProjectId,
        environment: Environment,
    ) -> Result<DeploymentRecord, DeployError> {
        let store = &self.collaborators.store;
        let _lock = store.try_lock(project_id, environment).await?;
        self.collaborators
            .progress
            .on_progress(&ProgressEvent::Started {
                project: project_id.clone(),
                environment,
            });

        let project = store
            .load_project(project_id)
            .await?
            .ok_or_else(|| DeployError::ProjectNotInitialized(project_id.to_string()))?;

        let detection = self.detector.detect(&project.root)?;
        let strategy = StrategySelector::select(detection.framework);

        let mut record = match store.load(project_id, environment).await? {
            Some(record) => record,
            None => DeploymentRecord::new(
                project_id.clone(),
                environment,
                detection.clone(),
                strategy.kind,
            ),
        };

        if record.strategy != strategy.kind {
            if !record.resources.is_empty() {
                return Err(DeployError::StrategyMismatch {
                    recorded: record.strategy.to_string(),
                    detected: strategy.kind.to_string(),
                });
            }
            record.strategy = strategy.kind;
        }

        if record.status.is_in_flight() {
            warn!(
                project = %project_id,
                env = %environment,
                stage = %record.status,
                "Previous run stopped mid-stage"
            );
            record.fail(&DeployError::Cancelled("interrupted run"));
            store.save(&record).await?;
        }
        record.detection = detection;

        let started = Instant::now();
        let app_root = project.root.join(&record.detection.app_root);
        match self.drive(&mut record, &strategy, &app_root).await {
            Ok(()) => {
                if let Some(url) = &record.public_url {
                    self.collaborators
                        .progress
                        .on_progress(&ProgressEvent::Exposed {
                            url: url.clone(),
                            total_time: started.elapsed(),
                        });
                }
                Ok(record)
            }
            Err(err) => {
                let stage = record.status;
                record.fail(&err);
                if let Err(save_err) = store.save(&record).await {
                    error!(error = %save_err, "Failed to persist failure state");
                }
                self.collaborators
                    .progress
                    .on_progress(&ProgressEvent::Failed {
                        stage,
                        error: err.to_string(),
                    });
                Err(err)
            }
        }
    }

    async fn drive(
        &self,
        record: &mut DeploymentRecord,
        strategy: &DeploymentStrategy,
        app_root: &Path,
    ) -> Result<(), DeployError> {
        if record.status == LifecycleStatus::Init {
            self.enter(record, LifecycleStatus::Detected).await?;
        }

        if let Some((path, failed_stage)) = self.reusable_artifacts(record, app_root) {
            self.collaborators
                .progress
                .on_progress(&ProgressEvent::ArtifactsReused { path, failed_stage });
        } else {
            self.enter(record, LifecycleStatus::Building).await?;
            self.build(&record.detection, strategy, app_root).await?;
        }

        self.enter(record, LifecycleStatus::Provisioning).await?;
        let provisioner = ResourceProvisioner::new(
            self.collaborators.gateway.clone(),
            self.collaborators.store.clone(),
            self.collaborators.progress.clone(),
            self.cancel.clone(),
            self.settings.provisioner.clone(),
        );
        provisioner
            .ensure_all(record, strategy, |kind, rec| self.resource_spec(kind, rec))
            .await?;

        self.enter(record, LifecycleStatus::Deploying).await?;
        let url = self.deploy_artifacts(record, strategy, app_root).await?;

        record.expose(url)?;
        self.collaborators.store.save(record).await?;
        self.collaborators
            .progress
            .on_progress(&ProgressEvent::StageEntered {
                stage: LifecycleStatus::Exposed,
            });
        Ok(())
    }

    async fn enter(
        &self,
        record: &mut DeploymentRecord,
        stage: LifecycleStatus,
    ) -> Result<(), DeployError> {
        record.transition(stage)?;
        self.collaborators.store.save(record).await?;
        self.collaborators
            .progress
            .on_progress(&ProgressEvent::StageEntered { stage });
        Ok(())
    }

    /// A run that failed after its build resumes at PROVISIONING as long as
    /// the artifacts are still on disk. Returns what would be shipped and the
    /// stage the run failed in. Source edits made since the failed run are not
    /// picked up.
    fn reusable_artifacts(
        &self,
        record: &DeploymentRecord,
        app_root: &Path,
    ) -> Option<(PathBuf, LifecycleStatus)> {
        if record.status != LifecycleStatus::Failed {
            return None;
        }
        let failed_stage = match record.failed_stage()? {
            stage @ (LifecycleStatus::Provisioning | LifecycleStatus::Deploying) => stage,
            _ => return None,
        };

        let fs = &self.collaborators.fs;
        let artifacts = match record.strategy {
            StrategyKind::StaticSite => self.artifact_dir(&record.detection, app_root)?,
            StrategyKind::ContainerizedHost => app_root.join(DESCRIPTOR_FILE),
        };
        let present = match record.strategy {
            StrategyKind::StaticSite => fs.is_dir(&artifacts),
            StrategyKind::ContainerizedHost => fs.is_file(&artifacts),
        };
        present.then_some((artifacts, failed_stage))
    }

    async fn build(
        &self,
        detection: &DetectionResult,
        strategy: &DeploymentStrategy,
        app_root: &Path,
    ) -> Result<(), DeployError> {
        if !strategy.requires_local_build() {
            let (path, generated) = descriptor::ensure_descriptor(app_root)
                .await
                .map_err(|e| DeployError::BuildFailed(format!("{:#}", e)))?;
            debug!(descriptor = %path.display(), generated, "Container descriptor ready");
            return Ok(());
        }

        for command in BuildCommand::canonical(detection.framework) {
            self.collaborators
                .progress
                .on_progress(&ProgressEvent::BuildCommandStarted {
                    command: command.to_string(),
                });
            self.bounded(
                "building",
                self.settings.build_timeout,
                self.collaborators.builder.run(app_root, &command),
                DeployError::BuildFailed,
            )
            .await?;
        }

        let artifacts = self.artifact_dir(detection, app_root).ok_or_else(|| {
            DeployError::BuildFailed(format!("{} has no artifact directory", detection.framework))
        })?;
        if !self.collaborators.fs.is_dir(&artifacts) {
            return Err(DeployError::BuildFailed(format!(
                "build finished but {} does not exist",
                artifacts.display()
            )));
        }
        Ok(())
    }

    /// Directory whose contents are uploaded for static sites. Angular 17+
    /// nests the site under `browser/`.
    fn artifact_dir(&self, detection: &DetectionResult, app_root: &Path) -> Option<PathBuf> {
        let dir = app_root.join(detection.output_dir.as_ref()?);
        if detection.framework == FrameworkVariant::Angular {
            let browser = dir.join("browser");
            if self.collaborators.fs.is_dir(&browser) {
                return Some(browser);
            }
        }
        Some(dir)
    }

    async fn deploy_artifacts(
        &self,
        record: &DeploymentRecord,
        strategy: &DeploymentStrategy,
        app_root: &Path,
    ) -> Result<String, DeployError> {
        let limit = self.settings.deploy_timeout;
        match strategy.kind {
            StrategyKind::StaticSite => {
                let bucket = record
                    .active_resource(ResourceKind::ObjectStoreBucket)
                    .ok_or_else(|| DeployError::DeployFailed("no active bucket".to_string()))?;
                let artifacts = self
                    .artifact_dir(&record.detection, app_root)
                    .ok_or_else(|| DeployError::DeployFailed("no artifact directory".to_string()))?;

                info!(bucket = %bucket.external_id, artifacts = %artifacts.display(), "Uploading artifacts");
                self.bounded(
                    "deploying",
                    limit,
                    self.collaborators
                        .gateway
                        .upload_artifacts(&bucket.external_id, &artifacts),
                    DeployError::DeployFailed,
                )
                .await?;

                Ok(website_url(&bucket.external_id, &bucket.region))
            }
            StrategyKind::ContainerizedHost => {
                let instance = record
                    .active_resource(ResourceKind::ComputeInstance)
                    .ok_or_else(|| DeployError::DeployFailed("no active host".to_string()))?;

                let address = self
                    .bounded(
                        "deploying",
                        limit,
                        self.collaborators
                            .gateway
                            .public_address(&instance.external_id),
                        DeployError::DeployFailed,
                    )
                    .await?;
                let host = RemoteHost {
                    address,
                    user: self.settings.ssh_user.clone(),
                    ssh_key: self.settings.ssh_key_path.clone(),
                };

                info!(host = %host.address, "Preparing container runtime");
                self.bounded(
                    "deploying",
                    limit,
                    self.collaborators.remote.ensure_runtime(&host),
                    DeployError::DeployFailed,
                )
                .await?;

                let descriptor = app_root.join(DESCRIPTOR_FILE);
                self.bounded(
                    "deploying",
                    limit,
                    self.collaborators
                        .remote
                        .deploy_container(&host, &descriptor, app_root),
                    DeployError::DeployFailed,
                )
                .await
            }
        }
    }

    /// Runs an external call under the stage deadline and the cancellation
    /// token, mapping its failure into the stage's error.
    async fn bounded<T, E, F>(
        &self,
        stage: &'static str,
        limit: Duration,
        fut: F,
        wrap: fn(String) -> DeployError,
    ) -> Result<T, DeployError>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DeployError::Cancelled(stage)),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(wrap(e.to_string())),
                Err(_) => Err(wrap(format!("timed out after {}s", limit.as_secs()))),
            },
        }
    }

    fn public_key_path(&self) -> Option<PathBuf> {
        self.settings
            .ssh_key_path
            .as_ref()
            .map(|key| PathBuf::from(format!("{}.pub", key.display())))
    }

    /// Deterministic creation parameters for one resource of this record.
    pub fn resource_spec(&self, kind: ResourceKind, record: &DeploymentRecord) -> ResourceSpec {
        let base = format!("deploy-tool-{}-{}", record.project_id, record.environment);
        let mut tags = BTreeMap::new();
        tags.insert(
            "deploy-tool:project".to_string(),
            record.project_id.to_string(),
        );
        tags.insert(
            "deploy-tool:environment".to_string(),
            record.environment.to_string(),
        );

        let mut depends_on = BTreeMap::new();
        let mut spec = ResourceSpec {
            region: self.settings.cloud.region.clone(),
            ..Default::default()
        };

        match kind {
            ResourceKind::ObjectStoreBucket => {
                spec.name = bucket_name(&self.settings.bucket_prefix, record.environment);
            }
            ResourceKind::BucketPolicy => {
                // the policy lives on the bucket and is addressed by it
                if let Some(bucket) = record.active_resource(ResourceKind::ObjectStoreBucket) {
                    spec.name = bucket.external_id.clone();
                    depends_on.insert(ResourceKind::ObjectStoreBucket, bucket.external_id.clone());
                }
            }
            ResourceKind::ComputeInstance => {
                spec.name = base;
                spec.instance_type = Some(self.settings.instance_type.clone());
                spec.image_id = self.settings.image_id.clone();
                // the key pair is registered after launch, so the host gets
                // the public key through its boot script
                spec.public_key_path = self.public_key_path();
            }
            ResourceKind::SecurityGroup => {
                spec.name = format!("{}-sg", base);
                spec.ingress_ports = vec![22, APP_PORT];
                if let Some(host) = record.active_resource(ResourceKind::ComputeInstance) {
                    depends_on.insert(ResourceKind::ComputeInstance, host.external_id.clone());
                }
            }
            ResourceKind::KeyPair => {
                spec.name = format!("{}-key", base);
                spec.public_key_path = self.public_key_path();
                if let Some(host) = record.active_resource(ResourceKind::ComputeInstance) {
                    depends_on.insert(ResourceKind::ComputeInstance, host.external_id.clone());
                }
            }
        }

        tags.insert("Name".to_string(), spec.name.clone());
        spec.tags = tags;
        spec.depends_on = depends_on;
        spec
    }
}

/// `<prefix>-<env>-<8 hex>`, lower-case, at most 63 characters.
pub fn bucket_name(prefix: &str, environment: Environment) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let tail = format!("-{}-{}", environment, &suffix[..8]);

    let mut prefix: String = prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    prefix.truncate(MAX_BUCKET_NAME - tail.len());
    let prefix = prefix.trim_matches('-');
    let prefix = if prefix.is_empty() { "site" } else { prefix };

    format!("{}{}", prefix, tail)
}

pub fn website_url(bucket: &str, region: &str) -> String {
    format!("http://{}.s3-website.{}.amazonaws.com", bucket, region)
}
