//! In-memory collaborators shared by the integration tests.
//!
//! The fakes keep just enough state to behave like the real systems: the
//! gateway remembers which resources are live and can be told to fail or to
//! lose a reply, the build runner produces an artifact directory, and the
//! fetcher writes a small React project into the checkout.

#![allow(dead_code)]

use async_trait::async_trait;
use deploy_tool::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use deploy_tool::{
    BuildCommand, BuildRunner, CloudContext, CloudGateway, Collaborators,
    DeploymentOrchestrator, ExecutionError, GatewayError, MemoryStore, OrchestratorSettings,
    RemoteExecutor, RemoteHost, ResourceKind, ResourceSpec, RollbackManager, SourceFetcher,
};
use deploy_tool::fs::RealFileSystem;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const PUBLIC_ADDRESS: &str = "203.0.113.10";

#[derive(Default)]
struct GatewayState {
    /// (kind, external id) -> deterministic name
    live: BTreeMap<(ResourceKind, String), String>,
    creates: Vec<ResourceKind>,
    destroys: Vec<(ResourceKind, String)>,
    uploads: Vec<(String, PathBuf)>,
    create_failures: HashMap<ResourceKind, GatewayError>,
    destroy_failures: HashMap<ResourceKind, GatewayError>,
    lost_replies: HashSet<ResourceKind>,
    /// Created but never set up, as when a create is cut off midway.
    unconfigured: HashSet<(ResourceKind, String)>,
    configures: Vec<(ResourceKind, String)>,
    configure_failures: HashMap<ResourceKind, GatewayError>,
    upload_failure: Option<GatewayError>,
    next_id: u32,
}

/// Cloud gateway backed by a map of live resources.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<GatewayState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, kind: ResourceKind, err: GatewayError) {
        self.state.lock().unwrap().create_failures.insert(kind, err);
    }

    pub fn fail_destroy(&self, kind: ResourceKind, err: GatewayError) {
        self.state.lock().unwrap().destroy_failures.insert(kind, err);
    }

    pub fn fail_upload(&self, err: GatewayError) {
        self.state.lock().unwrap().upload_failure = Some(err);
    }

    pub fn fail_configure(&self, kind: ResourceKind, err: GatewayError) {
        self.state.lock().unwrap().configure_failures.insert(kind, err);
    }

    /// Creates of `kind` are cut off after the resource exists but before
    /// its setup ran; the caller sees a timeout.
    pub fn lose_reply(&self, kind: ResourceKind) {
        self.state.lock().unwrap().lost_replies.insert(kind);
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.create_failures.clear();
        state.destroy_failures.clear();
        state.lost_replies.clear();
        state.configure_failures.clear();
        state.upload_failure = None;
    }

    /// Deletes every live resource of `kind` behind the tool's back.
    pub fn remove_out_of_band(&self, kind: ResourceKind) {
        self.state
            .lock()
            .unwrap()
            .live
            .retain(|(k, _), _| *k != kind);
    }

    pub fn live_kinds(&self) -> Vec<ResourceKind> {
        let mut kinds: Vec<ResourceKind> = self
            .state
            .lock()
            .unwrap()
            .live
            .keys()
            .map(|(kind, _)| *kind)
            .collect();
        kinds.sort();
        kinds
    }

    pub fn is_live(&self, external_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .live
            .keys()
            .any(|(_, id)| id == external_id)
    }

    pub fn is_configured(&self, kind: ResourceKind, external_id: &str) -> bool {
        let state = self.state.lock().unwrap();
        let key = (kind, external_id.to_string());
        state.live.contains_key(&key) && !state.unconfigured.contains(&key)
    }

    pub fn configures(&self) -> Vec<(ResourceKind, String)> {
        self.state.lock().unwrap().configures.clone()
    }

    pub fn creates(&self) -> Vec<ResourceKind> {
        self.state.lock().unwrap().creates.clone()
    }

    pub fn destroys(&self) -> Vec<(ResourceKind, String)> {
        self.state.lock().unwrap().destroys.clone()
    }

    pub fn uploads(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().unwrap().uploads.clone()
    }

    fn external_id(state: &mut GatewayState, kind: ResourceKind, spec: &ResourceSpec) -> String {
        state.next_id += 1;
        match kind {
            // buckets and their policies are addressed by bucket name
            ResourceKind::ObjectStoreBucket | ResourceKind::BucketPolicy => spec.name.clone(),
            ResourceKind::ComputeInstance => format!("i-{:08x}", state.next_id),
            ResourceKind::SecurityGroup => format!("sg-{:08x}", state.next_id),
            ResourceKind::KeyPair => format!("key-{:08x}", state.next_id),
        }
    }
}

#[async_trait]
impl CloudGateway for FakeGateway {
    async fn create(&self, kind: ResourceKind, spec: &ResourceSpec) -> Result<String, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.creates.push(kind);
        if let Some(err) = state.create_failures.get(&kind) {
            return Err(err.clone());
        }

        let id = Self::external_id(&mut state, kind, spec);
        state.live.insert((kind, id.clone()), spec.name.clone());
        if state.lost_replies.contains(&kind) {
            state.unconfigured.insert((kind, id.clone()));
            return Err(GatewayError::Timeout("RequestTimeout".to_string()));
        }
        Ok(id)
    }

    async fn destroy(&self, kind: ResourceKind, external_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.destroy_failures.get(&kind) {
            return Err(err.clone());
        }
        match state.live.remove(&(kind, external_id.to_string())) {
            Some(_) => {
                state.destroys.push((kind, external_id.to_string()));
                Ok(())
            }
            None => Err(GatewayError::NotFound(format!("{} {}", kind, external_id))),
        }
    }

    async fn configure(
        &self,
        kind: ResourceKind,
        external_id: &str,
        _spec: &ResourceSpec,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        let key = (kind, external_id.to_string());
        state.configures.push(key.clone());
        if let Some(err) = state.configure_failures.get(&kind) {
            return Err(err.clone());
        }
        if !state.live.contains_key(&key) {
            return Err(GatewayError::NotFound(format!("{} {}", kind, external_id)));
        }
        state.unconfigured.remove(&key);
        Ok(())
    }

    async fn lookup(&self, kind: ResourceKind, name: &str) -> Result<Option<String>, GatewayError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .live
            .iter()
            .find(|((k, _), n)| *k == kind && n.as_str() == name)
            .map(|((_, id), _)| id.clone()))
    }

    async fn upload_artifacts(&self, bucket: &str, artifacts: &Path) -> Result<(), GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(err) = &state.upload_failure {
            return Err(err.clone());
        }
        if state
            .unconfigured
            .contains(&(ResourceKind::ObjectStoreBucket, bucket.to_string()))
        {
            return Err(GatewayError::PermissionDenied(format!(
                "AccessDenied: public access to {} is blocked",
                bucket
            )));
        }
        state.uploads.push((bucket.to_string(), artifacts.to_path_buf()));
        Ok(())
    }

    async fn public_address(&self, instance_id: &str) -> Result<String, GatewayError> {
        if self.is_live(instance_id) {
            Ok(PUBLIC_ADDRESS.to_string())
        } else {
            Err(GatewayError::NotFound(instance_id.to_string()))
        }
    }
}

/// Build runner that records commands and emits an artifact directory on
/// `npm run build`.
pub struct FakeBuildRunner {
    output_dir: String,
    commands: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeBuildRunner {
    pub fn new(output_dir: &str) -> Self {
        Self {
            output_dir: output_dir.to_string(),
            commands: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
            gate: Mutex::new(None),
        }
    }

    pub fn fail_with(&self, stderr: &str) {
        *self.failure.lock().unwrap() = Some(stderr.to_string());
    }

    pub fn succeed(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Makes the next build command wait. Returns `(entered, release)`:
    /// `entered` fires once the command is running, notifying `release`
    /// lets it finish.
    pub fn hold(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildRunner for FakeBuildRunner {
    async fn run(&self, app_root: &Path, command: &BuildCommand) -> Result<(), ExecutionError> {
        let rendered = command.to_string();
        self.commands.lock().unwrap().push(rendered.clone());

        let gate = self.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        if let Some(stderr) = self.failure.lock().unwrap().clone() {
            return Err(ExecutionError::NonZeroExit {
                command: rendered,
                code: Some(1),
                stderr,
            });
        }

        if rendered == "npm run build" {
            let out = app_root.join(&self.output_dir);
            fs::create_dir_all(&out).unwrap();
            fs::write(out.join("index.html"), "<!doctype html><title>app</title>").unwrap();
        }
        Ok(())
    }
}

/// Remote executor that serves every container on the app port.
#[derive(Default)]
pub struct FakeRemoteExecutor {
    deployments: Mutex<Vec<(String, PathBuf)>>,
}

impl FakeRemoteExecutor {
    pub fn deployments(&self) -> Vec<(String, PathBuf)> {
        self.deployments.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for FakeRemoteExecutor {
    async fn ensure_runtime(&self, _host: &RemoteHost) -> Result<(), ExecutionError> {
        Ok(())
    }

    async fn deploy_container(
        &self,
        host: &RemoteHost,
        descriptor: &Path,
        _build_context: &Path,
    ) -> Result<String, ExecutionError> {
        self.deployments
            .lock()
            .unwrap()
            .push((host.address.clone(), descriptor.to_path_buf()));
        Ok(format!("http://{}:3000", host.address))
    }
}

/// Fetcher that materializes a React checkout, `.git` included.
#[derive(Default)]
pub struct FakeFetcher {
    origins: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn origins(&self) -> Vec<String> {
        self.origins.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(&self, origin: &str, dest: &Path) -> Result<(), ExecutionError> {
        self.origins.lock().unwrap().push(origin.to_string());
        fs::create_dir_all(dest.join(".git")).map_err(|e| ExecutionError::Other(e.to_string()))?;
        fs::write(dest.join(".git").join("HEAD"), "ref: refs/heads/main\n")
            .map_err(|e| ExecutionError::Other(e.to_string()))?;
        fs::write(dest.join("package.json"), REACT_MANIFEST)
            .map_err(|e| ExecutionError::Other(e.to_string()))?;
        Ok(())
    }
}

/// Progress handler that keeps every event.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<ProgressEvent>>,
}

impl EventLog {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressHandler for EventLog {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub const REACT_MANIFEST: &str = r#"{
  "name": "shop",
  "scripts": { "build": "react-scripts build" },
  "dependencies": { "react": "^18.2.0", "react-dom": "^18.2.0", "react-scripts": "5.0.1" }
}"#;

pub const VITE_MANIFEST: &str = r#"{
  "name": "dashboard",
  "scripts": { "build": "vite build" },
  "dependencies": { "react": "^18.2.0", "react-dom": "^18.2.0" },
  "devDependencies": { "vite": "^5.0.0", "@vitejs/plugin-react": "^4.2.0" }
}"#;

pub const NEXT_MANIFEST: &str = r#"{
  "name": "storefront",
  "scripts": { "build": "next build", "start": "next start" },
  "dependencies": { "next": "14.1.0", "react": "^18.2.0", "react-dom": "^18.2.0" }
}"#;

pub const ANGULAR_MANIFEST: &str = r#"{
  "name": "admin",
  "scripts": { "build": "ng build" },
  "dependencies": { "@angular/core": "^17.0.0" }
}"#;

pub fn write_file(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// One temp directory holding the project sources and the state of the
/// collaborators, wired into an orchestrator on demand.
pub struct Harness {
    pub dir: TempDir,
    pub store: MemoryStore,
    pub gateway: Arc<FakeGateway>,
    pub builder: Arc<FakeBuildRunner>,
    pub remote: Arc<FakeRemoteExecutor>,
    pub fetcher: Arc<FakeFetcher>,
    pub events: Arc<EventLog>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_output_dir("build")
    }

    /// `output_dir` is where the fake build drops artifacts.
    pub fn with_output_dir(output_dir: &str) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            store: MemoryStore::new(),
            gateway: Arc::new(FakeGateway::new()),
            builder: Arc::new(FakeBuildRunner::new(output_dir)),
            remote: Arc::new(FakeRemoteExecutor::default()),
            fetcher: Arc::new(FakeFetcher::default()),
            events: Arc::new(EventLog::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn project_root(&self) -> PathBuf {
        self.dir.path().join("app")
    }

    pub fn write(&self, relative: &str, content: &str) {
        write_file(&self.project_root(), relative, content);
    }

    pub fn react_project(&self) -> String {
        self.write("package.json", REACT_MANIFEST);
        self.write("src/index.js", "import React from 'react';\n");
        self.source()
    }

    pub fn nextjs_project(&self) -> String {
        self.write("package.json", NEXT_MANIFEST);
        self.write("next.config.js", "module.exports = {};\n");
        self.write("pages/index.js", "export default function Home() { return null; }\n");
        self.source()
    }

    pub fn source(&self) -> String {
        self.project_root().to_string_lossy().into_owned()
    }

    pub fn settings(&self) -> OrchestratorSettings {
        let mut settings = OrchestratorSettings::new(
            CloudContext::new("ap-south-1"),
            self.dir.path().join("state").join("projects"),
        );
        settings.image_id = Some("ami-0f58b397bc5c1f2e8".to_string());
        settings.ssh_key_path = Some(self.dir.path().join("id_ed25519"));
        settings.build_timeout = Duration::from_secs(30);
        settings.deploy_timeout = Duration::from_secs(30);
        settings.provisioner.call_timeout = Duration::from_secs(5);
        settings
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: Arc::new(self.store.clone()),
            gateway: self.gateway.clone(),
            builder: self.builder.clone(),
            remote: self.remote.clone(),
            fetcher: self.fetcher.clone(),
            fs: Arc::new(RealFileSystem::new()),
            progress: self.events.clone(),
        }
    }

    pub fn orchestrator(&self) -> DeploymentOrchestrator {
        DeploymentOrchestrator::new(self.collaborators(), self.settings())
            .with_cancellation(self.cancel.clone())
    }

    pub fn rollback_manager(&self) -> RollbackManager {
        RollbackManager::new(
            Arc::new(self.store.clone()),
            self.gateway.clone(),
            Arc::new(NoOpHandler),
            Duration::from_secs(5),
        )
    }
}
