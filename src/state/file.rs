//! File-backed deployment store.
//!
//! Layout under the state directory:
//!
//! ```text
//! current                                   id of the last initialised project
//! projects/<id>/project.json                ProjectRecord
//! projects/<id>/deployments/<env>.json      DeploymentRecord
//! projects/<id>/locks/<env>.lock            advisory lock (flock)
//! projects/<id>/source/                     fetched repository, if remote
//! ```
//!
//! Records are written to a temporary sibling, fsynced and renamed over the
//! target, so a crash leaves either the old or the new file in place. Locks
//! are OS advisory locks, released by the kernel when the holder exits.

use super::store::{DeploymentLock, DeploymentStore, LockGuard};
use super::{DeploymentRecord, Environment, ProjectId, ProjectRecord};
use crate::error::DeployError;
use async_trait::async_trait;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub struct FileDeploymentStore {
    root: PathBuf,
}

struct FileLockGuard {
    file: std::fs::File,
    path: PathBuf,
}

impl LockGuard for FileLockGuard {}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

impl FileDeploymentStore {
    /// Opens the store at `~/.deploy-tool`.
    pub async fn new_default() -> Result<Self, DeployError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DeployError::storage("could not determine home directory"))?;
        Self::new(home.join(".deploy-tool")).await
    }

    pub async fn new(root: PathBuf) -> Result<Self, DeployError> {
        tokio::fs::create_dir_all(root.join("projects"))
            .await
            .map_err(|e| DeployError::Storage(format!("failed to create state dir: {}", e)))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project: &ProjectId) -> PathBuf {
        self.root.join("projects").join(project.as_str())
    }

    /// Where a remote repository is checked out for this project.
    pub fn source_dir(&self, project: &ProjectId) -> PathBuf {
        self.project_dir(project).join("source")
    }

    fn record_path(&self, project: &ProjectId, environment: Environment) -> PathBuf {
        self.project_dir(project)
            .join("deployments")
            .join(format!("{}.json", environment))
    }

    fn lock_path(&self, project: &ProjectId, environment: Environment) -> PathBuf {
        self.project_dir(project)
            .join("locks")
            .join(format!("{}.lock", environment))
    }

    fn current_path(&self) -> PathBuf {
        self.root.join("current")
    }

    pub async fn set_current_project(&self, project: &ProjectId) -> Result<(), DeployError> {
        write_atomic(&self.current_path(), project.as_str().as_bytes()).await
    }

    pub async fn current_project(&self) -> Result<Option<ProjectId>, DeployError> {
        match tokio::fs::read_to_string(self.current_path()).await {
            Ok(content) if !content.trim().is_empty() => {
                Ok(Some(ProjectId::new(content.trim())))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DeployError::Storage(format!(
                "failed to read current project: {}",
                e
            ))),
        }
    }
}

#[async_trait]
impl DeploymentStore for FileDeploymentStore {
    async fn load(
        &self,
        project: &ProjectId,
        environment: Environment,
    ) -> Result<Option<DeploymentRecord>, DeployError> {
        read_json(&self.record_path(project, environment)).await
    }

    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let path = self.record_path(&record.project_id, record.environment);
        let content = serde_json::to_vec_pretty(record)
            .map_err(|e| DeployError::Storage(format!("failed to serialize record: {}", e)))?;
        write_atomic(&path, &content).await?;
        debug!(
            project = %record.project_id,
            env = %record.environment,
            status = %record.status,
            resources = record.resources.len(),
            "Saved deployment record"
        );
        Ok(())
    }

    async fn delete(
        &self,
        project: &ProjectId,
        environment: Environment,
    ) -> Result<(), DeployError> {
        let path = self.record_path(project, environment);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DeployError::Storage(format!(
                "failed to delete {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn list(&self, project: &ProjectId) -> Result<Vec<DeploymentRecord>, DeployError> {
        let mut records = Vec::new();
        for env in Environment::all() {
            if let Some(record) = self.load(project, *env).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn load_project(
        &self,
        project: &ProjectId,
    ) -> Result<Option<ProjectRecord>, DeployError> {
        read_json(&self.project_dir(project).join("project.json")).await
    }

    async fn save_project(&self, project: &ProjectRecord) -> Result<(), DeployError> {
        let content = serde_json::to_vec_pretty(project)
            .map_err(|e| DeployError::Storage(format!("failed to serialize project: {}", e)))?;
        write_atomic(&self.project_dir(&project.id).join("project.json"), &content).await
    }

    async fn try_lock(
        &self,
        project: &ProjectId,
        environment: Environment,
    ) -> Result<DeploymentLock, DeployError> {
        let path = self.lock_path(project, environment);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DeployError::Storage(format!("failed to create lock dir: {}", e)))?;
        }

        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                DeployError::Storage(format!("failed to open lock {}: {}", path.display(), e))
            })?;

        if file.try_lock_exclusive().is_err() {
            return Err(DeployError::DeploymentInProgress {
                project: project.clone(),
                environment,
            });
        }

        // Holder info is for operators only; the kernel lock is authoritative.
        let holder = format!(
            "pid={} acquired_at={}\n",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        let _ = file.set_len(0).and_then(|_| file.write_all(holder.as_bytes()));

        debug!(project = %project, env = %environment, "Acquired deployment lock");
        Ok(DeploymentLock::new(
            project.clone(),
            environment,
            Box::new(FileLockGuard { file, path }),
        ))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, DeployError> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(DeployError::Storage(format!(
                "failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| DeployError::Storage(format!("failed to parse {}: {}", path.display(), e)))
}

async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), DeployError> {
    let parent = path
        .parent()
        .ok_or_else(|| DeployError::Storage(format!("invalid path {}", path.display())))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| DeployError::Storage(format!("failed to create {}: {}", parent.display(), e)))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(DeployError::Storage(format!(
            "failed to write {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}
