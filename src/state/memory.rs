//! In-process store used by tests and dry runs.

use super::store::{DeploymentLock, DeploymentStore, LockGuard};
use super::{DeploymentRecord, Environment, ProjectId, ProjectRecord};
use crate::error::DeployError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

type Key = (ProjectId, Environment);

#[derive(Default, Clone)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<Key, DeploymentRecord>>>,
    projects: Arc<Mutex<HashMap<ProjectId, ProjectRecord>>>,
    locks: Arc<Mutex<HashSet<Key>>>,
    saves: Arc<Mutex<Vec<DeploymentRecord>>>,
}

struct MemoryLockGuard {
    key: Key,
    locks: Arc<Mutex<HashSet<Key>>>,
}

impl LockGuard for MemoryLockGuard {}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&self.key);
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record passed to `save`, in order. Lets tests assert on what a
    /// crash at any point would have left behind.
    pub fn history(&self) -> Vec<DeploymentRecord> {
        self.saves.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn poisoned() -> DeployError {
        DeployError::storage("memory store lock poisoned")
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn load(
        &self,
        project: &ProjectId,
        environment: Environment,
    ) -> Result<Option<DeploymentRecord>, DeployError> {
        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        Ok(records.get(&(project.clone(), environment)).cloned())
    }

    async fn save(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        records.insert(
            (record.project_id.clone(), record.environment),
            record.clone(),
        );
        self.saves
            .lock()
            .map_err(|_| Self::poisoned())?
            .push(record.clone());
        Ok(())
    }

    async fn delete(
        &self,
        project: &ProjectId,
        environment: Environment,
    ) -> Result<(), DeployError> {
        let mut records = self.records.lock().map_err(|_| Self::poisoned())?;
        records.remove(&(project.clone(), environment));
        Ok(())
    }

    async fn list(&self, project: &ProjectId) -> Result<Vec<DeploymentRecord>, DeployError> {
        let records = self.records.lock().map_err(|_| Self::poisoned())?;
        Ok(records
            .iter()
            .filter(|((p, _), _)| p == project)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn load_project(
        &self,
        project: &ProjectId,
    ) -> Result<Option<ProjectRecord>, DeployError> {
        let projects = self.projects.lock().map_err(|_| Self::poisoned())?;
        Ok(projects.get(project).cloned())
    }

    async fn save_project(&self, project: &ProjectRecord) -> Result<(), DeployError> {
        let mut projects = self.projects.lock().map_err(|_| Self::poisoned())?;
        projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn try_lock(
        &self,
        project: &ProjectId,
        environment: Environment,
    ) -> Result<DeploymentLock, DeployError> {
        let key = (project.clone(), environment);
        let mut locks = self.locks.lock().map_err(|_| Self::poisoned())?;
        if !locks.insert(key.clone()) {
            return Err(DeployError::DeploymentInProgress {
                project: project.clone(),
                environment,
            });
        }
        Ok(DeploymentLock::new(
            project.clone(),
            environment,
            Box::new(MemoryLockGuard {
                key,
                locks: self.locks.clone(),
            }),
        ))
    }
}
