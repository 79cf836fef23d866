//! Teardown of everything a deployment record tracks.

use crate::collaborators::{CloudGateway, GatewayError};
use crate::error::DeployError;
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::provisioner::{gateway_call, CallOutcome};
use crate::state::{
    DeploymentRecord, DeploymentStore, Environment, ProjectId, ResourceHandle, ResourceStatus,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Drop orphaned handles from the record instead of keeping them for
    /// manual reconciliation.
    pub prune_orphaned: bool,
}

/// Outcome of a rollback that removed every tracked resource.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub project: ProjectId,
    pub environment: Environment,
    pub destroyed: Vec<ResourceHandle>,
    /// Orphaned handles dropped on request.
    pub pruned: Vec<ResourceHandle>,
}

pub struct RollbackManager {
    store: Arc<dyn DeploymentStore>,
    gateway: Arc<dyn CloudGateway>,
    progress: Arc<dyn ProgressHandler>,
    call_timeout: Duration,
    cancel: CancellationToken,
}

impl RollbackManager {
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        gateway: Arc<dyn CloudGateway>,
        progress: Arc<dyn ProgressHandler>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            progress,
            call_timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Destroys tracked resources newest first.
    ///
    /// Each destruction is attempted independently. A handle leaves the
    /// record only once its destruction is confirmed. When nothing survives
    /// the record is deleted; otherwise it is kept as FAILED holding exactly
    /// the survivors and `PartialRollback` lists them.
    pub async fn rollback(
        &self,
        project: &ProjectId,
        environment: Environment,
        options: &RollbackOptions,
    ) -> Result<RollbackReport, DeployError> {
        let _lock = self.store.try_lock(project, environment).await?;
        let mut record = self.store.load(project, environment).await?.ok_or_else(|| {
            DeployError::NoActiveDeployment {
                project: project.clone(),
                environment,
            }
        })?;

        info!(
            project = %project,
            env = %environment,
            resources = record.resources.len(),
            "Rolling back"
        );

        let mut report = RollbackReport {
            project: project.clone(),
            environment,
            destroyed: Vec::new(),
            pruned: Vec::new(),
        };

        if !record.resources.is_empty() {
            // a run that dies from here on must not leave the record EXPOSED
            record.fail(&DeployError::PartialRollback {
                surviving: record.resources.clone(),
            });
            self.store.save(&record).await?;
        }

        let newest_first: Vec<ResourceHandle> = record.resources.iter().rev().cloned().collect();
        for handle in newest_first {
            let step = if self.cancel.is_cancelled() {
                Err(DeployError::Cancelled("rollback"))
            } else {
                self.teardown(&mut record, handle, options, &mut report)
                    .await
            };
            if let Err(err) = step {
                if matches!(err, DeployError::Cancelled(_)) {
                    warn!(project = %project, env = %environment, resources = record.resources.len(), "Rollback cancelled");
                    record.fail(&err);
                    self.store.save(&record).await?;
                }
                return Err(err);
            }
        }

        let surviving = record.resources.clone();
        self.progress.on_progress(&ProgressEvent::RollbackComplete {
            destroyed: report.destroyed.len(),
            surviving: surviving.len(),
        });

        if surviving.is_empty() {
            self.store.delete(project, environment).await?;
            info!(project = %project, env = %environment, "Deployment record removed");
            return Ok(report);
        }

        let err = DeployError::PartialRollback { surviving };
        record.fail(&err);
        self.store.save(&record).await?;
        Err(err)
    }

    async fn teardown(
        &self,
        record: &mut DeploymentRecord,
        mut handle: ResourceHandle,
        options: &RollbackOptions,
        report: &mut RollbackReport,
    ) -> Result<(), DeployError> {
        match handle.status {
            ResourceStatus::Destroyed => {
                record.untrack(&handle.id);
                self.store.save(record).await?;
                return Ok(());
            }
            ResourceStatus::Orphaned => {
                if options.prune_orphaned {
                    self.prune(record, handle, report).await?;
                } else {
                    debug!(kind = %handle.kind, external_id = %handle.external_id, "Keeping orphaned handle");
                }
                return Ok(());
            }
            ResourceStatus::Provisioning => {
                // create may or may not have happened; resolve by name
                match self.call("lookup", self.gateway.lookup(handle.kind, &handle.name)).await {
                    CallOutcome::Done(Ok(Some(found))) => {
                        handle.external_id = found.clone();
                        if let Some(h) = record.resource_mut(&handle.id) {
                            h.external_id = found;
                        }
                    }
                    CallOutcome::Done(Ok(None)) => {
                        debug!(kind = %handle.kind, name = %handle.name, "Unconfirmed resource never materialised");
                        record.untrack(&handle.id);
                        self.store.save(record).await?;
                        return Ok(());
                    }
                    CallOutcome::Done(Err(err)) => {
                        warn!(kind = %handle.kind, name = %handle.name, error = %err, "Could not resolve unconfirmed resource");
                        return Ok(());
                    }
                    CallOutcome::Cancelled => return Err(DeployError::Cancelled("rollback")),
                }
            }
            ResourceStatus::Active | ResourceStatus::Destroying => {}
        }

        let previous = match handle.status {
            ResourceStatus::Destroying | ResourceStatus::Provisioning => ResourceStatus::Active,
            other => other,
        };
        record.set_resource_status(&handle.id, ResourceStatus::Destroying);
        self.store.save(record).await?;

        match self.call("destroy", self.gateway.destroy(handle.kind, &handle.external_id)).await {
            CallOutcome::Done(Ok(())) => {
                record.untrack(&handle.id);
                self.store.save(record).await?;
                self.progress.on_progress(&ProgressEvent::ResourceDestroyed {
                    kind: handle.kind,
                    external_id: handle.external_id.clone(),
                });
                handle.status = ResourceStatus::Destroyed;
                report.destroyed.push(handle);
            }
            CallOutcome::Done(Err(GatewayError::NotFound(message))) => {
                // gone outside the tool: drift
                warn!(kind = %handle.kind, external_id = %handle.external_id, reason = %message, "Resource not found");
                record.set_resource_status(&handle.id, ResourceStatus::Orphaned);
                self.progress.on_progress(&ProgressEvent::ResourceOrphaned {
                    kind: handle.kind,
                    external_id: handle.external_id.clone(),
                });
                if options.prune_orphaned {
                    handle.status = ResourceStatus::Orphaned;
                    self.prune(record, handle, report).await?;
                } else {
                    self.store.save(record).await?;
                }
            }
            CallOutcome::Done(Err(err)) => {
                warn!(kind = %handle.kind, external_id = %handle.external_id, error = %err, "Destroy failed");
                record.set_resource_status(&handle.id, previous);
                self.store.save(record).await?;
            }
            CallOutcome::Cancelled => {
                // outcome unknown; left as destroying so the next run retries
                return Err(DeployError::Cancelled("rollback"));
            }
        }
        Ok(())
    }

    async fn prune(
        &self,
        record: &mut DeploymentRecord,
        handle: ResourceHandle,
        report: &mut RollbackReport,
    ) -> Result<(), DeployError> {
        info!(kind = %handle.kind, external_id = %handle.external_id, "Pruning orphaned handle");
        record.untrack(&handle.id);
        self.store.save(record).await?;
        report.pruned.push(handle);
        Ok(())
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> CallOutcome<T>
    where
        F: std::future::Future<Output = Result<T, GatewayError>>,
    {
        gateway_call(&self.cancel, self.call_timeout, what, fut).await
    }
}
