//! Idempotent resource provisioning.
//!
//! Every create is preceded by an intent entry (`provisioning`, deterministic
//! name) persisted to the store, so a crash or cancellation mid-call never
//! loses track of a resource that may exist. The intent becomes `active` once
//! the gateway confirms it, and is dropped only when the gateway definitely
//! refused or a lookup proved nothing was created.

use crate::collaborators::{CloudGateway, GatewayError, ResourceSpec};
use crate::error::{DeployError, ProvisioningFailure};
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::state::{DeploymentRecord, DeploymentStore, ResourceHandle, ResourceKind, ResourceStatus};
use crate::strategy::DeploymentStrategy;
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    /// Upper bound for every gateway call.
    pub call_timeout: Duration,
    /// Re-attempts after a timed-out create that provably did not happen.
    pub create_retries: u32,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(120),
            create_retries: 1,
        }
    }
}

pub(crate) enum CallOutcome<T> {
    Done(Result<T, GatewayError>),
    Cancelled,
}

/// Runs a gateway call under a deadline, giving up early on cancellation.
/// A deadline miss is reported as `GatewayError::Timeout`.
pub(crate) async fn gateway_call<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    what: &str,
    fut: F,
) -> CallOutcome<T>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => CallOutcome::Cancelled,
        result = tokio::time::timeout(limit, fut) => match result {
            Ok(result) => CallOutcome::Done(result),
            Err(_) => CallOutcome::Done(Err(GatewayError::Timeout(format!(
                "{} did not complete within {}s",
                what,
                limit.as_secs()
            )))),
        },
    }
}

pub struct ResourceProvisioner {
    gateway: Arc<dyn CloudGateway>,
    store: Arc<dyn DeploymentStore>,
    progress: Arc<dyn ProgressHandler>,
    cancel: CancellationToken,
    settings: ProvisionerSettings,
}

impl ResourceProvisioner {
    pub fn new(
        gateway: Arc<dyn CloudGateway>,
        store: Arc<dyn DeploymentStore>,
        progress: Arc<dyn ProgressHandler>,
        cancel: CancellationToken,
        settings: ProvisionerSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            progress,
            cancel,
            settings,
        }
    }

    /// Ensures one resource of `kind` exists and is tracked by `record`.
    ///
    /// An `active` handle of that kind is returned unchanged without calling
    /// the gateway.
    pub async fn ensure(
        &self,
        record: &mut DeploymentRecord,
        kind: ResourceKind,
        spec: ResourceSpec,
    ) -> Result<ResourceHandle, DeployError> {
        self.ensure_wave(record, vec![(kind, spec)])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DeployError::ProvisioningFailed {
                kind,
                failure: ProvisioningFailure::Unknown,
                message: "resource missing after provisioning".to_string(),
            })
    }

    /// Provisions every resource the strategy requires, wave by wave.
    /// `spec_for` sees the record as left by the previous waves, so specs can
    /// reference the external ids of their dependencies.
    pub async fn ensure_all<F>(
        &self,
        record: &mut DeploymentRecord,
        strategy: &DeploymentStrategy,
        spec_for: F,
    ) -> Result<(), DeployError>
    where
        F: Fn(ResourceKind, &DeploymentRecord) -> ResourceSpec,
    {
        for wave in &strategy.waves {
            let requests = wave
                .iter()
                .map(|kind| (*kind, spec_for(*kind, record)))
                .collect();
            self.ensure_wave(record, requests).await?;
        }
        Ok(())
    }

    /// Ensures a set of mutually independent resources. Missing ones are
    /// created concurrently; all calls settle and are recorded before the
    /// first failure, if any, is returned.
    pub async fn ensure_wave(
        &self,
        record: &mut DeploymentRecord,
        requests: Vec<(ResourceKind, ResourceSpec)>,
    ) -> Result<Vec<ResourceHandle>, DeployError> {
        let kinds: Vec<ResourceKind> = requests.iter().map(|(k, _)| *k).collect();

        let mut pending = Vec::new();
        for (kind, spec) in requests {
            if !self.resolve_existing(record, kind, &spec).await? {
                pending.push((kind, spec));
            }
        }

        let mut attempt = 0;
        while !pending.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(DeployError::Cancelled("provisioning"));
            }

            let mut intents = Vec::with_capacity(pending.len());
            for (kind, spec) in &pending {
                let handle = ResourceHandle::intent(*kind, spec.name.clone(), spec.region.clone());
                intents.push(handle.id.clone());
                record.track(handle);
                self.progress.on_progress(&ProgressEvent::ResourceRequested {
                    kind: *kind,
                    name: spec.name.clone(),
                });
            }
            self.store.save(record).await?;

            let outcomes = join_all(
                pending
                    .iter()
                    .map(|(kind, spec)| self.call("create", self.gateway.create(*kind, spec))),
            )
            .await;

            let mut retry = Vec::new();
            let mut failure: Option<DeployError> = None;
            for (((kind, spec), intent), outcome) in pending.into_iter().zip(intents).zip(outcomes)
            {
                match outcome {
                    CallOutcome::Done(Ok(external_id)) => {
                        self.confirm(record, &intent, kind, external_id, ResourceStatus::Active);
                    }
                    CallOutcome::Cancelled => {
                        // intent stays tracked so rollback can reclaim it
                        failure.get_or_insert(DeployError::Cancelled("provisioning"));
                    }
                    CallOutcome::Done(Err(err)) if err.is_indeterminate() => {
                        match self.call("lookup", self.gateway.lookup(kind, &spec.name)).await {
                            CallOutcome::Done(Ok(Some(found))) => {
                                self.confirm(record, &intent, kind, found.clone(), ResourceStatus::Orphaned);
                                failure.get_or_insert(DeployError::ProvisioningFailed {
                                    kind,
                                    failure: ProvisioningFailure::Timeout,
                                    message: format!(
                                        "create timed out but {} exists; recorded as orphaned",
                                        found
                                    ),
                                });
                            }
                            CallOutcome::Done(Ok(None)) => {
                                record.untrack(&intent);
                                if attempt < self.settings.create_retries {
                                    debug!(kind = %kind, attempt, "Create timed out and nothing exists, retrying");
                                    retry.push((kind, spec));
                                } else {
                                    failure.get_or_insert(provisioning_failed(kind, &err));
                                }
                            }
                            CallOutcome::Done(Err(lookup_err)) => {
                                warn!(kind = %kind, name = %spec.name, error = %lookup_err, "Could not verify timed-out create");
                                failure.get_or_insert(DeployError::ProvisioningFailed {
                                    kind,
                                    failure: ProvisioningFailure::Timeout,
                                    message: format!(
                                        "{}; existence check failed: {}",
                                        err, lookup_err
                                    ),
                                });
                            }
                            CallOutcome::Cancelled => {
                                failure.get_or_insert(DeployError::Cancelled("provisioning"));
                            }
                        }
                    }
                    CallOutcome::Done(Err(err)) => {
                        record.untrack(&intent);
                        failure.get_or_insert(provisioning_failed(kind, &err));
                    }
                }
            }
            self.store.save(record).await?;

            if let Some(err) = failure {
                return Err(err);
            }
            pending = retry;
            attempt += 1;
        }

        Ok(kinds
            .iter()
            .filter_map(|kind| record.active_resource(*kind).cloned())
            .collect())
    }

    /// Returns true when `record` already holds a live resource of `kind`.
    /// Unconfirmed handles are verified by name: configured and adopted when
    /// they exist, dropped when they do not.
    async fn resolve_existing(
        &self,
        record: &mut DeploymentRecord,
        kind: ResourceKind,
        spec: &ResourceSpec,
    ) -> Result<bool, DeployError> {
        let Some(handle) = record.resource(kind).cloned() else {
            return Ok(false);
        };

        match handle.status {
            ResourceStatus::Active => {
                self.progress.on_progress(&ProgressEvent::ResourceReused {
                    kind,
                    external_id: handle.external_id,
                });
                Ok(true)
            }
            ResourceStatus::Destroyed => {
                record.untrack(&handle.id);
                self.store.save(record).await?;
                Ok(false)
            }
            ResourceStatus::Provisioning | ResourceStatus::Orphaned | ResourceStatus::Destroying => {
                match self.call("lookup", self.gateway.lookup(kind, &handle.name)).await {
                    CallOutcome::Done(Ok(Some(found))) => {
                        self.adopt(record, &handle, found, spec).await
                    }
                    CallOutcome::Done(Ok(None)) => {
                        debug!(kind = %kind, name = %handle.name, "Unconfirmed resource does not exist");
                        record.untrack(&handle.id);
                        self.store.save(record).await?;
                        Ok(false)
                    }
                    CallOutcome::Done(Err(err)) => Err(DeployError::ProvisioningFailed {
                        kind,
                        failure: ProvisioningFailure::from(&err),
                        message: format!("could not verify {}: {}", handle.name, err),
                    }),
                    CallOutcome::Cancelled => Err(DeployError::Cancelled("provisioning")),
                }
            }
        }
    }

    /// Re-runs the follow-up setup on a found resource before trusting it.
    /// A resource that cannot be configured stays unconfirmed, with its real
    /// id recorded so rollback can still reclaim it.
    async fn adopt(
        &self,
        record: &mut DeploymentRecord,
        handle: &ResourceHandle,
        found: String,
        spec: &ResourceSpec,
    ) -> Result<bool, DeployError> {
        let kind = handle.kind;
        let target = ResourceSpec {
            name: handle.name.clone(),
            ..spec.clone()
        };
        debug!(kind = %kind, external_id = %found, "Configuring unconfirmed resource");

        match self
            .call("configure", self.gateway.configure(kind, &found, &target))
            .await
        {
            CallOutcome::Done(Ok(())) => {
                debug!(kind = %kind, external_id = %found, "Adopting unconfirmed resource");
                self.confirm(record, &handle.id, kind, found, ResourceStatus::Active);
                self.store.save(record).await?;
                Ok(true)
            }
            CallOutcome::Done(Err(err)) => {
                warn!(kind = %kind, external_id = %found, error = %err, "Could not configure unconfirmed resource");
                if let Some(h) = record.resource_mut(&handle.id) {
                    h.external_id = found;
                }
                self.store.save(record).await?;
                Err(DeployError::ProvisioningFailed {
                    kind,
                    failure: ProvisioningFailure::from(&err),
                    message: format!("could not configure {}: {}", handle.name, err),
                })
            }
            CallOutcome::Cancelled => Err(DeployError::Cancelled("provisioning")),
        }
    }

    fn confirm(
        &self,
        record: &mut DeploymentRecord,
        id: &str,
        kind: ResourceKind,
        external_id: String,
        status: ResourceStatus,
    ) {
        if let Some(handle) = record.resource_mut(id) {
            handle.external_id = external_id.clone();
        }
        record.set_resource_status(id, status);

        let event = if status == ResourceStatus::Orphaned {
            ProgressEvent::ResourceOrphaned { kind, external_id }
        } else {
            ProgressEvent::ResourceRecorded { kind, external_id }
        };
        self.progress.on_progress(&event);
    }

    async fn call<T, F>(&self, what: &str, fut: F) -> CallOutcome<T>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        gateway_call(&self.cancel, self.settings.call_timeout, what, fut).await
    }
}

fn provisioning_failed(kind: ResourceKind, err: &GatewayError) -> DeployError {
    DeployError::ProvisioningFailed {
        kind,
        failure: ProvisioningFailure::from(err),
        message: err.to_string(),
    }
}
