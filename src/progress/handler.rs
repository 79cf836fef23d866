//! Progress handler trait and events

use crate::state::{Environment, LifecycleStatus, ProjectId, ResourceKind};
use std::path::PathBuf;
use std::time::Duration;

/// Events emitted while a deployment or rollback runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A deploy run took the lock and started
    Started {
        project: ProjectId,
        environment: Environment,
    },

    /// The record moved to a new lifecycle stage
    StageEntered { stage: LifecycleStatus },

    /// A build command is about to run
    BuildCommandStarted { command: String },

    /// A retry skips the build and ships what the failed run left on disk
    ArtifactsReused {
        path: PathBuf,
        failed_stage: LifecycleStatus,
    },

    /// A create call is about to be sent to the gateway
    ResourceRequested { kind: ResourceKind, name: String },

    /// A newly created resource was recorded
    ResourceRecorded {
        kind: ResourceKind,
        external_id: String,
    },

    /// An already recorded resource was reused
    ResourceReused {
        kind: ResourceKind,
        external_id: String,
    },

    ResourceDestroyed {
        kind: ResourceKind,
        external_id: String,
    },

    /// A resource exists outside the tool's confirmed knowledge
    ResourceOrphaned {
        kind: ResourceKind,
        external_id: String,
    },

    /// Deployment reached EXPOSED
    Exposed { url: String, total_time: Duration },

    /// Deployment moved to FAILED
    Failed {
        stage: LifecycleStatus,
        error: String,
    },

    RollbackComplete { destroyed: usize, surviving: usize },
}

/// Trait for handling progress events
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {
        // Intentionally empty
    }
}
