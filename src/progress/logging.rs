//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started {
                project,
                environment,
            } => {
                info!(project = %project, env = %environment, "Starting deployment");
            }
            ProgressEvent::StageEntered { stage } => {
                info!(stage = %stage, "Entering stage");
            }
            ProgressEvent::BuildCommandStarted { command } => {
                info!(command = %command, "Running build command");
            }
            ProgressEvent::ArtifactsReused { path, failed_stage } => {
                info!(
                    artifacts = %path.display(),
                    failed_stage = %failed_stage,
                    "Reusing artifacts from the failed run without rebuilding"
                );
            }
            ProgressEvent::ResourceRequested { kind, name } => {
                debug!(kind = %kind, name = %name, "Requesting resource");
            }
            ProgressEvent::ResourceRecorded { kind, external_id } => {
                info!(kind = %kind, external_id = %external_id, "Resource created");
            }
            ProgressEvent::ResourceReused { kind, external_id } => {
                debug!(kind = %kind, external_id = %external_id, "Reusing resource");
            }
            ProgressEvent::ResourceDestroyed { kind, external_id } => {
                info!(kind = %kind, external_id = %external_id, "Resource destroyed");
            }
            ProgressEvent::ResourceOrphaned { kind, external_id } => {
                warn!(
                    kind = %kind,
                    external_id = %external_id,
                    "Resource marked orphaned; manual reconciliation needed"
                );
            }
            ProgressEvent::Exposed { url, total_time } => {
                info!(
                    url = %url,
                    total_time_ms = total_time.as_millis(),
                    "Deployment exposed"
                );
            }
            ProgressEvent::Failed { stage, error } => {
                warn!(stage = %stage, error = %error, "Deployment failed");
            }
            ProgressEvent::RollbackComplete {
                destroyed,
                surviving,
            } => {
                if *surviving > 0 {
                    warn!(destroyed, surviving, "Rollback incomplete");
                } else {
                    info!(destroyed, "Rollback complete");
                }
            }
        }
    }
}
