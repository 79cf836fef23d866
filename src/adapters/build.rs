use super::process::{self, describe};
use crate::collaborators::{BuildCommand, BuildRunner, ExecutionError};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs build tool commands as local child processes in the app root.
#[derive(Debug, Clone, Default)]
pub struct LocalBuildRunner;

impl LocalBuildRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BuildRunner for LocalBuildRunner {
    async fn run(&self, app_root: &Path, command: &BuildCommand) -> Result<(), ExecutionError> {
        let rendered = describe(&command.program, &command.args);
        info!(command = %rendered, dir = %app_root.display(), "Running build command");

        let mut child = Command::new(&command.program);
        child.args(&command.args).current_dir(app_root);

        let output = process::run(child, &rendered).await?;
        debug!(
            command = %rendered,
            output = %process::tail(&output.stdout, 10),
            "Build command finished"
        );
        let warnings = process::tail(&output.stderr, 10);
        if !warnings.is_empty() {
            debug!(command = %rendered, stderr = %warnings, "Build command wrote to stderr");
        }
        Ok(())
    }
}
