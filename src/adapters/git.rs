use super::process::{self, describe};
use crate::collaborators::{ExecutionError, SourceFetcher};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::info;

/// Shallow `git clone` of the default branch.
#[derive(Debug, Clone, Default)]
pub struct GitSourceFetcher;

impl GitSourceFetcher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceFetcher for GitSourceFetcher {
    async fn fetch(&self, origin: &str, dest: &Path) -> Result<(), ExecutionError> {
        let args = vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            origin.to_string(),
            dest.to_string_lossy().into_owned(),
        ];
        let rendered = describe("git", &args);

        info!(origin = %origin, "Cloning repository");
        let mut command = Command::new("git");
        command.args(&args).env("GIT_TERMINAL_PROMPT", "0");
        process::run(command, &rendered).await?;
        Ok(())
    }
}
