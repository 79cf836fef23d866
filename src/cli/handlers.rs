//! Command handlers. Each returns the process exit code.

use super::commands::{
    CliArgs, ConfigArgs, DeployArgs, InitArgs, OutputFormatArg, RollbackArgs, StatusArgs,
};
use super::output::{OutputFormat, OutputFormatter};
use crate::adapters::{AwsCliGateway, GitSourceFetcher, LocalBuildRunner, SshRemoteExecutor};
use crate::config::DeployConfig;
use crate::error::DeployError;
use crate::fs::RealFileSystem;
use crate::orchestrator::{Collaborators, DeploymentOrchestrator};
use crate::progress::LoggingHandler;
use crate::rollback::{RollbackManager, RollbackOptions};
use crate::state::{DeploymentRecord, DeploymentStore, Environment, FileDeploymentStore, ProjectId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration and state shared by every command.
pub struct Context {
    pub config: DeployConfig,
    pub store: Arc<FileDeploymentStore>,
    pub cancel: CancellationToken,
}

impl Context {
    /// Loads configuration from the environment, applies global CLI
    /// overrides and opens the state store.
    pub async fn from_args(args: &CliArgs, cancel: CancellationToken) -> Result<Self, DeployError> {
        let mut config = DeployConfig::default();
        if let Some(ref dir) = args.state_dir {
            config.state_dir = Some(dir.clone());
        }
        if let Some(ref region) = args.region {
            config.region = region.clone();
        }
        config.validate()?;

        let store = FileDeploymentStore::new(config.state_dir()?).await?;
        debug!(state_dir = %store.root().display(), "State store opened");

        Ok(Self {
            config,
            store: Arc::new(store),
            cancel,
        })
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            gateway: Arc::new(AwsCliGateway::new(self.config.cloud_context())),
            builder: Arc::new(LocalBuildRunner::new()),
            remote: Arc::new(SshRemoteExecutor::new()),
            fetcher: Arc::new(GitSourceFetcher::new()),
            fs: Arc::new(RealFileSystem::new()),
            progress: Arc::new(LoggingHandler),
        }
    }

    fn orchestrator(&self, stage_timeout: Option<u64>) -> Result<DeploymentOrchestrator, DeployError> {
        let mut settings = self.config.orchestrator_settings()?;
        if let Some(secs) = stage_timeout {
            settings.build_timeout = Duration::from_secs(secs);
            settings.deploy_timeout = Duration::from_secs(secs);
        }
        Ok(DeploymentOrchestrator::new(self.collaborators(), settings)
            .with_cancellation(self.cancel.clone()))
    }

    /// Explicit `--project`, else the project of the last `init`.
    async fn resolve_project(&self, explicit: Option<&str>) -> Result<ProjectId, DeployError> {
        if let Some(id) = explicit {
            return Ok(ProjectId::new(id));
        }
        self.store.current_project().await?.ok_or_else(|| {
            DeployError::ProjectNotInitialized(
                "no project selected; run `deploy-tool init` first or pass --project".to_string(),
            )
        })
    }
}

fn formatter(format: OutputFormatArg) -> OutputFormatter {
    OutputFormatter::new(OutputFormat::from(format))
}

fn print_output(result: anyhow::Result<String>) {
    match result {
        Ok(text) => print!("{}", text),
        Err(e) => eprintln!("Failed to format output: {:#}", e),
    }
}

/// Prints the failure report and returns the error's exit code.
fn report_failure(
    error: &DeployError,
    record: Option<&DeploymentRecord>,
    format: OutputFormatArg,
) -> i32 {
    error!(code = error.code(), "{}", error);
    print_output(formatter(format).format_failure(error, record));
    error.exit_code()
}

pub async fn handle_init(args: &InitArgs, ctx: &Context) -> i32 {
    info!(source = %args.source, "Initializing project");

    let result = async {
        let project = ctx.orchestrator(None)?.init(&args.source).await?;
        ctx.store.set_current_project(&project.id).await?;
        Ok::<_, DeployError>(project)
    }
    .await;

    match result {
        Ok(project) => {
            print_output(formatter(args.format).format_project(&project));
            0
        }
        Err(e) => report_failure(&e, None, args.format),
    }
}

pub async fn handle_deploy(args: &DeployArgs, ctx: &Context) -> i32 {
    let project = match ctx.resolve_project(args.project.as_deref()).await {
        Ok(id) => id,
        Err(e) => return report_failure(&e, None, args.format),
    };

    let orchestrator = match ctx.orchestrator(args.timeout) {
        Ok(o) => o,
        Err(e) => return report_failure(&e, None, args.format),
    };

    match orchestrator.deploy(&project, args.environment).await {
        Ok(record) => {
            print_output(formatter(args.format).format_deployment(&record));
            0
        }
        Err(e) => {
            let record = match ctx.store.load(&project, args.environment).await {
                Ok(record) => record,
                Err(load_err) => {
                    warn!(error = %load_err, "Could not load record for the failure report");
                    None
                }
            };
            report_failure(&e, record.as_ref(), args.format)
        }
    }
}

pub async fn handle_rollback(args: &RollbackArgs, ctx: &Context) -> i32 {
    let project = match ctx.resolve_project(args.project.as_deref()).await {
        Ok(id) => id,
        Err(e) => return report_failure(&e, None, args.format),
    };

    let environments: Vec<Environment> = match args.environment {
        Some(env) => vec![env],
        None => match ctx.store.list(&project).await {
            Ok(records) => records.iter().map(|r| r.environment).collect(),
            Err(e) => return report_failure(&e, None, args.format),
        },
    };

    if environments.is_empty() {
        warn!(project = %project, "No active deployment to roll back");
        return 0;
    }

    let manager = RollbackManager::new(
        ctx.store.clone(),
        Arc::new(AwsCliGateway::new(ctx.config.cloud_context())),
        Arc::new(LoggingHandler),
        ctx.config.gateway_timeout(),
    )
    .with_cancellation(ctx.cancel.clone());
    let options = RollbackOptions {
        prune_orphaned: args.prune_orphaned,
    };

    let mut reports = Vec::new();
    let mut exit_code = 0;
    for environment in environments {
        match manager.rollback(&project, environment, &options).await {
            Ok(report) => reports.push(report),
            Err(DeployError::NoActiveDeployment { .. }) => {
                warn!(project = %project, env = %environment, "No active deployment to roll back");
            }
            Err(e) => {
                let record = ctx.store.load(&project, environment).await.ok().flatten();
                let code = report_failure(&e, record.as_ref(), args.format);
                if exit_code == 0 {
                    exit_code = code;
                }
                if matches!(e, DeployError::Cancelled(_)) {
                    break;
                }
            }
        }
    }

    if !reports.is_empty() {
        print_output(formatter(args.format).format_rollback(&reports));
    }
    exit_code
}

pub async fn handle_status(args: &StatusArgs, ctx: &Context) -> i32 {
    let result = async {
        let id = ctx.resolve_project(args.project.as_deref()).await?;
        let project = ctx.store.load_project(&id).await?.ok_or_else(|| {
            DeployError::ProjectNotInitialized(format!("project {} is not initialized", id))
        })?;
        let records = match args.environment {
            Some(env) => ctx.store.load(&id, env).await?.into_iter().collect(),
            None => ctx.store.list(&id).await?,
        };
        Ok::<_, DeployError>((project, records))
    }
    .await;

    match result {
        Ok((project, records)) => {
            print_output(formatter(args.format).format_status(&project, &records));
            0
        }
        Err(e) => report_failure(&e, None, args.format),
    }
}

pub fn handle_config(args: &ConfigArgs, ctx: &Context) -> i32 {
    print_output(formatter(args.format).format_config(&ctx.config));
    0
}
