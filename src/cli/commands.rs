use crate::state::Environment;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Detect, build, provision and expose frontend applications on the cloud
#[derive(Parser, Debug)]
#[command(
    name = "deploy-tool",
    about = "Detect, build, provision and expose frontend applications on the cloud",
    version,
    author,
    long_about = "deploy-tool detects the framework of a frontend project (React, React+Vite, \
                  Angular, Next.js), picks a deployment strategy, provisions the cloud \
                  resources it needs and records every resource so a deployment can be \
                  resumed or rolled back."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_name = "DIR",
        help = "State directory (overrides DEPLOY_TOOL_STATE_DIR)"
    )]
    pub state_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "REGION",
        help = "Cloud region (overrides DEPLOY_TOOL_REGION)"
    )]
    pub region: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Register a project and detect its framework",
        long_about = "Clones a git repository (or uses a local path), detects the framework \
                      and records the project as the current one.\n\n\
                      Examples:\n  \
                      deploy-tool init .\n  \
                      deploy-tool init https://github.com/acme/storefront.git"
    )]
    Init(InitArgs),

    #[command(
        about = "Deploy the current project to an environment",
        long_about = "Builds the project, provisions the resources its strategy needs and \
                      exposes it. Rerunning after a failure resumes from the recorded state.\n\n\
                      Examples:\n  \
                      deploy-tool deploy staging\n  \
                      deploy-tool deploy prod --format json"
    )]
    Deploy(DeployArgs),

    #[command(
        about = "Destroy the resources of a deployment",
        long_about = "Destroys tracked resources in reverse creation order. Without an \
                      environment every environment of the project is rolled back.\n\n\
                      Examples:\n  \
                      deploy-tool rollback staging\n  \
                      deploy-tool rollback prod --prune-orphaned"
    )]
    Rollback(RollbackArgs),

    #[command(about = "Show the recorded state of a project")]
    Status(StatusArgs),

    #[command(about = "Show the effective configuration")]
    Config(ConfigArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    #[arg(
        value_name = "PATH_OR_URL",
        default_value = ".",
        help = "Local project directory or git repository URL"
    )]
    pub source: String,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct DeployArgs {
    #[arg(value_name = "ENVIRONMENT", value_parser = parse_environment)]
    pub environment: Environment,

    #[arg(
        short = 'p',
        long,
        value_name = "PROJECT",
        help = "Project id (defaults to the project of the last init)"
    )]
    pub project: Option<String>,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Per-stage limit for build and remote deploy steps"
    )]
    pub timeout: Option<u64>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct RollbackArgs {
    #[arg(value_name = "ENVIRONMENT", value_parser = parse_environment)]
    pub environment: Option<Environment>,

    #[arg(short = 'p', long, value_name = "PROJECT", help = "Project id")]
    pub project: Option<String>,

    #[arg(long, help = "Drop resources that no longer exist in the cloud")]
    pub prune_orphaned: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct StatusArgs {
    #[arg(value_name = "ENVIRONMENT", value_parser = parse_environment)]
    pub environment: Option<Environment>,

    #[arg(short = 'p', long, value_name = "PROJECT", help = "Project id")]
    pub project: Option<String>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

fn parse_environment(s: &str) -> Result<Environment, String> {
    s.parse::<Environment>().map_err(|e| e.to_string())
}
