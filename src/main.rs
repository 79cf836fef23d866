use deploy_tool::cli::commands::{CliArgs, Commands};
use deploy_tool::cli::handlers::{
    handle_config, handle_deploy, handle_init, handle_rollback, handle_status, Context,
};
use deploy_tool::util::logging::{init_logging, parse_level, LoggingConfig};
use deploy_tool::{NAME, VERSION};

use clap::Parser;
use std::env;
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let ctx = match Context::from_args(&args, cancel).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("\nPlease check your environment variables and command-line arguments.");
            process::exit(e.exit_code());
        }
    };

    let exit_code = match &args.command {
        Commands::Init(init_args) => handle_init(init_args, &ctx).await,
        Commands::Deploy(deploy_args) => handle_deploy(deploy_args, &ctx).await,
        Commands::Rollback(rollback_args) => handle_rollback(rollback_args, &ctx).await,
        Commands::Status(status_args) => handle_status(status_args, &ctx).await,
        Commands::Config(config_args) => handle_config(config_args, &ctx),
    };

    process::exit(exit_code);
}

/// First Ctrl-C cancels the running step so the record is saved as FAILED.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step is recorded");
            cancel.cancel();
        }
    });
}

fn init_logging_from_args(args: &CliArgs) {
    let level = if let Some(level_str) = &args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else if args.quiet {
        Level::ERROR
    } else {
        let level_str = env::var("DEPLOY_TOOL_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        parse_level(&level_str)
    };

    init_logging(LoggingConfig {
        level,
        use_json: LoggingConfig::json_from_env(),
        ..Default::default()
    });
}
