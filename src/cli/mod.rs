pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{CliArgs, Commands, DeployArgs, InitArgs, RollbackArgs, StatusArgs};
pub use output::{OutputFormat, OutputFormatter};
