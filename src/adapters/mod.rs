//! Process-backed implementations of the collaborator traits.

mod aws;
mod build;
mod git;
mod process;
mod ssh;

pub use aws::{classify_error, AwsCliGateway};
pub use build::LocalBuildRunner;
pub use git::GitSourceFetcher;
pub use ssh::SshRemoteExecutor;
