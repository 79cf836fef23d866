//! Child process plumbing shared by the process-backed adapters.

use crate::collaborators::ExecutionError;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Lines of stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 20;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Renders a command the way a user would type it, for logs and errors.
pub fn describe(program: &str, args: &[String]) -> String {
    let mut rendered = program.to_string();
    for arg in args {
        rendered.push(' ');
        if arg.contains(char::is_whitespace) {
            rendered.push_str(&format!("'{}'", arg));
        } else {
            rendered.push_str(arg);
        }
    }
    rendered
}

/// Last lines of a stream, trimmed.
pub fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Runs a prepared command to completion and captures its output.
///
/// The child is killed when the returned future is dropped, so wrapping the
/// call in a timeout or a cancellation `select!` stops the process too.
pub async fn run(mut command: Command, rendered: &str) -> Result<CommandOutput, ExecutionError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(command = %rendered, "Running");

    let output = command.output().await.map_err(|e| ExecutionError::Spawn {
        command: rendered.to_string(),
        message: e.to_string(),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(ExecutionError::NonZeroExit {
            command: rendered.to_string(),
            code: output.status.code(),
            stderr: tail(&stderr, STDERR_TAIL_LINES),
        });
    }

    Ok(CommandOutput { stdout, stderr })
}
