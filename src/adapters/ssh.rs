//! Remote host execution over the system `ssh` client.

use super::process::{self, describe};
use crate::collaborators::{ExecutionError, RemoteExecutor, RemoteHost};
use crate::descriptor::APP_PORT;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

const CONTAINER_NAME: &str = "deploy-tool-app";
const REMOTE_APP_DIR: &str = "deploy-tool-app";
/// Directories never shipped to the host; the image rebuilds them.
const CONTEXT_EXCLUDES: &[&str] = &["node_modules", ".next", ".git"];

#[derive(Debug, Clone)]
pub struct SshRemoteExecutor {
    /// Attempts made while a freshly launched host is still booting.
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
}

impl Default for SshRemoteExecutor {
    fn default() -> Self {
        Self {
            connect_attempts: 12,
            connect_backoff: Duration::from_secs(10),
        }
    }
}

fn ssh_options(host: &RemoteHost) -> Vec<String> {
    let mut options = vec![
        "-o".to_string(),
        "StrictHostKeyChecking=accept-new".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ConnectTimeout=10".to_string(),
    ];
    if let Some(ref key) = host.ssh_key {
        options.push("-i".to_string());
        options.push(key.to_string_lossy().into_owned());
    }
    options
}

fn target(host: &RemoteHost) -> String {
    format!("{}@{}", host.user, host.address)
}

/// Packs `context` into a gzipped tarball. Top-level entries named in
/// `CONTEXT_EXCLUDES` are left out; symlinks are stored as links.
pub fn pack_context(context: &Path) -> std::io::Result<Vec<u8>> {
    let mut entries = std::fs::read_dir(context)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut archive = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    archive.follow_symlinks(false);
    for entry in entries {
        let name = entry.file_name();
        if CONTEXT_EXCLUDES.iter().any(|excluded| name == *excluded) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            archive.append_dir_all(&name, &path)?;
        } else {
            archive.append_path_with_name(&path, &name)?;
        }
    }
    archive.into_inner()?.finish()
}

/// Installs docker through the vendor script unless it is already present.
pub fn runtime_script() -> String {
    "command -v docker >/dev/null 2>&1 || (curl -fsSL https://get.docker.com | sudo sh) \
     && sudo systemctl enable --now docker"
        .to_string()
}

/// Builds the image from the uploaded context and replaces the running container.
pub fn run_script() -> String {
    format!(
        "cd ~/{dir} && sudo docker build -t {name} . \
         && (sudo docker rm -f {name} >/dev/null 2>&1 || true) \
         && sudo docker run -d --restart unless-stopped --name {name} -p {port}:{port} {name}",
        dir = REMOTE_APP_DIR,
        name = CONTAINER_NAME,
        port = APP_PORT,
    )
}

impl SshRemoteExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    async fn ssh(&self, host: &RemoteHost, script: &str) -> Result<String, ExecutionError> {
        let mut args = ssh_options(host);
        args.push(target(host));
        args.push(script.to_string());
        let rendered = describe("ssh", &args);

        let mut command = Command::new("ssh");
        command.args(&args);
        Ok(process::run(command, &rendered).await?.stdout)
    }

    async fn wait_reachable(&self, host: &RemoteHost) -> Result<(), ExecutionError> {
        let mut attempt = 1;
        loop {
            match self.ssh(host, "true").await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < self.connect_attempts => {
                    debug!(host = %host.address, attempt, error = %e, "Host not reachable yet");
                    attempt += 1;
                    tokio::time::sleep(self.connect_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Streams the build context as a tarball into the remote app directory.
    async fn upload_context(&self, host: &RemoteHost, context: &Path) -> Result<(), ExecutionError> {
        let dir = context.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || pack_context(&dir))
            .await
            .map_err(|e| ExecutionError::Other(format!("packing build context: {}", e)))?
            .map_err(|e| ExecutionError::Other(format!("packing build context: {}", e)))?;
        debug!(bytes = archive.len(), "Build context packed");

        let mut args = ssh_options(host);
        args.push(target(host));
        args.push(format!(
            "rm -rf ~/{dir} && mkdir -p ~/{dir} && tar -xzf - -C ~/{dir}",
            dir = REMOTE_APP_DIR
        ));
        let rendered = describe("ssh", &args);

        let mut child = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::Spawn {
                command: rendered.clone(),
                message: e.to_string(),
            })?;

        // stdin is closed when the handle drops at the end of the arm
        let streamed = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(&archive).await,
            None => Ok(()),
        };

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecutionError::Other(format!("{}: {}", rendered, e)))?;
        if !output.status.success() {
            return Err(ExecutionError::NonZeroExit {
                command: rendered,
                code: output.status.code(),
                stderr: process::tail(&String::from_utf8_lossy(&output.stderr), 20),
            });
        }
        streamed.map_err(|e| ExecutionError::Other(format!("streaming build context: {}", e)))
    }

    async fn upload_descriptor(
        &self,
        host: &RemoteHost,
        descriptor: &Path,
    ) -> Result<(), ExecutionError> {
        let mut args = ssh_options(host);
        args.push(descriptor.to_string_lossy().into_owned());
        args.push(format!("{}:~/{}/Dockerfile", target(host), REMOTE_APP_DIR));
        let rendered = describe("scp", &args);

        let mut command = Command::new("scp");
        command.args(&args);
        process::run(command, &rendered).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for SshRemoteExecutor {
    async fn ensure_runtime(&self, host: &RemoteHost) -> Result<(), ExecutionError> {
        self.wait_reachable(host).await?;
        info!(host = %host.address, "Ensuring container runtime");
        self.ssh(host, &runtime_script()).await?;
        Ok(())
    }

    async fn deploy_container(
        &self,
        host: &RemoteHost,
        descriptor: &Path,
        build_context: &Path,
    ) -> Result<String, ExecutionError> {
        info!(host = %host.address, context = %build_context.display(), "Uploading build context");
        self.upload_context(host, build_context).await?;
        self.upload_descriptor(host, descriptor).await?;

        info!(host = %host.address, "Building and starting container");
        self.ssh(host, &run_script()).await?;

        Ok(format!("http://{}:{}", host.address, APP_PORT))
    }
}
