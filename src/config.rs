//! Configuration management for deploy-tool
//!
//! Settings are loaded from environment variables with defaults, then
//! overridden by CLI flags.
//!
//! # Environment Variables
//!
//! - `DEPLOY_TOOL_STATE_DIR`: state root - default: `~/.deploy-tool`
//! - `DEPLOY_TOOL_REGION`: cloud region - falls back to `AWS_REGION`,
//!   `AWS_DEFAULT_REGION`, then "ap-south-1"
//! - `AWS_PROFILE`: credential profile passed to the cloud CLI
//! - `DEPLOY_TOOL_BUCKET_PREFIX`: static-site bucket prefix - default: "static-site"
//! - `DEPLOY_TOOL_SSH_KEY_PATH`: private key for containerized hosts
//! - `DEPLOY_TOOL_SSH_USER`: login user on containerized hosts - default: "ubuntu"
//! - `DEPLOY_TOOL_INSTANCE_TYPE`: compute instance type - default: "t3.micro"
//! - `DEPLOY_TOOL_IMAGE_ID`: machine image for compute instances
//! - `DEPLOY_TOOL_GATEWAY_TIMEOUT`: seconds per cloud call - default: "120"
//! - `DEPLOY_TOOL_BUILD_TIMEOUT`: seconds per build command - default: "900"
//! - `DEPLOY_TOOL_DEPLOY_TIMEOUT`: seconds per upload/remote step - default: "900"
//! - `DEPLOY_TOOL_CREATE_RETRIES`: retries after a timed-out create that did
//!   not happen - default: "1"
//! - `DEPLOY_TOOL_LOG_LEVEL`: logging level - default: "info"
//!
//! Cloud credentials themselves are never read here; the cloud CLI picks them
//! up from its usual environment.

use crate::collaborators::CloudContext;
use crate::error::DeployError;
use crate::orchestrator::OrchestratorSettings;
use crate::provisioner::ProvisionerSettings;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REGION: &str = "ap-south-1";
const DEFAULT_BUCKET_PREFIX: &str = "static-site";
const DEFAULT_SSH_USER: &str = "ubuntu";
const DEFAULT_INSTANCE_TYPE: &str = "t3.micro";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 900;
const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 900;
const DEFAULT_CREATE_RETRIES: u32 = 1;

/// Longest prefix that still leaves room for `-<env>-<8 hex>` in a bucket name.
const MAX_BUCKET_PREFIX_LEN: usize = 45;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Home directory could not be resolved for the default state dir
    #[error("Could not determine home directory; set DEPLOY_TOOL_STATE_DIR")]
    NoHomeDir,
}

impl From<ConfigError> for DeployError {
    fn from(err: ConfigError) -> Self {
        DeployError::Config(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub state_dir: Option<PathBuf>,
    pub region: String,
    pub profile: Option<String>,
    pub bucket_prefix: String,
    pub ssh_key_path: Option<PathBuf>,
    pub ssh_user: String,
    pub instance_type: String,
    pub image_id: Option<String>,
    pub gateway_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub deploy_timeout_secs: u64,
    pub create_retries: u32,
    pub log_level: String,
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_non_empty(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl Default for DeployConfig {
    /// Loads configuration from environment variables with defaults
    fn default() -> Self {
        let state_dir = env_non_empty("DEPLOY_TOOL_STATE_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".deploy-tool")));

        let region = env_non_empty("DEPLOY_TOOL_REGION")
            .or_else(|| env_non_empty("AWS_REGION"))
            .or_else(|| env_non_empty("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        Self {
            state_dir,
            region,
            profile: env_non_empty("AWS_PROFILE"),
            bucket_prefix: env_non_empty("DEPLOY_TOOL_BUCKET_PREFIX")
                .unwrap_or_else(|| DEFAULT_BUCKET_PREFIX.to_string()),
            ssh_key_path: env_non_empty("DEPLOY_TOOL_SSH_KEY_PATH").map(PathBuf::from),
            ssh_user: env_non_empty("DEPLOY_TOOL_SSH_USER")
                .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            instance_type: env_non_empty("DEPLOY_TOOL_INSTANCE_TYPE")
                .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string()),
            image_id: env_non_empty("DEPLOY_TOOL_IMAGE_ID"),
            gateway_timeout_secs: env_parse(
                "DEPLOY_TOOL_GATEWAY_TIMEOUT",
                DEFAULT_GATEWAY_TIMEOUT_SECS,
            ),
            build_timeout_secs: env_parse("DEPLOY_TOOL_BUILD_TIMEOUT", DEFAULT_BUILD_TIMEOUT_SECS),
            deploy_timeout_secs: env_parse(
                "DEPLOY_TOOL_DEPLOY_TIMEOUT",
                DEFAULT_DEPLOY_TIMEOUT_SECS,
            ),
            create_retries: env_parse("DEPLOY_TOOL_CREATE_RETRIES", DEFAULT_CREATE_RETRIES),
            log_level: env::var("DEPLOY_TOOL_LOG_LEVEL")
                .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
                .to_lowercase(),
        }
    }
}

impl DeployConfig {
    /// Validates the configuration
    ///
    /// Checks that timeouts are non-zero and bounded, the bucket prefix fits a
    /// bucket name, and the log level is known.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, secs) in [
            ("Gateway timeout", self.gateway_timeout_secs),
            ("Build timeout", self.build_timeout_secs),
            ("Deploy timeout", self.deploy_timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be at least 1 second",
                    name
                )));
            }
            if secs > 7200 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} cannot exceed 2 hours",
                    name
                )));
            }
        }

        if self.create_retries > 5 {
            return Err(ConfigError::ValidationFailed(
                "Create retries cannot exceed 5".to_string(),
            ));
        }

        if self.region.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Region must not be empty".to_string(),
            ));
        }

        if self.bucket_prefix.is_empty() || self.bucket_prefix.len() > MAX_BUCKET_PREFIX_LEN {
            return Err(ConfigError::ValidationFailed(format!(
                "Bucket prefix must be 1-{} characters",
                MAX_BUCKET_PREFIX_LEN
            )));
        }
        if !self
            .bucket_prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Bucket prefix '{}' may only contain lowercase letters, digits and '-'",
                self.bucket_prefix
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn state_dir(&self) -> Result<PathBuf, ConfigError> {
        self.state_dir.clone().ok_or(ConfigError::NoHomeDir)
    }

    pub fn cloud_context(&self) -> CloudContext {
        CloudContext::new(self.region.clone()).with_profile(self.profile.clone())
    }

    pub fn orchestrator_settings(&self) -> Result<OrchestratorSettings, ConfigError> {
        let mut settings =
            OrchestratorSettings::new(self.cloud_context(), self.state_dir()?.join("projects"));
        settings.bucket_prefix = self.bucket_prefix.clone();
        settings.instance_type = self.instance_type.clone();
        settings.image_id = self.image_id.clone();
        settings.ssh_key_path = self.ssh_key_path.clone();
        settings.ssh_user = self.ssh_user.clone();
        settings.build_timeout = Duration::from_secs(self.build_timeout_secs);
        settings.deploy_timeout = Duration::from_secs(self.deploy_timeout_secs);
        settings.provisioner = ProvisionerSettings {
            call_timeout: self.gateway_timeout(),
            create_retries: self.create_retries,
        };
        Ok(settings)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    /// Converts configuration to a display map for output formatting
    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(ref dir) = self.state_dir {
            map.insert("state_dir".to_string(), dir.display().to_string());
        }
        map.insert("region".to_string(), self.region.clone());
        if let Some(ref profile) = self.profile {
            map.insert("profile".to_string(), profile.clone());
        }
        map.insert("bucket_prefix".to_string(), self.bucket_prefix.clone());
        if let Some(ref key) = self.ssh_key_path {
            map.insert("ssh_key_path".to_string(), key.display().to_string());
        }
        map.insert("ssh_user".to_string(), self.ssh_user.clone());
        map.insert("instance_type".to_string(), self.instance_type.clone());
        if let Some(ref image) = self.image_id {
            map.insert("image_id".to_string(), image.clone());
        }
        map.insert(
            "gateway_timeout_secs".to_string(),
            self.gateway_timeout_secs.to_string(),
        );
        map.insert(
            "build_timeout_secs".to_string(),
            self.build_timeout_secs.to_string(),
        );
        map.insert(
            "deploy_timeout_secs".to_string(),
            self.deploy_timeout_secs.to_string(),
        );
        map.insert(
            "create_retries".to_string(),
            self.create_retries.to_string(),
        );
        map.insert("log_level".to_string(), self.log_level.clone());
        map
    }
}

impl fmt::Display for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "deploy-tool Configuration:")?;
        match self.state_dir {
            Some(ref dir) => writeln!(f, "  State Dir: {}", dir.display())?,
            None => writeln!(f, "  State Dir: <unset>")?,
        }
        writeln!(f, "  Region: {}", self.region)?;
        if let Some(ref profile) = self.profile {
            writeln!(f, "  Profile: {}", profile)?;
        }
        writeln!(f, "  Bucket Prefix: {}", self.bucket_prefix)?;
        writeln!(f, "  Instance Type: {}", self.instance_type)?;
        writeln!(f, "  Gateway Timeout: {}s", self.gateway_timeout_secs)?;
        writeln!(f, "  Build Timeout: {}s", self.build_timeout_secs)?;
        writeln!(f, "  Deploy Timeout: {}s", self.deploy_timeout_secs)?;
        writeln!(f, "  Create Retries: {}", self.create_retries)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
