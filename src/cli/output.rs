//! Output formatting for multiple formats
//!
//! Command results go to stdout as JSON, YAML or human-readable text. The
//! failure report has the same shape for every command so scripts can rely on
//! `code` and `record`.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::config::DeployConfig;
use crate::detection::DetectionResult;
use crate::error::DeployError;
use crate::rollback::RollbackReport;
use crate::state::{DeploymentRecord, ProjectRecord, ResourceHandle};

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format
    Yaml,
    /// Human-readable formatted text
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    fn serialize<T: Serialize>(&self, value: &T, what: &str) -> Result<String> {
        match self.format {
            OutputFormat::Yaml => serde_yaml::to_string(value)
                .with_context(|| format!("Failed to serialize {} to YAML", what)),
            OutputFormat::Json | OutputFormat::Human => serde_json::to_string_pretty(value)
                .with_context(|| format!("Failed to serialize {} to JSON", what)),
        }
    }

    /// Formats the project registered by `init`
    pub fn format_project(&self, project: &ProjectRecord) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.serialize(project, "project");
        }

        let mut output = String::new();
        output.push_str("\u{2713} Project initialized\n");
        output.push_str(RULE);
        output.push_str("\n\n");
        output.push_str(&format!("Project:   {}\n", project.id));
        if let Some(ref origin) = project.origin {
            output.push_str(&format!("Origin:    {}\n", origin));
        }
        output.push_str(&format!("Root:      {}\n\n", project.root.display()));
        push_detection(&mut output, &project.detection);
        Ok(output)
    }

    /// Formats the result of a successful deploy
    pub fn format_deployment(&self, record: &DeploymentRecord) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.serialize(record, "deployment");
        }

        let mut output = String::new();
        output.push_str(&format!(
            "\u{2713} Deployed {} to {}\n",
            record.project_id, record.environment
        ));
        output.push_str(RULE);
        output.push_str("\n\n");
        if let Some(ref url) = record.public_url {
            output.push_str(&format!("URL:       {}\n", url));
        }
        output.push_str(&format!("Strategy:  {}\n\n", record.strategy));
        push_resources(&mut output, &record.resources);
        Ok(output)
    }

    /// Formats `status`: the project and its deployment records
    pub fn format_status(
        &self,
        project: &ProjectRecord,
        records: &[DeploymentRecord],
    ) -> Result<String> {
        if self.format != OutputFormat::Human {
            let output = json!({
                "project": project,
                "deployments": records,
            });
            return self.serialize(&output, "status");
        }

        let mut output = String::new();
        output.push_str(&format!("Project {}\n", project.id));
        output.push_str(RULE);
        output.push_str("\n\n");
        push_detection(&mut output, &project.detection);

        if records.is_empty() {
            output.push_str("\nNo deployments recorded.\n");
        }
        for record in records {
            output.push('\n');
            push_record(&mut output, record);
        }
        Ok(output)
    }

    /// Formats the outcome of one or more rollbacks
    pub fn format_rollback(&self, reports: &[RollbackReport]) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.serialize(&reports, "rollback report");
        }

        let mut output = String::new();
        for report in reports {
            output.push_str(&format!(
                "\u{2713} Rolled back {} ({})\n",
                report.project, report.environment
            ));
            for handle in &report.destroyed {
                output.push_str(&format!(
                    "  destroyed {} {}\n",
                    handle.kind, handle.external_id
                ));
            }
            for handle in &report.pruned {
                output.push_str(&format!(
                    "  pruned    {} {} (no longer exists)\n",
                    handle.kind, handle.external_id
                ));
            }
        }
        Ok(output)
    }

    /// Failure report shared by every command
    pub fn format_failure(
        &self,
        error: &DeployError,
        record: Option<&DeploymentRecord>,
    ) -> Result<String> {
        let surviving = match error {
            DeployError::PartialRollback { surviving } => Some(surviving),
            _ => None,
        };

        if self.format != OutputFormat::Human {
            let output = json!({
                "code": error.code(),
                "message": error.to_string(),
                "exit_code": error.exit_code(),
                "surviving": surviving,
                "record": record,
            });
            return self.serialize(&output, "failure report");
        }

        let mut output = String::new();
        output.push_str(&format!("\u{2717} {} [{}]\n", error, error.code()));
        output.push_str(RULE);
        output.push('\n');

        if let Some(record) = record {
            output.push('\n');
            push_record(&mut output, record);
        } else if let Some(surviving) = surviving {
            output.push('\n');
            push_resources(&mut output, surviving);
        }

        if error.leaves_external_state() {
            output.push_str(
                "\nResources listed above still exist. Rerun the command to resume, \
                 or run `deploy-tool rollback` to remove them.\n",
            );
        }
        Ok(output)
    }

    /// Formats configuration display
    pub fn format_config(&self, config: &DeployConfig) -> Result<String> {
        if self.format != OutputFormat::Human {
            return self.serialize(&config.to_display_map(), "config");
        }
        Ok(config.to_string())
    }
}

fn push_detection(output: &mut String, detection: &DetectionResult) {
    output.push_str("Detection:\n");
    output.push_str(&format!("\u{251C}\u{2500} Framework:  {}\n", detection.framework));
    output.push_str(&format!(
        "\u{251C}\u{2500} App root:   {}\n",
        display_root(detection)
    ));
    if let Some(ref dir) = detection.output_dir {
        output.push_str(&format!("\u{251C}\u{2500} Artifacts:  {}\n", dir.display()));
    }
    output.push_str(&format!(
        "\u{2514}\u{2500} Signals:    {}\n",
        detection.signals.join(", ")
    ));
}

fn display_root(detection: &DetectionResult) -> String {
    let root = detection.app_root.display().to_string();
    if root.is_empty() {
        ".".to_string()
    } else {
        root
    }
}

fn push_record(output: &mut String, record: &DeploymentRecord) {
    output.push_str(&format!(
        "Environment {}: {}\n",
        record.environment, record.status
    ));
    output.push_str(&format!(
        "  Framework: {} ({})\n",
        record.detection.framework, record.strategy
    ));
    if let Some(ref url) = record.public_url {
        output.push_str(&format!("  URL:       {}\n", url));
    }
    if let Some(ref failure) = record.last_error {
        output.push_str(&format!(
            "  Failed in {}: {} [{}]\n",
            failure.stage, failure.message, failure.code
        ));
    }
    output.push_str(&format!(
        "  Updated:   {}\n",
        record.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    push_resources(output, &record.resources);
}

fn push_resources(output: &mut String, resources: &[ResourceHandle]) {
    if resources.is_empty() {
        output.push_str("  Resources: (none)\n");
        return;
    }
    output.push_str("  Resources:\n");
    for (i, handle) in resources.iter().enumerate() {
        let connector = if i == resources.len() - 1 {
            "\u{2514}"
        } else {
            "\u{251C}"
        };
        output.push_str(&format!(
            "  {}\u{2500} {:<20} {:<24} {}\n",
            connector,
            handle.kind.as_str(),
            handle.external_id,
            handle.status.as_str()
        ));
    }
}
