//! Parsers for the project files detection looks at.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The parts of `package.json` detection cares about.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, Value>,
    #[serde(default)]
    pub dev_dependencies: BTreeMap<String, Value>,
}

impl PackageManifest {
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Runtime and dev dependencies both count.
    pub fn has_dependency(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }
}

/// Minimal view of `angular.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AngularWorkspace {
    #[serde(default)]
    pub default_project: Option<String>,
    #[serde(default)]
    pub projects: BTreeMap<String, Value>,
}

impl AngularWorkspace {
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Build output directory of the default project, or of the first one by
    /// name. Handles both the string form and the `{ "base": ... }` form of
    /// `outputPath`, falling back to `dist/<project>`.
    pub fn output_path(&self) -> Option<PathBuf> {
        let name = self
            .default_project
            .as_ref()
            .filter(|n| self.projects.contains_key(*n))
            .or_else(|| self.projects.keys().next())?;

        let configured = self.projects.get(name).and_then(|project| {
            let output = project
                .pointer("/architect/build/options/outputPath")
                .or_else(|| project.pointer("/targets/build/options/outputPath"))?;
            match output {
                Value::String(path) => Some(path.clone()),
                Value::Object(obj) => obj.get("base").and_then(Value::as_str).map(str::to_string),
                _ => None,
            }
        });

        Some(
            configured
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("dist").join(name)),
        )
    }
}
