//! Ordered detection rules.
//!
//! Precedence is the position in [`RULES`]: the first rule whose predicate
//! matches a directory decides the variant. Vite-based React projects also
//! satisfy the plain React rule, so the Vite rule must come first.

use super::manifest::PackageManifest;
use super::FrameworkVariant;
use crate::error::DeployError;
use crate::fs::FileSystem;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};

pub const ANGULAR_CONFIG_FILES: &[&str] = &["angular.json", ".angular-cli.json"];
pub const NEXT_CONFIG_FILES: &[&str] = &[
    "next.config.js",
    "next.config.mjs",
    "next.config.cjs",
    "next.config.ts",
];
pub const VITE_CONFIG_FILES: &[&str] = &[
    "vite.config.js",
    "vite.config.ts",
    "vite.config.mjs",
    "vite.config.cjs",
    "vite.config.mts",
    "vite.config.cts",
];
pub const MANIFEST_FILE: &str = "package.json";

/// Lazily evaluated view of one candidate directory.
pub struct ProjectProbe<'a> {
    fs: &'a dyn FileSystem,
    dir: PathBuf,
    manifest: OnceCell<Option<PackageManifest>>,
}

impl<'a> ProjectProbe<'a> {
    pub fn new(fs: &'a dyn FileSystem, dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            dir: dir.into(),
            manifest: OnceCell::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// First of `candidates` present as a file in this directory.
    pub fn first_file(&self, candidates: &[&'static str]) -> Option<&'static str> {
        candidates
            .iter()
            .copied()
            .find(|name| self.fs.is_file(&self.dir.join(name)))
    }

    /// Parsed `package.json`, if any. Parsed at most once per probe.
    pub fn manifest(&self) -> Result<Option<&PackageManifest>, DeployError> {
        if let Some(cached) = self.manifest.get() {
            return Ok(cached.as_ref());
        }

        let path = self.dir.join(MANIFEST_FILE);
        let parsed = if self.fs.is_file(&path) {
            let content =
                self.fs
                    .read_to_string(&path)
                    .map_err(|e| DeployError::InvalidManifest {
                        path: path.clone(),
                        message: e.to_string(),
                    })?;
            let manifest =
                PackageManifest::parse(&content).map_err(|e| DeployError::InvalidManifest {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            Some(manifest)
        } else {
            None
        };

        Ok(self.manifest.get_or_init(|| parsed).as_ref())
    }

    fn has_dependency(&self, name: &str) -> Result<bool, DeployError> {
        Ok(self
            .manifest()?
            .map(|m| m.has_dependency(name))
            .unwrap_or(false))
    }
}

/// A predicate returns the marker signals it matched on, or `None`.
pub type RulePredicate = fn(&ProjectProbe<'_>) -> Result<Option<Vec<String>>, DeployError>;

pub struct DetectionRule {
    pub variant: FrameworkVariant,
    pub predicate: RulePredicate,
}

pub static RULES: &[DetectionRule] = &[
    DetectionRule {
        variant: FrameworkVariant::Angular,
        predicate: angular,
    },
    DetectionRule {
        variant: FrameworkVariant::NextJs,
        predicate: nextjs,
    },
    DetectionRule {
        variant: FrameworkVariant::ReactVite,
        predicate: react_vite,
    },
    DetectionRule {
        variant: FrameworkVariant::React,
        predicate: react,
    },
];

fn angular(probe: &ProjectProbe<'_>) -> Result<Option<Vec<String>>, DeployError> {
    Ok(probe
        .first_file(ANGULAR_CONFIG_FILES)
        .map(|f| vec![f.to_string()]))
}

fn nextjs(probe: &ProjectProbe<'_>) -> Result<Option<Vec<String>>, DeployError> {
    if let Some(config) = probe.first_file(NEXT_CONFIG_FILES) {
        return Ok(Some(vec![config.to_string()]));
    }
    if probe.has_dependency("next")? {
        return Ok(Some(vec!["package.json:next".to_string()]));
    }
    Ok(None)
}

fn react_vite(probe: &ProjectProbe<'_>) -> Result<Option<Vec<String>>, DeployError> {
    let Some(config) = probe.first_file(VITE_CONFIG_FILES) else {
        return Ok(None);
    };
    if !probe.has_dependency("react")? {
        return Ok(None);
    }
    Ok(Some(vec![
        config.to_string(),
        "package.json:react".to_string(),
    ]))
}

fn react(probe: &ProjectProbe<'_>) -> Result<Option<Vec<String>>, DeployError> {
    Ok(probe
        .has_dependency("react")?
        .then(|| vec!["package.json:react".to_string()]))
}

/// Runs the rule chain against one directory.
pub fn evaluate(
    probe: &ProjectProbe<'_>,
) -> Result<Option<(FrameworkVariant, Vec<String>)>, DeployError> {
    for rule in RULES {
        if let Some(signals) = (rule.predicate)(probe)? {
            return Ok(Some((rule.variant, signals)));
        }
    }
    Ok(None)
}
