use super::manifest::AngularWorkspace;
use super::rules::{self, ProjectProbe, ANGULAR_CONFIG_FILES};
use super::{DetectionResult, FrameworkVariant};
use crate::error::DeployError;
use crate::fs::{FileSystem, RealFileSystem};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many directory levels below the root are searched for an app.
pub const MAX_SEARCH_DEPTH: usize = 3;

const SKIPPED_DIRS: &[&str] = &["node_modules", "dist", "build", "out", "coverage", "target"];

type RuleMatch = (PathBuf, FrameworkVariant, Vec<String>);

pub struct FrameworkDetector {
    fs: Arc<dyn FileSystem>,
}

impl FrameworkDetector {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// Detect a project tree.
    ///
    /// The root is checked first. Otherwise subdirectories are searched
    /// breadth-first in name order; the shallowest level with any match wins,
    /// and disagreeing matches on that level are ambiguous.
    pub fn detect(&self, root: &Path) -> Result<DetectionResult, DeployError> {
        if !self.fs.is_dir(root) {
            return Err(DeployError::UnsupportedFramework {
                root: root.to_path_buf(),
            });
        }

        let probe = ProjectProbe::new(self.fs.as_ref(), root);
        if let Some((variant, signals)) = rules::evaluate(&probe)? {
            return self.finish(root, (root.to_path_buf(), variant, signals));
        }

        let mut frontier = vec![root.to_path_buf()];
        for depth in 1..=MAX_SEARCH_DEPTH {
            let level = self.children(&frontier);
            if level.is_empty() {
                break;
            }

            let matches = self.evaluate_level(&level)?;
            debug!(depth, dirs = level.len(), matches = matches.len(), "Scanned level");

            if !matches.is_empty() {
                let variants: BTreeSet<FrameworkVariant> =
                    matches.iter().map(|(_, v, _)| *v).collect();
                if variants.len() > 1 {
                    let candidates = matches
                        .iter()
                        .map(|(dir, v, _)| format!("{} ({})", v, relative(root, dir).display()))
                        .collect();
                    return Err(DeployError::AmbiguousFramework { candidates });
                }
                if matches.len() > 1 {
                    warn!(
                        count = matches.len(),
                        "Several apps of the same framework found, using the first by name"
                    );
                }
                if let Some(first) = matches.into_iter().next() {
                    return self.finish(root, first);
                }
            }

            frontier = level;
        }

        Err(DeployError::UnsupportedFramework {
            root: root.to_path_buf(),
        })
    }

    fn children(&self, parents: &[PathBuf]) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        for parent in parents {
            let entries = match self.fs.read_dir(parent) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %parent.display(), error = %e, "Skipping unreadable directory");
                    continue;
                }
            };
            dirs.extend(
                entries
                    .into_iter()
                    .filter(|e| e.is_dir() && !is_skipped(e.file_name()))
                    .map(|e| e.path),
            );
        }
        dirs
    }

    fn evaluate_level(&self, dirs: &[PathBuf]) -> Result<Vec<RuleMatch>, DeployError> {
        let mut matches = Vec::new();
        for dir in dirs {
            let probe = ProjectProbe::new(self.fs.as_ref(), dir.as_path());
            match rules::evaluate(&probe) {
                Ok(Some((variant, signals))) => matches.push((dir.clone(), variant, signals)),
                Ok(None) => {}
                // A broken manifest below the root is noise, not the app
                Err(DeployError::InvalidManifest { path, message }) => {
                    warn!(path = %path.display(), error = %message, "Ignoring unparseable manifest");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(matches)
    }

    fn finish(&self, root: &Path, found: RuleMatch) -> Result<DetectionResult, DeployError> {
        let (dir, variant, signals) = found;
        let output_dir = match variant {
            FrameworkVariant::Angular => self.angular_output_dir(&dir)?,
            other => other.default_output_dir(),
        };
        let app_root = relative(root, &dir);

        info!(
            framework = %variant,
            app_root = %app_root.display(),
            signals = ?signals,
            "Framework detected"
        );

        Ok(DetectionResult::new(variant, app_root, signals).with_output_dir(output_dir))
    }

    fn angular_output_dir(&self, dir: &Path) -> Result<Option<PathBuf>, DeployError> {
        let path = ANGULAR_CONFIG_FILES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| self.fs.is_file(p));
        let Some(path) = path else {
            return Ok(FrameworkVariant::Angular.default_output_dir());
        };

        let content = self
            .fs
            .read_to_string(&path)
            .map_err(|e| DeployError::InvalidManifest {
                path: path.clone(),
                message: e.to_string(),
            })?;
        let workspace =
            AngularWorkspace::parse(&content).map_err(|e| DeployError::InvalidManifest {
                path: path.clone(),
                message: e.to_string(),
            })?;

        Ok(workspace
            .output_path()
            .or_else(|| FrameworkVariant::Angular.default_output_dir()))
    }
}

impl Default for FrameworkDetector {
    fn default() -> Self {
        Self::new(Arc::new(RealFileSystem::new()))
    }
}

fn is_skipped(name: &str) -> bool {
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

fn relative(root: &Path, dir: &Path) -> PathBuf {
    dir.strip_prefix(root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| dir.to_path_buf())
}
