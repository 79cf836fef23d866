//! Framework detection
//!
//! Classifies a project tree into one [`FrameworkVariant`] using the ordered
//! rule chain in [`rules`]. Detection reads files only; it never touches the
//! network and never depends on directory iteration order.

mod detector;
mod framework;
pub mod manifest;
pub mod rules;

pub use detector::{FrameworkDetector, MAX_SEARCH_DEPTH};
pub use framework::FrameworkVariant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Immutable outcome of one detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub framework: FrameworkVariant,
    /// App directory relative to the project root; empty when it is the root.
    pub app_root: PathBuf,
    /// Marker files (or `package.json:<dep>` entries) the winning rule matched.
    pub signals: Vec<String>,
    /// Build artifact directory relative to `app_root`. `None` for variants
    /// without a local build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub detected_at: DateTime<Utc>,
}

impl DetectionResult {
    pub fn new(framework: FrameworkVariant, app_root: PathBuf, signals: Vec<String>) -> Self {
        Self {
            framework,
            app_root,
            signals,
            output_dir: framework.default_output_dir(),
            detected_at: Utc::now(),
        }
    }

    pub fn with_output_dir(mut self, output_dir: Option<PathBuf>) -> Self {
        self.output_dir = output_dir;
        self
    }

    /// Equal in everything but the timestamp.
    pub fn same_outcome(&self, other: &DetectionResult) -> bool {
        self.framework == other.framework
            && self.app_root == other.app_root
            && self.signals == other.signals
            && self.output_dir == other.output_dir
    }
}
