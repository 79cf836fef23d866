use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Frameworks the detector recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FrameworkVariant {
    #[serde(rename = "react")]
    React,
    #[serde(rename = "react-vite")]
    ReactVite,
    #[serde(rename = "angular")]
    Angular,
    #[serde(rename = "nextjs")]
    NextJs,
}

impl FrameworkVariant {
    pub fn all() -> &'static [FrameworkVariant] {
        &[
            FrameworkVariant::React,
            FrameworkVariant::ReactVite,
            FrameworkVariant::Angular,
            FrameworkVariant::NextJs,
        ]
    }

    /// Human-readable name, as shown in reports.
    pub fn name(&self) -> &'static str {
        match self {
            FrameworkVariant::React => "React",
            FrameworkVariant::ReactVite => "React+Vite",
            FrameworkVariant::Angular => "Angular",
            FrameworkVariant::NextJs => "Next.js",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FrameworkVariant::React => "react",
            FrameworkVariant::ReactVite => "react-vite",
            FrameworkVariant::Angular => "angular",
            FrameworkVariant::NextJs => "nextjs",
        }
    }

    /// Conventional artifact directory of `npm run build`, relative to the
    /// app root. Angular's is read from `angular.json` at detection time.
    pub fn default_output_dir(&self) -> Option<PathBuf> {
        match self {
            FrameworkVariant::React => Some(PathBuf::from("build")),
            FrameworkVariant::ReactVite => Some(PathBuf::from("dist")),
            FrameworkVariant::Angular => Some(PathBuf::from("dist")),
            FrameworkVariant::NextJs => None,
        }
    }
}

impl fmt::Display for FrameworkVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_names() {
        let names: Vec<String> = FrameworkVariant::all()
            .iter()
            .map(|v| serde_json::to_string(v).unwrap())
            .collect();
        assert_eq!(
            names,
            vec!["\"react\"", "\"react-vite\"", "\"angular\"", "\"nextjs\""]
        );
    }

    #[test]
    fn test_display_uses_human_name() {
        assert_eq!(FrameworkVariant::ReactVite.to_string(), "React+Vite");
        assert_eq!(FrameworkVariant::NextJs.to_string(), "Next.js");
    }

    #[test]
    fn test_default_output_dirs() {
        assert_eq!(
            FrameworkVariant::React.default_output_dir(),
            Some(PathBuf::from("build"))
        );
        assert_eq!(
            FrameworkVariant::ReactVite.default_output_dir(),
            Some(PathBuf::from("dist"))
        );
        assert!(FrameworkVariant::NextJs.default_output_dir().is_none());
    }
}
