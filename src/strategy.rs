//! Mapping from framework variant to deployment strategy.

use crate::detection::FrameworkVariant;
use crate::state::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    StaticSite,
    ContainerizedHost,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::StaticSite => "static-site",
            StrategyKind::ContainerizedHost => "containerized-host",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived, never stored on its own: a pure function of the framework.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStrategy {
    pub kind: StrategyKind,
    /// Resources to provision. Waves run in order; kinds inside one wave do
    /// not depend on each other and may be created concurrently. Flattened,
    /// this is the creation order recorded in the deployment record.
    pub waves: Vec<Vec<ResourceKind>>,
}

impl DeploymentStrategy {
    pub fn required_resources(&self) -> Vec<ResourceKind> {
        self.waves.iter().flatten().copied().collect()
    }

    pub fn requires_local_build(&self) -> bool {
        self.kind == StrategyKind::StaticSite
    }
}

pub struct StrategySelector;

impl StrategySelector {
    pub fn select(framework: FrameworkVariant) -> DeploymentStrategy {
        match framework {
            FrameworkVariant::React | FrameworkVariant::ReactVite | FrameworkVariant::Angular => {
                DeploymentStrategy {
                    kind: StrategyKind::StaticSite,
                    waves: vec![
                        vec![ResourceKind::ObjectStoreBucket],
                        vec![ResourceKind::BucketPolicy],
                    ],
                }
            }
            FrameworkVariant::NextJs => DeploymentStrategy {
                kind: StrategyKind::ContainerizedHost,
                waves: vec![
                    vec![ResourceKind::ComputeInstance],
                    vec![ResourceKind::SecurityGroup, ResourceKind::KeyPair],
                ],
            },
        }
    }
}
