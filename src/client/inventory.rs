//! Instance inventory and target eligibility.
//!
//! Before a batch runs, every configured instance is checked against an
//! [`Inventory`]. Instances without a confirmed execution agent are
//! excluded from the batch (with their platform logged) instead of
//! failing the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::core::types::InstanceId;

/// Operating system family of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformKind {
    AmazonLinux,
    RedHat,
    Ubuntu,
    Debian,
    Windows,
    #[default]
    Unknown,
}

impl PlatformKind {
    /// Classify a free-form platform or image name ("Amazon Linux 2",
    /// "Ubuntu 22.04", "windows", ...).
    pub fn from_platform_name(name: &str) -> Self {
        let name = name.to_ascii_lowercase();
        if name.contains("windows") {
            PlatformKind::Windows
        } else if name.contains("amazon") {
            PlatformKind::AmazonLinux
        } else if name.contains("red hat") || name.contains("rhel") {
            PlatformKind::RedHat
        } else if name.contains("ubuntu") {
            PlatformKind::Ubuntu
        } else if name.contains("debian") {
            PlatformKind::Debian
        } else {
            PlatformKind::Unknown
        }
    }

    /// Whether shell scripts can run on this platform.
    pub fn is_unix(&self) -> bool {
        matches!(
            self,
            PlatformKind::AmazonLinux
                | PlatformKind::RedHat
                | PlatformKind::Ubuntu
                | PlatformKind::Debian
        )
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlatformKind::AmazonLinux => "amazon-linux",
            PlatformKind::RedHat => "red-hat",
            PlatformKind::Ubuntu => "ubuntu",
            PlatformKind::Debian => "debian",
            PlatformKind::Windows => "windows",
            PlatformKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Source of truth for which instances can receive commands.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Whether the instance has a connected execution agent.
    async fn is_managed(&self, instance: &InstanceId) -> bool;

    /// Operating system family of the instance.
    async fn classify_platform(&self, instance: &InstanceId) -> PlatformKind;
}

/// Inventory backed by configuration.
///
/// When no managed set is given, every instance counts as managed.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    managed: Option<HashSet<InstanceId>>,
    platforms: HashMap<InstanceId, PlatformKind>,
}

impl StaticInventory {
    /// Inventory where every instance is managed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the managed set to the given instances.
    pub fn with_managed<I, S>(mut self, instances: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<InstanceId>,
    {
        self.managed = Some(instances.into_iter().map(Into::into).collect());
        self
    }

    /// Record the platform of an instance.
    pub fn with_platform(mut self, instance: impl Into<InstanceId>, platform: PlatformKind) -> Self {
        self.platforms.insert(instance.into(), platform);
        self
    }
}

#[async_trait]
impl Inventory for StaticInventory {
    async fn is_managed(&self, instance: &InstanceId) -> bool {
        match &self.managed {
            Some(managed) => managed.contains(instance),
            None => true,
        }
    }

    async fn classify_platform(&self, instance: &InstanceId) -> PlatformKind {
        self.platforms.get(instance).copied().unwrap_or_default()
    }
}

/// An instance left out of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExcludedInstance {
    pub instance: InstanceId,
    pub platform: PlatformKind,
}

/// Outcome of checking configured instances against an inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetResolution {
    /// Instances to dispatch to, in configured order.
    pub eligible: Vec<InstanceId>,
    /// Instances without a confirmed agent.
    pub excluded: Vec<ExcludedInstance>,
}

impl TargetResolution {
    pub fn is_empty(&self) -> bool {
        self.eligible.is_empty()
    }
}

/// Split `instances` into eligible and excluded targets.
///
/// Duplicates are dropped; the first occurrence keeps its position.
pub async fn resolve_targets(
    inventory: &dyn Inventory,
    instances: &[InstanceId],
) -> TargetResolution {
    let mut seen = HashSet::new();
    let mut resolution = TargetResolution::default();

    for instance in instances {
        if !seen.insert(instance) {
            continue;
        }

        if inventory.is_managed(instance).await {
            debug!(instance = %instance, "instance has a connected agent");
            resolution.eligible.push(instance.clone());
        } else {
            let platform = inventory.classify_platform(instance).await;
            warn!(
                instance = %instance,
                platform = %platform,
                "instance has no connected agent, excluding from batch"
            );
            resolution.excluded.push(ExcludedInstance {
                instance: instance.clone(),
                platform,
            });
        }
    }

    resolution
}
