// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use serde::{Deserialize, Serialize};
use volume_types::{Volume, VolumeLocator, VolumeSpec};

/// When a create request may hand back an existing volume instead of
/// provisioning a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusePolicy {
    /// Equal locator and equal spec.
    #[default]
    LocatorAndSpec,
    /// Equal locator, whatever the spec.
    Locator,
    /// Always provision.
    Never,
}

impl ReusePolicy {
    pub fn matches(self, volume: &Volume, locator: &VolumeLocator, spec: &VolumeSpec) -> bool {
        match self {
            Self::LocatorAndSpec => &volume.locator == locator && &volume.spec == spec,
            Self::Locator => &volume.locator == locator,
            Self::Never => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Deadline for each driver call; `None` waits forever.
    pub driver_timeout: Option<Duration>,
    pub reuse_policy: ReusePolicy,
}

impl ManagerConfig {
    pub fn with_driver_timeout(mut self, timeout: Duration) -> Self {
        self.driver_timeout = Some(timeout);
        self
    }

    pub fn with_reuse_policy(mut self, policy: ReusePolicy) -> Self {
        self.reuse_policy = policy;
        self
    }
}
