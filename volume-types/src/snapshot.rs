// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Labels, VolumeId};

/// Identifier of a point-in-time snapshot. Distinct namespace from [`VolumeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapId(String);

impl SnapId {
    pub fn generate() -> Self {
        Self(format!("snap-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SnapId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SnapId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A snapshot as seen by enumeration. Cannot be attached or mounted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSnap {
    pub id: SnapId,
    /// Volume the snapshot was taken from
    pub volume_id: VolumeId,
    #[serde(default)]
    pub snap_labels: Labels,
    pub ctime: DateTime<Utc>,
    /// Bytes captured
    pub usage: u64,
}
