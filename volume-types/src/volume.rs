// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A name-value map used for search filters and driver configuration.
pub type Labels = HashMap<String, String>;

/// System wide unique volume identifier, assigned once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    /// Allocate a fresh identifier. Identifiers are random and never recycled.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Filesystem a volume is (or should be) formatted with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filesystem {
    #[default]
    None,
    Ext4,
    Xfs,
    Zfs,
    Nfs,
}

impl Filesystem {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Ext4 => "ext4",
            Self::Xfs => "xfs",
            Self::Zfs => "zfs",
            Self::Nfs => "nfs",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "" => Some(Self::None),
            "ext4" => Some(Self::Ext4),
            "xfs" => Some(Self::Xfs),
            "zfs" => Some(Self::Zfs),
            "nfs" => Some(Self::Nfs),
            _ => None,
        }
    }

    pub fn is_none(self) -> bool {
        self == Self::None
    }
}

/// Driver defined class of service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeCos {
    #[default]
    None,
    Low,
    Medium,
    High,
}

/// Driver reported health. Advisory only, never gates a transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeStatus {
    #[default]
    None,
    NotPresent,
    Up,
    Down,
    Degraded,
}

/// Lifecycle state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    /// Create is in flight.
    Pending,
    /// Created, detached and unmounted.
    Available,
    /// Block device exported on this host.
    Attached,
    /// Filesystem mounted at a path.
    Mounted,
    /// Delete is in flight.
    Deleting,
    Deleted,
    /// A driver call failed irrecoverably.
    Error,
}

impl VolumeState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Available => "available",
            Self::Attached => "attached",
            Self::Mounted => "mounted",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
            Self::Error => "error",
        }
    }

    /// States in which a driver call is running for the volume.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Deleting)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Deleted
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged blob a driver hands to the core for safe keeping.
///
/// Used for cluster specific handles (`attached_on`, `replica_set`) that the
/// core stores and returns but never interprets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueHandle {
    pub kind: String,
    pub data: Vec<u8>,
}

impl OpaqueHandle {
    pub fn new(kind: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
        }
    }
}

/// Properties needed to create a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Ephemeral storage
    pub ephemeral: bool,

    /// Thin provisioned size in bytes
    pub size: u64,

    /// Format the volume with this filesystem
    pub format: Filesystem,

    /// Filesystem block size
    pub block_size: u32,

    /// Number of nodes allowed to fail while data stays available.
    /// Zero means the data is not erasure coded.
    pub ha_level: u32,

    pub cos: VolumeCos,

    pub dedupe: bool,

    /// Snapshot interval in minutes, zero disables scheduled snapshots
    pub snapshot_interval: u32,

    #[serde(default)]
    pub config_labels: Labels,
}

/// User facing identity and search metadata. Not required to be unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeLocator {
    pub name: String,

    #[serde(default)]
    pub volume_labels: Labels,
}

impl VolumeLocator {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            volume_labels: Labels::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.volume_labels.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.volume_labels.is_empty()
    }
}

/// Modifiers for a create call. Never stored on the volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    /// Fail if a volume with an equal locator already exists.
    pub fail_if_exists: bool,

    /// Materialize the new volume from this snapshot.
    pub create_from_snap: Option<crate::SnapId>,
}

/// A live, provisioned volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub locator: VolumeLocator,
    pub ctime: DateTime<Utc>,
    pub spec: VolumeSpec,
    /// Bytes in use
    pub usage: u64,
    pub last_scan: Option<DateTime<Utc>>,
    /// Filesystem detected on the volume, `None` until formatted
    pub format: Filesystem,
    pub status: VolumeStatus,
    pub state: VolumeState,
    pub attached_on: Option<OpaqueHandle>,
    pub device_path: Option<String>,
    pub attach_path: Option<String>,
    pub replica_set: Vec<OpaqueHandle>,
    /// State the volume was leaving when it entered `Error`
    pub prior_state: Option<VolumeState>,
    pub error_num: i32,
    pub error_string: String,
}

impl Volume {
    /// A fresh record for a volume whose create is about to be issued.
    pub fn pending(id: VolumeId, locator: VolumeLocator, spec: VolumeSpec) -> Self {
        Self {
            id,
            locator,
            ctime: Utc::now(),
            spec,
            usage: 0,
            last_scan: None,
            format: Filesystem::None,
            status: VolumeStatus::None,
            state: VolumeState::Pending,
            attached_on: None,
            device_path: None,
            attach_path: None,
            replica_set: Vec::new(),
            prior_state: None,
            error_num: 0,
            error_string: String::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        self.state == VolumeState::Error
    }
}
