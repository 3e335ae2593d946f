// SPDX-License-Identifier: GPL-3.0-only

//! Values drivers hand back to the manager.
//!
//! Drivers never touch registry records; the manager copies these fields onto
//! the volume when it commits a transition.

use serde::{Deserialize, Serialize};
use volume_types::{Filesystem, OpaqueHandle, VolumeId, VolumeState, VolumeStatus};

/// Result of a successful create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provisioned {
    /// Filesystem already present, e.g. when materialized from a snapshot
    pub format: Filesystem,
    pub usage: u64,
    pub status: VolumeStatus,
    pub replica_set: Vec<OpaqueHandle>,
}

/// Result of a successful attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachInfo {
    pub device_path: String,
    pub attached_on: Option<OpaqueHandle>,
}

impl AttachInfo {
    pub fn device(device_path: impl Into<String>) -> Self {
        Self {
            device_path: device_path.into(),
            attached_on: None,
        }
    }
}

/// Result of a successful snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub usage: u64,
}

/// Driver view of a volume, used to refresh driver reported fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeReport {
    pub id: VolumeId,
    pub usage: u64,
    pub format: Filesystem,
    pub status: VolumeStatus,
    pub replica_set: Vec<OpaqueHandle>,
}

/// What a driver found when asked to recover a volume in `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredState {
    pub state: VolumeState,
    pub device_path: Option<String>,
    pub attach_path: Option<String>,
}

impl RecoveredState {
    pub fn available() -> Self {
        Self {
            state: VolumeState::Available,
            device_path: None,
            attach_path: None,
        }
    }
}
