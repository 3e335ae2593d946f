// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use volume_types::{Filesystem, VolumeId};

use crate::{AttachInfo, DriverError};

/// Implemented only by block based backends. Filesystem providers skip it.
#[async_trait]
pub trait BlockDriver: Send + Sync {
    /// Map the device to this host and report where it was exported.
    async fn attach(&self, id: &VolumeId) -> Result<AttachInfo, DriverError>;

    /// Put `filesystem` on the attached device.
    async fn format(&self, id: &VolumeId, filesystem: Filesystem) -> Result<(), DriverError>;

    async fn detach(&self, id: &VolumeId) -> Result<(), DriverError>;
}
