// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use volume_types::VolumeId;

use crate::DriverError;

#[async_trait]
pub trait MountDriver: Send + Sync {
    async fn mount(&self, id: &VolumeId, mount_path: &str) -> Result<(), DriverError>;

    async fn unmount(&self, id: &VolumeId, mount_path: &str) -> Result<(), DriverError>;
}
