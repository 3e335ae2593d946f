// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use volume_types::{Labels, SnapId, VolumeId, VolumeLocator, VolumeSnap};

use crate::{DriverError, VolumeReport};

/// Lists what the backend itself has provisioned.
///
/// The manager answers inspect and enumerate requests from its registry; this
/// capability is only used to refresh driver reported fields.
#[async_trait]
pub trait Enumerator: Send + Sync {
    async fn inspect(&self, ids: &[VolumeId]) -> Result<Vec<VolumeReport>, DriverError>;

    /// Locator fields may be regular expressions; blank fields match everything.
    async fn enumerate(
        &self,
        locator: &VolumeLocator,
        labels: &Labels,
    ) -> Result<Vec<VolumeReport>, DriverError>;

    async fn snap_inspect(&self, ids: &[SnapId]) -> Result<Vec<VolumeSnap>, DriverError>;

    async fn snap_enumerate(
        &self,
        locator: &VolumeLocator,
        labels: &Labels,
    ) -> Result<Vec<VolumeSnap>, DriverError>;
}
