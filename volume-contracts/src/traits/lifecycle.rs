// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use volume_types::{
    CreateOptions, Labels, SnapId, VolumeAlerts, VolumeId, VolumeLocator, VolumeSpec, VolumeStats,
};

use crate::{DriverError, Provisioned, RecoveredState, SnapshotInfo};

/// Basic lifecycle operations every provisioning backend offers.
#[async_trait]
pub trait LifecycleDriver: Send + Sync {
    /// Short description of this driver.
    fn name(&self) -> &str;

    /// Provision storage for `id`. The identifier is allocated by the caller.
    async fn create(
        &self,
        id: &VolumeId,
        locator: &VolumeLocator,
        options: &CreateOptions,
        spec: &VolumeSpec,
    ) -> Result<Provisioned, DriverError>;

    /// Release the storage behind `id`.
    ///
    /// Drivers report `HasSnapshots` when their retention policy forbids
    /// deleting a volume that still has snapshots.
    async fn delete(&self, id: &VolumeId) -> Result<(), DriverError>;

    /// Capture `id` into `snap_id`. I/O should be quiesced by the caller.
    async fn snapshot(
        &self,
        id: &VolumeId,
        snap_id: &SnapId,
        labels: &Labels,
    ) -> Result<SnapshotInfo, DriverError>;

    async fn snap_delete(&self, snap_id: &SnapId) -> Result<(), DriverError>;

    async fn stats(&self, id: &VolumeId) -> Result<VolumeStats, DriverError>;

    async fn alerts(&self, id: &VolumeId) -> Result<VolumeAlerts, DriverError>;

    /// Inspect a volume left in `Error` and report its real state.
    async fn recover(&self, id: &VolumeId) -> Result<RecoveredState, DriverError> {
        let _ = id;
        Err(DriverError::unsupported("recover"))
    }

    /// Shutdown and cleanup.
    async fn shutdown(&self);
}
