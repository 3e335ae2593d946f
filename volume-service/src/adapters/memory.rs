// SPDX-License-Identifier: GPL-3.0-only

//! In-memory backend. Keeps just enough bookkeeping to behave like a real
//! provisioner: device names, mounts, snapshot dependencies and counters.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use volume_contracts::{
    AttachInfo, BlockDriver, DriverError, DriverErrorKind, Enumerator, LifecycleDriver,
    MountDriver, Provisioned, RecoveredState, SnapshotInfo, VolumeReport,
};
use volume_core::LocatorQuery;
use volume_types::{
    Alert, AlertSeverity, CreateOptions, Filesystem, Labels, SnapId, VolumeAlerts, VolumeId,
    VolumeLocator, VolumeSnap, VolumeSpec, VolumeState, VolumeStats, VolumeStatus,
};

/// Device names handed out by attach, in order.
const DEVICE_LETTERS: std::ops::RangeInclusive<u8> = b'b'..=b'z';

#[derive(Debug, Clone)]
struct MemVolume {
    locator: VolumeLocator,
    spec: VolumeSpec,
    format: Filesystem,
    device: Option<String>,
    mount: Option<String>,
    bytes_used: u64,
}

#[derive(Debug, Default)]
struct Store {
    volumes: HashMap<VolumeId, MemVolume>,
    snaps: HashMap<SnapId, VolumeSnap>,
    devices_in_use: Vec<String>,
    stopped: bool,
}

impl Store {
    fn volume(&self, id: &VolumeId) -> Result<&MemVolume, DriverError> {
        self.volumes
            .get(id)
            .ok_or_else(|| DriverError::new(DriverErrorKind::NotFound, format!("no volume {id}")))
    }

    fn volume_mut(&mut self, id: &VolumeId) -> Result<&mut MemVolume, DriverError> {
        self.volumes
            .get_mut(id)
            .ok_or_else(|| DriverError::new(DriverErrorKind::NotFound, format!("no volume {id}")))
    }

    fn next_device(&self) -> Option<String> {
        DEVICE_LETTERS
            .map(|letter| format!("/dev/xvd{}", letter as char))
            .find(|path| !self.devices_in_use.contains(path))
    }

    fn report(id: &VolumeId, volume: &MemVolume) -> VolumeReport {
        VolumeReport {
            id: id.clone(),
            usage: volume.bytes_used,
            format: volume.format,
            status: VolumeStatus::Up,
            replica_set: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct MemoryDriver {
    name: String,
    store: Mutex<Store>,
}

impl MemoryDriver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            store: Mutex::new(Store::default()),
        }
    }

    fn store(&self) -> Result<MutexGuard<'_, Store>, DriverError> {
        let store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        if store.stopped {
            return Err(DriverError::new(
                DriverErrorKind::Busy,
                format!("driver {} is shut down", self.name),
            ));
        }
        Ok(store)
    }
}

/// Locator names may be regular expressions, as in the manager.
fn query(locator: &VolumeLocator, labels: &Labels) -> Result<LocatorQuery, DriverError> {
    LocatorQuery::new(locator, labels)
        .map_err(|e| DriverError::new(DriverErrorKind::InvalidInput, e.to_string()))
}

#[async_trait]
impl LifecycleDriver for MemoryDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create(
        &self,
        id: &VolumeId,
        locator: &VolumeLocator,
        options: &CreateOptions,
        spec: &VolumeSpec,
    ) -> Result<Provisioned, DriverError> {
        if spec.size == 0 {
            return Err(DriverError::new(
                DriverErrorKind::InvalidInput,
                "volume size must be greater than zero",
            ));
        }

        let mut store = self.store()?;
        if store.volumes.contains_key(id) {
            return Err(DriverError::new(
                DriverErrorKind::AlreadyExists,
                format!("volume {id} already provisioned"),
            ));
        }

        // A clone starts with the source's filesystem and data.
        let (format, bytes_used) = match &options.create_from_snap {
            Some(snap_id) => {
                let snap = store.snaps.get(snap_id).ok_or_else(|| {
                    DriverError::new(DriverErrorKind::NotFound, format!("no snapshot {snap_id}"))
                })?;
                let source_format = store
                    .volumes
                    .get(&snap.volume_id)
                    .map(|v| v.format)
                    .unwrap_or(spec.format);
                (source_format, snap.usage)
            }
            None => (Filesystem::None, 0),
        };

        store.volumes.insert(
            id.clone(),
            MemVolume {
                locator: locator.clone(),
                spec: spec.clone(),
                format,
                device: None,
                mount: None,
                bytes_used,
            },
        );
        debug!(volume_id = %id, name = %locator.name, "memory volume provisioned");

        Ok(Provisioned {
            format,
            usage: bytes_used,
            status: VolumeStatus::Up,
            replica_set: Vec::new(),
        })
    }

    async fn delete(&self, id: &VolumeId) -> Result<(), DriverError> {
        let mut store = self.store()?;
        let volume = store.volume(id)?;
        if volume.device.is_some() || volume.mount.is_some() {
            return Err(DriverError::new(
                DriverErrorKind::HasAttachments,
                format!("volume {id} is still attached"),
            ));
        }
        let snaps = store.snaps.values().filter(|s| &s.volume_id == id).count();
        if snaps > 0 {
            return Err(DriverError::new(
                DriverErrorKind::HasSnapshots,
                format!("{snaps} snapshot(s) depend on volume {id}"),
            ));
        }
        store.volumes.remove(id);
        Ok(())
    }

    async fn snapshot(
        &self,
        id: &VolumeId,
        snap_id: &SnapId,
        labels: &Labels,
    ) -> Result<SnapshotInfo, DriverError> {
        let mut store = self.store()?;
        let usage = store.volume(id)?.bytes_used;
        store.snaps.insert(
            snap_id.clone(),
            VolumeSnap {
                id: snap_id.clone(),
                volume_id: id.clone(),
                snap_labels: labels.clone(),
                ctime: Utc::now(),
                usage,
            },
        );
        Ok(SnapshotInfo { usage })
    }

    async fn snap_delete(&self, snap_id: &SnapId) -> Result<(), DriverError> {
        self.store()?
            .snaps
            .remove(snap_id)
            .map(|_| ())
            .ok_or_else(|| DriverError::new(DriverErrorKind::NotFound, format!("no snapshot {snap_id}")))
    }

    async fn stats(&self, id: &VolumeId) -> Result<VolumeStats, DriverError> {
        let store = self.store()?;
        let volume = store.volume(id)?;
        Ok(VolumeStats {
            bytes_used: volume.bytes_used,
            ..Default::default()
        })
    }

    async fn alerts(&self, id: &VolumeId) -> Result<VolumeAlerts, DriverError> {
        let store = self.store()?;
        let volume = store.volume(id)?;
        let mut alerts = VolumeAlerts::default();
        if volume.spec.size > 0 && volume.bytes_used * 10 >= volume.spec.size * 9 {
            alerts.alerts.push(Alert {
                severity: AlertSeverity::Warning,
                message: format!("volume {id} is over 90% full"),
                timestamp: Utc::now(),
            });
        }
        Ok(alerts)
    }

    async fn recover(&self, id: &VolumeId) -> Result<RecoveredState, DriverError> {
        let store = self.store()?;
        let volume = store.volume(id)?;
        let state = match (&volume.device, &volume.mount) {
            (_, Some(_)) => VolumeState::Mounted,
            (Some(_), None) => VolumeState::Attached,
            (None, None) => VolumeState::Available,
        };
        Ok(RecoveredState {
            state,
            device_path: volume.device.clone(),
            attach_path: volume.mount.clone(),
        })
    }

    async fn shutdown(&self) {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        store.stopped = true;
        debug!(driver = %self.name, volumes = store.volumes.len(), "memory driver stopped");
    }
}

#[async_trait]
impl BlockDriver for MemoryDriver {
    async fn attach(&self, id: &VolumeId) -> Result<AttachInfo, DriverError> {
        let mut store = self.store()?;
        if store.volume(id)?.device.is_some() {
            return Err(DriverError::new(
                DriverErrorKind::AlreadyAttached,
                format!("volume {id} is already attached"),
            ));
        }
        let device = store.next_device().ok_or_else(|| {
            DriverError::new(DriverErrorKind::Busy, "no free device names left")
        })?;
        store.devices_in_use.push(device.clone());
        store.volume_mut(id)?.device = Some(device.clone());
        Ok(AttachInfo::device(device))
    }

    async fn format(&self, id: &VolumeId, filesystem: Filesystem) -> Result<(), DriverError> {
        let mut store = self.store()?;
        let volume = store.volume_mut(id)?;
        if volume.device.is_none() {
            return Err(DriverError::new(
                DriverErrorKind::NotAttached,
                format!("volume {id} is not attached"),
            ));
        }
        volume.format = filesystem;
        // Filesystem metadata.
        volume.bytes_used = volume.spec.size / 100;
        Ok(())
    }

    async fn detach(&self, id: &VolumeId) -> Result<(), DriverError> {
        let mut store = self.store()?;
        let device = store.volume_mut(id)?.device.take().ok_or_else(|| {
            DriverError::new(DriverErrorKind::NotAttached, format!("volume {id} is not attached"))
        })?;
        store.devices_in_use.retain(|d| d != &device);
        Ok(())
    }
}

#[async_trait]
impl MountDriver for MemoryDriver {
    async fn mount(&self, id: &VolumeId, mount_path: &str) -> Result<(), DriverError> {
        let mut store = self.store()?;
        if store
            .volumes
            .values()
            .any(|v| v.mount.as_deref() == Some(mount_path))
        {
            return Err(DriverError::new(
                DriverErrorKind::Busy,
                format!("{mount_path} is already a mount point"),
            ));
        }
        store.volume_mut(id)?.mount = Some(mount_path.to_string());
        Ok(())
    }

    async fn unmount(&self, id: &VolumeId, mount_path: &str) -> Result<(), DriverError> {
        let mut store = self.store()?;
        let volume = store.volume_mut(id)?;
        if volume.mount.as_deref() != Some(mount_path) {
            return Err(DriverError::new(
                DriverErrorKind::InvalidInput,
                format!("volume {id} is not mounted at {mount_path}"),
            ));
        }
        volume.mount = None;
        Ok(())
    }
}

#[async_trait]
impl Enumerator for MemoryDriver {
    async fn inspect(&self, ids: &[VolumeId]) -> Result<Vec<VolumeReport>, DriverError> {
        let store = self.store()?;
        Ok(ids
            .iter()
            .filter_map(|id| store.volumes.get(id).map(|v| Store::report(id, v)))
            .collect())
    }

    async fn enumerate(
        &self,
        locator: &VolumeLocator,
        labels: &Labels,
    ) -> Result<Vec<VolumeReport>, DriverError> {
        let query = query(locator, labels)?;
        let store = self.store()?;
        Ok(store
            .volumes
            .iter()
            .filter(|(_, v)| query.matches_parts(&v.locator, &v.spec.config_labels))
            .map(|(id, v)| Store::report(id, v))
            .collect())
    }

    async fn snap_inspect(&self, ids: &[SnapId]) -> Result<Vec<VolumeSnap>, DriverError> {
        let store = self.store()?;
        Ok(ids.iter().filter_map(|id| store.snaps.get(id).cloned()).collect())
    }

    async fn snap_enumerate(
        &self,
        locator: &VolumeLocator,
        labels: &Labels,
    ) -> Result<Vec<VolumeSnap>, DriverError> {
        // Delete refuses volumes with snapshots, so every source is present.
        let snap_query = query(&VolumeLocator::default(), labels)?;
        let source_query = query(locator, &Labels::new())?;
        let store = self.store()?;
        Ok(store
            .snaps
            .values()
            .filter(|s| snap_query.matches_parts(&VolumeLocator::default(), &s.snap_labels))
            .filter(|s| {
                store
                    .volumes
                    .get(&s.volume_id)
                    .is_some_and(|v| source_query.matches_locator(&v.locator))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> VolumeSpec {
        VolumeSpec {
            size: 1 << 30,
            format: Filesystem::Ext4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn devices_are_allocated_and_released() {
        let driver = MemoryDriver::new("mem");
        let (a, b) = (VolumeId::from("a"), VolumeId::from("b"));
        for id in [&a, &b] {
            driver
                .create(id, &VolumeLocator::named(id.as_str()), &CreateOptions::default(), &spec())
                .await
                .unwrap();
        }

        assert_eq!(driver.attach(&a).await.unwrap().device_path, "/dev/xvdb");
        assert_eq!(driver.attach(&b).await.unwrap().device_path, "/dev/xvdc");
        driver.detach(&a).await.unwrap();
        assert_eq!(driver.attach(&a).await.unwrap().device_path, "/dev/xvdb");

        let err = driver.attach(&a).await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::AlreadyAttached);
    }

    #[tokio::test]
    async fn delete_is_refused_while_dependents_exist() {
        let driver = MemoryDriver::new("mem");
        let id = VolumeId::from("a");
        driver
            .create(&id, &VolumeLocator::named("a"), &CreateOptions::default(), &spec())
            .await
            .unwrap();
        let snap = SnapId::from("snap-1");
        driver.snapshot(&id, &snap, &Labels::new()).await.unwrap();

        let err = driver.delete(&id).await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::HasSnapshots);

        driver.snap_delete(&snap).await.unwrap();
        driver.attach(&id).await.unwrap();
        let err = driver.delete(&id).await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::HasAttachments);

        driver.detach(&id).await.unwrap();
        driver.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn recover_reports_what_the_backend_holds() {
        let driver = MemoryDriver::new("mem");
        let id = VolumeId::from("a");
        driver
            .create(&id, &VolumeLocator::named("a"), &CreateOptions::default(), &spec())
            .await
            .unwrap();
        driver.attach(&id).await.unwrap();
        driver.format(&id, Filesystem::Ext4).await.unwrap();
        driver.mount(&id, "/mnt/a").await.unwrap();

        let found = driver.recover(&id).await.unwrap();
        assert_eq!(found.state, VolumeState::Mounted);
        assert_eq!(found.device_path.as_deref(), Some("/dev/xvdb"));
        assert_eq!(found.attach_path.as_deref(), Some("/mnt/a"));
    }

    async fn provision(driver: &MemoryDriver, name: &str, tier: &str) -> VolumeId {
        let id = VolumeId::from(name);
        let mut spec = spec();
        spec.config_labels.insert("tier".to_string(), tier.to_string());
        driver
            .create(&id, &VolumeLocator::named(name), &CreateOptions::default(), &spec)
            .await
            .unwrap();
        id
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn enumerate_accepts_name_patterns_and_config_labels() {
        let driver = MemoryDriver::new("mem");
        provision(&driver, "db1", "gold").await;
        provision(&driver, "db2", "silver").await;
        provision(&driver, "cache", "gold").await;

        let mut names: Vec<_> = driver
            .enumerate(&VolumeLocator::named("db.*"), &Labels::new())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["db1", "db2"]);

        let gold = driver
            .enumerate(&VolumeLocator::named("db.*"), &labels(&[("tier", "gold")]))
            .await
            .unwrap();
        assert_eq!(gold.len(), 1);
        assert_eq!(gold[0].id.as_str(), "db1");

        let all = driver
            .enumerate(&VolumeLocator::default(), &Labels::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let err = driver
            .enumerate(&VolumeLocator::named("db("), &Labels::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn snapshots_are_found_by_source_and_own_labels() {
        let driver = MemoryDriver::new("mem");
        let db1 = provision(&driver, "db1", "gold").await;
        let cache = provision(&driver, "cache", "gold").await;
        let nightly = labels(&[("schedule", "nightly")]);
        driver
            .snapshot(&db1, &SnapId::from("s1"), &nightly)
            .await
            .unwrap();
        driver
            .snapshot(&db1, &SnapId::from("s2"), &Labels::new())
            .await
            .unwrap();
        driver
            .snapshot(&cache, &SnapId::from("s3"), &nightly)
            .await
            .unwrap();

        let found = driver
            .snap_enumerate(&VolumeLocator::named("db[0-9]"), &nightly)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id.as_str(), "s1");

        let found = driver
            .snap_enumerate(&VolumeLocator::default(), &nightly)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);

        let inspected = driver
            .snap_inspect(&[SnapId::from("s2"), SnapId::from("gone")])
            .await
            .unwrap();
        assert_eq!(inspected.len(), 1);
        assert_eq!(inspected[0].volume_id, db1);
    }

    #[tokio::test]
    async fn shut_down_driver_refuses_work() {
        let driver = MemoryDriver::new("mem");
        driver.shutdown().await;
        let err = driver
            .create(&VolumeId::from("a"), &VolumeLocator::named("a"), &CreateOptions::default(), &spec())
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Busy);
    }
}
