// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use volume_contracts::{
    AttachInfo, BlockDriver, DriverError, DriverErrorKind, Enumerator, LifecycleDriver,
    MountDriver, Provisioned, RecoveredState, SnapshotInfo, VolumeReport,
};
use volume_types::{
    CreateOptions, Filesystem, Labels, SnapId, VolumeAlerts, VolumeId, VolumeLocator, VolumeSnap,
    VolumeSpec, VolumeStats, VolumeStatus,
};

/// Operations whose outcome can be scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Delete,
    Snapshot,
    SnapDelete,
    Attach,
    Format,
    Detach,
    Mount,
    Unmount,
    Recover,
    Inspect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(VolumeId, String),
    Delete(VolumeId),
    Snapshot(VolumeId, SnapId),
    SnapDelete(SnapId),
    Attach(VolumeId),
    Format(VolumeId, Filesystem),
    Detach(VolumeId),
    Mount(VolumeId, String),
    Unmount(VolumeId, String),
    Stats(VolumeId),
    Alerts(VolumeId),
    Recover(VolumeId),
    Inspect(Vec<VolumeId>),
    Shutdown,
}

/// What a scripted operation does once it is called.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(DriverError),
    /// Succeed after sleeping.
    Delay(Duration),
    /// Never return.
    Hang,
    Panic(String),
}

#[derive(Debug, Default)]
struct Backend {
    volumes: HashMap<VolumeId, VolumeSpec>,
    snaps: HashMap<SnapId, VolumeId>,
    devices: HashMap<VolumeId, String>,
    next_device: u8,
}

/// Scriptable in-memory driver implementing every capability.
#[derive(Clone)]
pub struct FakeDriver {
    calls: Arc<Mutex<Vec<Call>>>,
    behaviors: Arc<Mutex<HashMap<Op, Behavior>>>,
    backend: Arc<Mutex<Backend>>,
    recovered: Arc<Mutex<RecoveredState>>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            behaviors: Arc::new(Mutex::new(HashMap::new())),
            backend: Arc::new(Mutex::new(Backend::default())),
            recovered: Arc::new(Mutex::new(RecoveredState::available())),
        }
    }
}

impl FakeDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script `op`; the behavior sticks until replaced.
    pub fn set_result(&self, op: Op, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(op, behavior);
    }

    pub fn fail(&self, op: Op, kind: DriverErrorKind, message: &str) {
        self.set_result(op, Behavior::Fail(DriverError::new(kind, message)));
    }

    pub fn reset(&self, op: Op) {
        self.behaviors.lock().unwrap().remove(&op);
    }

    /// State reported by the next recover calls.
    pub fn set_recovered(&self, state: RecoveredState) {
        *self.recovered.lock().unwrap() = state;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Number of recorded calls accepted by `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn has_volume(&self, id: &VolumeId) -> bool {
        self.backend.lock().unwrap().volumes.contains_key(id)
    }

    async fn play(&self, op: Op, call: Call) -> Result<(), DriverError> {
        self.calls.lock().unwrap().push(call);
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&op)
            .cloned()
            .unwrap_or(Behavior::Succeed);

        match behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(err) => Err(err),
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            Behavior::Panic(message) => panic!("{message}"),
        }
    }

    fn report(&self, id: &VolumeId) -> Option<VolumeReport> {
        let backend = self.backend.lock().unwrap();
        let spec = backend.volumes.get(id)?;
        Some(VolumeReport {
            id: id.clone(),
            usage: spec.size,
            format: Filesystem::None,
            status: VolumeStatus::Up,
            replica_set: Vec::new(),
        })
    }
}

#[async_trait]
impl LifecycleDriver for FakeDriver {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create(
        &self,
        id: &VolumeId,
        locator: &VolumeLocator,
        options: &CreateOptions,
        spec: &VolumeSpec,
    ) -> Result<Provisioned, DriverError> {
        self.play(Op::Create, Call::Create(id.clone(), locator.name.clone()))
            .await?;
        self.backend
            .lock()
            .unwrap()
            .volumes
            .insert(id.clone(), spec.clone());
        Ok(Provisioned {
            format: if options.create_from_snap.is_some() {
                spec.format
            } else {
                Filesystem::None
            },
            usage: 0,
            status: VolumeStatus::Up,
            replica_set: Vec::new(),
        })
    }

    async fn delete(&self, id: &VolumeId) -> Result<(), DriverError> {
        self.play(Op::Delete, Call::Delete(id.clone())).await?;
        let mut backend = self.backend.lock().unwrap();
        let snaps = backend.snaps.values().filter(|v| *v == id).count();
        if snaps > 0 {
            return Err(DriverError::new(
                DriverErrorKind::HasSnapshots,
                format!("{snaps} snapshot(s) still reference the volume"),
            ));
        }
        backend.volumes.remove(id);
        Ok(())
    }

    async fn snapshot(
        &self,
        id: &VolumeId,
        snap_id: &SnapId,
        _labels: &Labels,
    ) -> Result<SnapshotInfo, DriverError> {
        self.play(Op::Snapshot, Call::Snapshot(id.clone(), snap_id.clone()))
            .await?;
        let mut backend = self.backend.lock().unwrap();
        let usage = backend.volumes.get(id).map(|s| s.size).unwrap_or_default();
        backend.snaps.insert(snap_id.clone(), id.clone());
        Ok(SnapshotInfo { usage })
    }

    async fn snap_delete(&self, snap_id: &SnapId) -> Result<(), DriverError> {
        self.play(Op::SnapDelete, Call::SnapDelete(snap_id.clone()))
            .await?;
        self.backend.lock().unwrap().snaps.remove(snap_id);
        Ok(())
    }

    async fn stats(&self, id: &VolumeId) -> Result<VolumeStats, DriverError> {
        self.calls.lock().unwrap().push(Call::Stats(id.clone()));
        Ok(VolumeStats {
            reads: 3,
            writes: 5,
            ..Default::default()
        })
    }

    async fn alerts(&self, id: &VolumeId) -> Result<VolumeAlerts, DriverError> {
        self.calls.lock().unwrap().push(Call::Alerts(id.clone()));
        Ok(VolumeAlerts::default())
    }

    async fn recover(&self, id: &VolumeId) -> Result<RecoveredState, DriverError> {
        self.play(Op::Recover, Call::Recover(id.clone())).await?;
        Ok(self.recovered.lock().unwrap().clone())
    }

    async fn shutdown(&self) {
        self.calls.lock().unwrap().push(Call::Shutdown);
    }
}

#[async_trait]
impl BlockDriver for FakeDriver {
    async fn attach(&self, id: &VolumeId) -> Result<AttachInfo, DriverError> {
        self.play(Op::Attach, Call::Attach(id.clone())).await?;
        let mut backend = self.backend.lock().unwrap();
        let letter = (b'b' + backend.next_device) as char;
        backend.next_device += 1;
        let device_path = format!("/dev/xvd{letter}");
        backend.devices.insert(id.clone(), device_path.clone());
        Ok(AttachInfo::device(device_path))
    }

    async fn format(&self, id: &VolumeId, filesystem: Filesystem) -> Result<(), DriverError> {
        self.play(Op::Format, Call::Format(id.clone(), filesystem))
            .await
    }

    async fn detach(&self, id: &VolumeId) -> Result<(), DriverError> {
        self.play(Op::Detach, Call::Detach(id.clone())).await?;
        self.backend.lock().unwrap().devices.remove(id);
        Ok(())
    }
}

#[async_trait]
impl MountDriver for FakeDriver {
    async fn mount(&self, id: &VolumeId, mount_path: &str) -> Result<(), DriverError> {
        self.play(Op::Mount, Call::Mount(id.clone(), mount_path.to_string()))
            .await
    }

    async fn unmount(&self, id: &VolumeId, mount_path: &str) -> Result<(), DriverError> {
        self.play(Op::Unmount, Call::Unmount(id.clone(), mount_path.to_string()))
            .await
    }
}

#[async_trait]
impl Enumerator for FakeDriver {
    async fn inspect(&self, ids: &[VolumeId]) -> Result<Vec<VolumeReport>, DriverError> {
        self.play(Op::Inspect, Call::Inspect(ids.to_vec())).await?;
        Ok(ids.iter().filter_map(|id| self.report(id)).collect())
    }

    async fn enumerate(
        &self,
        _locator: &VolumeLocator,
        _labels: &Labels,
    ) -> Result<Vec<VolumeReport>, DriverError> {
        let ids: Vec<VolumeId> = self.backend.lock().unwrap().volumes.keys().cloned().collect();
        Ok(ids.iter().filter_map(|id| self.report(id)).collect())
    }

    async fn snap_inspect(&self, _ids: &[SnapId]) -> Result<Vec<VolumeSnap>, DriverError> {
        Ok(Vec::new())
    }

    async fn snap_enumerate(
        &self,
        _locator: &VolumeLocator,
        _labels: &Labels,
    ) -> Result<Vec<VolumeSnap>, DriverError> {
        Ok(Vec::new())
    }
}
