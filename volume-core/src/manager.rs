// SPDX-License-Identifier: GPL-3.0-only

//! The lifecycle manager.
//!
//! Every state-changing call follows the same discipline:
//!
//! 1. probe the driver capability (fails with `Unsupported` before any lock),
//! 2. resolve the registry entry,
//! 3. take the volume's exclusive lock,
//! 4. re-check the transition guard under the lock,
//! 5. call the driver,
//! 6. commit the new state, roll back, or record `Error`,
//! 7. release the lock.
//!
//! Steps 2 to 7 run on a spawned task that owns the lock guard, so a caller
//! that gives up on its future cannot leave a volume half way through a
//! transition.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use enumflags2::BitFlags;
use tracing::{debug, info, warn};
use volume_contracts::{
    AttachInfo, BlockDriver, Capability, DriverError, DriverErrorKind, DriverHandle, Enumerator,
    LifecycleDriver, MountDriver, Provisioned, RecoveredState,
};
use volume_types::{
    CreateOptions, Labels, SnapId, Volume, VolumeAlerts, VolumeId, VolumeLocator, VolumeSnap,
    VolumeSpec, VolumeState, VolumeStats,
};

use crate::config::ManagerConfig;
use crate::dispatch::{self, Failure};
use crate::error::{Result, VolumeError};
use crate::locks::VolumeGuard;
use crate::matcher::LocatorQuery;
use crate::registry::{CreateClaim, Registry};
use crate::state::{self, Backing, Event, Rejection};

struct Shared {
    driver: DriverHandle,
    registry: Registry,
    config: ManagerConfig,
}

/// Result of a committed transition. Dropping it releases the volume lock.
struct Committed<R> {
    output: R,
    _guard: VolumeGuard,
}

/// Concurrency-safe lifecycle manager for the volumes of one driver.
///
/// Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Manager {
    shared: Arc<Shared>,
}

fn apply_provisioned(volume: &mut Volume, provisioned: Provisioned) {
    volume.format = provisioned.format;
    volume.usage = provisioned.usage;
    volume.status = provisioned.status;
    volume.replica_set = provisioned.replica_set;
}

fn reject(id: &VolumeId, state: VolumeState, event: Event, rejection: Rejection) -> VolumeError {
    match rejection {
        Rejection::AlreadyAttached => VolumeError::AlreadyAttached(id.clone()),
        Rejection::NotAttached => VolumeError::NotAttached(id.clone()),
        Rejection::InvalidState(reason) => VolumeError::InvalidState {
            id: id.clone(),
            state,
            event,
            reason: reason.to_string(),
        },
    }
}

fn no_guard(_: &Volume) -> Result<()> {
    Ok(())
}

impl Manager {
    pub fn new(driver: DriverHandle, config: ManagerConfig) -> Self {
        info!(
            driver = driver.name(),
            capabilities = ?driver.capabilities(),
            "volume manager ready"
        );
        Self {
            shared: Arc::new(Shared {
                driver,
                registry: Registry::new(),
                config,
            }),
        }
    }

    pub fn driver_name(&self) -> &str {
        self.shared.driver.name()
    }

    pub fn capabilities(&self) -> BitFlags<Capability> {
        self.shared.driver.capabilities()
    }

    fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    fn timeout(&self) -> Option<Duration> {
        self.shared.config.driver_timeout
    }

    fn backing(&self) -> Backing {
        if self.shared.driver.supports(Capability::Block) {
            Backing::Block
        } else {
            Backing::File
        }
    }

    fn lifecycle(&self, operation: &'static str) -> Result<Arc<dyn LifecycleDriver>> {
        self.shared
            .driver
            .lifecycle()
            .ok_or(VolumeError::Unsupported {
                capability: Capability::Lifecycle,
                operation,
            })
    }

    fn block(&self, operation: &'static str) -> Result<Arc<dyn BlockDriver>> {
        self.shared.driver.block().ok_or(VolumeError::Unsupported {
            capability: Capability::Block,
            operation,
        })
    }

    fn mounter(&self, operation: &'static str) -> Result<Arc<dyn MountDriver>> {
        self.shared.driver.mount().ok_or(VolumeError::Unsupported {
            capability: Capability::Mount,
            operation,
        })
    }

    fn enumerator(&self, operation: &'static str) -> Result<Arc<dyn Enumerator>> {
        self.shared
            .driver
            .enumerator()
            .ok_or(VolumeError::Unsupported {
                capability: Capability::Enumerate,
                operation,
            })
    }

    /// Run a locked section on its own task so it always reaches a decision.
    async fn run<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match tokio::spawn(task).await {
            Ok(result) => result,
            Err(e) => Err(VolumeError::Internal(format!("lifecycle task aborted: {e}"))),
        }
    }

    /// Record a failed driver call and translate it for the caller.
    ///
    /// The error record is only written when the volume enters `Error`, so
    /// it keeps describing that failure across later refused calls.
    fn fail(&self, id: &VolumeId, from: VolumeState, event: Event, failure: Failure) -> VolumeError {
        let side_branch = matches!(event, Event::Snapshot | Event::SnapDelete);

        if side_branch || failure.is_recoverable() {
            let err = failure.error();
            self.registry().update(id, |volume| volume.state = from);
            warn!(
                volume_id = %id,
                %event,
                state = %from,
                error = %err,
                "driver refused operation, state unchanged"
            );
        } else {
            let err = failure.error();
            self.registry().update(id, |volume| {
                if from != VolumeState::Error {
                    volume.prior_state = Some(from);
                }
                volume.state = VolumeState::Error;
                volume.error_num = err.code();
                volume.error_string = err.message.clone();
            });
            warn!(
                volume_id = %id,
                %event,
                from = %from,
                error = %err,
                "driver call failed, volume moved to error state"
            );
        }

        VolumeError::from_driver(id, event.as_str(), event.capability(), failure.into_error())
    }

    /// Drive one transition of an existing volume under its lock.
    ///
    /// `guard` runs after the state check with the lock held, `call` issues
    /// the driver request and `apply` copies its result onto the record
    /// (after the new state is set, so it may refine it).
    async fn transact<R, G, C, Fut, A>(
        &self,
        id: &VolumeId,
        event: Event,
        guard: G,
        call: C,
        apply: A,
    ) -> Result<Committed<R>>
    where
        G: FnOnce(&Volume) -> Result<()>,
        C: FnOnce(Volume) -> Fut,
        Fut: Future<Output = std::result::Result<R, DriverError>>,
        A: FnOnce(&mut Volume, &R),
    {
        let lock = self
            .registry()
            .lock_for(id)
            .ok_or_else(|| VolumeError::NotFound(id.clone()))?;
        let lock_guard = lock.lock_owned().await;
        debug!(volume_id = %id, %event, "volume lock acquired");

        // The volume may have changed or vanished while we waited.
        let current = self
            .registry()
            .get(id)
            .ok_or_else(|| VolumeError::NotFound(id.clone()))?;
        let transition = state::plan(current.state, event, self.backing())
            .map_err(|rejection| reject(id, current.state, event, rejection))?;
        guard(&current)?;

        if let Some(in_flight) = transition.in_flight {
            self.registry().update(id, |volume| volume.state = in_flight);
        }

        let from = current.state;
        match dispatch::call(event.as_str(), self.timeout(), call(current)).await {
            Ok(output) => {
                if transition.to == VolumeState::Deleted {
                    self.registry().remove(id);
                } else {
                    self.registry().update(id, |volume| {
                        volume.state = transition.to;
                        if transition.to != VolumeState::Error {
                            volume.prior_state = None;
                            volume.error_num = 0;
                            volume.error_string.clear();
                        }
                        apply(volume, &output);
                    });
                }
                if transition.changes_state() {
                    info!(volume_id = %id, %event, %from, to = %transition.to, "transition committed");
                } else {
                    debug!(volume_id = %id, %event, state = %from, "operation committed");
                }
                Ok(Committed {
                    output,
                    _guard: lock_guard,
                })
            }
            Err(failure) => Err(self.fail(id, from, event, failure)),
        }
    }

    /// Create a volume, or hand back an equal one that already exists.
    ///
    /// With `options.fail_if_exists` any volume with an equal locator makes
    /// the call fail with `AlreadyExists`. Otherwise an available volume that
    /// matches under the configured reuse policy is returned without calling
    /// the driver.
    pub async fn create(
        &self,
        locator: VolumeLocator,
        options: CreateOptions,
        spec: VolumeSpec,
    ) -> Result<VolumeId> {
        let lifecycle = self.lifecycle("create")?;
        let this = self.clone();
        self.run(async move { this.create_locked(lifecycle, locator, options, spec).await })
            .await
    }

    async fn create_locked(
        &self,
        lifecycle: Arc<dyn LifecycleDriver>,
        locator: VolumeLocator,
        options: CreateOptions,
        spec: VolumeSpec,
    ) -> Result<VolumeId> {
        if let Some(snap_id) = &options.create_from_snap
            && self.registry().get_snap(snap_id).is_none()
        {
            return Err(VolumeError::SnapNotFound(snap_id.clone()));
        }

        loop {
            let claim = self.registry().claim_create(
                VolumeId::generate(),
                &locator,
                &spec,
                options.fail_if_exists,
                self.shared.config.reuse_policy,
            )?;

            match claim {
                CreateClaim::Reuse(id) => {
                    debug!(volume_id = %id, name = %locator.name, "reusing existing volume");
                    return Ok(id);
                }
                CreateClaim::InFlight(id) => {
                    debug!(volume_id = %id, "waiting for an equal create in flight");
                    if let Some(lock) = self.registry().lock_for(&id) {
                        drop(lock.lock_owned().await);
                    }
                }
                CreateClaim::Retry(id) => {
                    match self.retry_create(lifecycle.clone(), &id, &options).await {
                        Ok(()) => return Ok(id),
                        // Lost a race with delete or recover; look again.
                        Err(VolumeError::NotFound(_)) if !self.registry().contains(&id) => {}
                        Err(VolumeError::InvalidState { .. }) => {}
                        Err(e) => return Err(e),
                    }
                }
                CreateClaim::New(id, guard) => {
                    return self
                        .provision(lifecycle, id, guard, &locator, &options, &spec)
                        .await;
                }
            }
        }
    }

    async fn provision(
        &self,
        lifecycle: Arc<dyn LifecycleDriver>,
        id: VolumeId,
        guard: VolumeGuard,
        locator: &VolumeLocator,
        options: &CreateOptions,
        spec: &VolumeSpec,
    ) -> Result<VolumeId> {
        let result = dispatch::call(
            "create",
            self.timeout(),
            lifecycle.create(&id, locator, options, spec),
        )
        .await;

        match result {
            Ok(provisioned) => {
                self.registry().update(&id, |volume| {
                    volume.state = VolumeState::Available;
                    apply_provisioned(volume, provisioned);
                });
                info!(volume_id = %id, name = %locator.name, size = spec.size, "volume created");
                drop(guard);
                Ok(id)
            }
            Err(Failure::Returned(err)) => {
                self.registry().remove(&id);
                warn!(volume_id = %id, name = %locator.name, error = %err, "create failed, entry discarded");
                Err(VolumeError::from_driver(&id, "create", Capability::Lifecycle, err))
            }
            Err(failure) => Err(self.fail(&id, VolumeState::Pending, Event::Create, failure)),
        }
    }

    async fn retry_create(
        &self,
        lifecycle: Arc<dyn LifecycleDriver>,
        id: &VolumeId,
        options: &CreateOptions,
    ) -> Result<()> {
        let options = options.clone();
        self.transact(
            id,
            Event::Create,
            |volume| match volume.prior_state {
                Some(VolumeState::Pending) => Ok(()),
                _ => Err(VolumeError::InvalidState {
                    id: volume.id.clone(),
                    state: volume.state,
                    event: Event::Create,
                    reason: "volume did not fail during create".to_string(),
                }),
            },
            move |volume| async move {
                lifecycle
                    .create(&volume.id, &volume.locator, &options, &volume.spec)
                    .await
            },
            |volume, provisioned: &Provisioned| apply_provisioned(volume, provisioned.clone()),
        )
        .await
        .map(|_| ())
    }

    /// Delete an available volume, or force-delete one in `Error`.
    ///
    /// A force-delete the backend answers with `NotFound` still removes the
    /// entry: the volume may never have been provisioned.
    pub async fn delete(&self, id: &VolumeId) -> Result<()> {
        let lifecycle = self.lifecycle("delete")?;
        let this = self.clone();
        let id = id.clone();
        self.run(async move {
            this.transact(
                &id,
                Event::Delete,
                no_guard,
                move |volume| async move {
                    match lifecycle.delete(&volume.id).await {
                        Err(err)
                            if volume.state == VolumeState::Error
                                && err.kind == DriverErrorKind::NotFound =>
                        {
                            debug!(volume_id = %volume.id, "backend has no such volume, dropping entry");
                            Ok(())
                        }
                        other => other,
                    }
                },
                |_, _| {},
            )
            .await
            .map(|_| ())
        })
        .await
    }

    /// Snapshot a volume without changing its state.
    ///
    /// Serialized against other lifecycle operations on the volume, but not
    /// against writers: I/O should be quiesced by the caller.
    pub async fn snapshot(&self, id: &VolumeId, labels: Labels) -> Result<SnapId> {
        let lifecycle = self.lifecycle("snapshot")?;
        let this = self.clone();
        let id = id.clone();
        self.run(async move {
            let snap_id = SnapId::generate();
            let call_snap_id = snap_id.clone();
            let call_labels = labels.clone();
            let committed = this
                .transact(
                    &id,
                    Event::Snapshot,
                    no_guard,
                    move |volume| async move {
                        lifecycle
                            .snapshot(&volume.id, &call_snap_id, &call_labels)
                            .await
                    },
                    |_, _| {},
                )
                .await?;

            this.registry().insert_snap(VolumeSnap {
                id: snap_id.clone(),
                volume_id: id.clone(),
                snap_labels: labels,
                ctime: Utc::now(),
                usage: committed.output.usage,
            });
            info!(volume_id = %id, snap_id = %snap_id, "snapshot recorded");
            Ok(snap_id)
        })
        .await
    }

    pub async fn snap_delete(&self, snap_id: &SnapId) -> Result<()> {
        let lifecycle = self.lifecycle("snap-delete")?;
        let this = self.clone();
        let snap_id = snap_id.clone();
        self.run(async move { this.snap_delete_locked(lifecycle, snap_id).await })
            .await
    }

    async fn snap_delete_locked(
        &self,
        lifecycle: Arc<dyn LifecycleDriver>,
        snap_id: SnapId,
    ) -> Result<()> {
        // The request names a snapshot; so does any not-found answer.
        let not_found = |err: VolumeError| match err {
            VolumeError::NotFound(_) => VolumeError::SnapNotFound(snap_id.clone()),
            err => err,
        };

        let snap = self
            .registry()
            .get_snap(&snap_id)
            .ok_or_else(|| VolumeError::SnapNotFound(snap_id.clone()))?;

        if self.registry().contains(&snap.volume_id) {
            let call_snap_id = snap_id.clone();
            let committed = self
                .transact(
                    &snap.volume_id,
                    Event::SnapDelete,
                    |_| match self.registry().get_snap(&snap_id) {
                        Some(_) => Ok(()),
                        None => Err(VolumeError::SnapNotFound(snap_id.clone())),
                    },
                    move |_| async move { lifecycle.snap_delete(&call_snap_id).await },
                    |_, _| {},
                )
                .await
                .map_err(not_found)?;
            self.registry().remove_snap(&snap_id);
            drop(committed);
        } else {
            // Source volume is gone, so there is no volume lock to take.
            // Claim the record first so concurrent deletes cannot both run.
            let snap = self
                .registry()
                .remove_snap(&snap_id)
                .ok_or_else(|| VolumeError::SnapNotFound(snap_id.clone()))?;
            if let Err(failure) =
                dispatch::call("snap-delete", self.timeout(), lifecycle.snap_delete(&snap_id)).await
            {
                let volume_id = snap.volume_id.clone();
                self.registry().insert_snap(snap);
                return Err(not_found(VolumeError::from_driver(
                    &volume_id,
                    "snap-delete",
                    Capability::Lifecycle,
                    failure.into_error(),
                )));
            }
        }

        info!(snap_id = %snap_id, volume_id = %snap.volume_id, "snapshot deleted");
        Ok(())
    }

    /// Attach the volume and return the device path the driver exported.
    pub async fn attach(&self, id: &VolumeId) -> Result<String> {
        let block = self.block("attach")?;
        let this = self.clone();
        let id = id.clone();
        self.run(async move {
            let committed = this
                .transact(
                    &id,
                    Event::Attach,
                    no_guard,
                    move |volume| async move { block.attach(&volume.id).await },
                    |volume, info: &AttachInfo| {
                        volume.device_path = Some(info.device_path.clone());
                        volume.attached_on = info.attached_on.clone();
                    },
                )
                .await?;
            Ok(committed.output.device_path)
        })
        .await
    }

    /// Format an attached volume with the filesystem named in its spec.
    pub async fn format(&self, id: &VolumeId) -> Result<()> {
        let block = self.block("format")?;
        let this = self.clone();
        let id = id.clone();
        self.run(async move {
            this.transact(
                &id,
                Event::Format,
                |volume| {
                    if volume.spec.format.is_none() {
                        return Err(VolumeError::InvalidArgument(format!(
                            "volume {} has no filesystem in its spec",
                            volume.id
                        )));
                    }
                    Ok(())
                },
                move |volume| async move { block.format(&volume.id, volume.spec.format).await },
                |volume, _| volume.format = volume.spec.format,
            )
            .await
            .map(|_| ())
        })
        .await
    }

    pub async fn detach(&self, id: &VolumeId) -> Result<()> {
        let block = self.block("detach")?;
        let this = self.clone();
        let id = id.clone();
        self.run(async move {
            this.transact(
                &id,
                Event::Detach,
                no_guard,
                move |volume| async move { block.detach(&volume.id).await },
                |volume, _| {
                    volume.device_path = None;
                    volume.attached_on = None;
                },
            )
            .await
            .map(|_| ())
        })
        .await
    }

    pub async fn mount(&self, id: &VolumeId, mount_path: &str) -> Result<()> {
        let mounter = self.mounter("mount")?;
        if mount_path.is_empty() {
            return Err(VolumeError::InvalidArgument("mount path is empty".to_string()));
        }

        let backing = self.backing();
        let this = self.clone();
        let id = id.clone();
        let path = mount_path.to_string();
        self.run(async move {
            let call_path = path.clone();
            this.transact(
                &id,
                Event::Mount,
                |volume| {
                    if backing == Backing::Block && volume.format.is_none() {
                        return Err(VolumeError::InvalidState {
                            id: volume.id.clone(),
                            state: volume.state,
                            event: Event::Mount,
                            reason: "volume has no filesystem".to_string(),
                        });
                    }
                    Ok(())
                },
                move |volume| async move { mounter.mount(&volume.id, &call_path).await },
                |volume, _| volume.attach_path = Some(path),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    pub async fn unmount(&self, id: &VolumeId, mount_path: &str) -> Result<()> {
        let mounter = self.mounter("unmount")?;
        let this = self.clone();
        let id = id.clone();
        let path = mount_path.to_string();
        self.run(async move {
            let call_path = path.clone();
            this.transact(
                &id,
                Event::Unmount,
                |volume| match volume.attach_path.as_deref() {
                    Some(current) if current == path => Ok(()),
                    current => Err(VolumeError::InvalidArgument(format!(
                        "volume {} is mounted at {}, not {}",
                        volume.id,
                        current.unwrap_or("<nowhere>"),
                        path
                    ))),
                },
                move |volume| async move { mounter.unmount(&volume.id, &call_path).await },
                |volume, _| volume.attach_path = None,
            )
            .await
            .map(|_| ())
        })
        .await
    }

    /// Ask the driver for the real state of a volume in `Error` and adopt it.
    pub async fn recover(&self, id: &VolumeId) -> Result<VolumeState> {
        let lifecycle = self.lifecycle("recover")?;
        let this = self.clone();
        let id = id.clone();
        self.run(async move {
            let committed = this
                .transact(
                    &id,
                    Event::Recover,
                    no_guard,
                    move |volume| async move {
                        let found = lifecycle.recover(&volume.id).await?;
                        match found.state {
                            VolumeState::Available | VolumeState::Attached | VolumeState::Mounted => {
                                Ok(found)
                            }
                            other => Err(DriverError::internal(format!(
                                "driver reported unusable state {other} during recovery"
                            ))),
                        }
                    },
                    |volume, found: &RecoveredState| {
                        volume.state = found.state;
                        volume.device_path = found.device_path.clone();
                        volume.attach_path = found.attach_path.clone();
                    },
                )
                .await?;
            Ok(committed.output.state)
        })
        .await
    }

    pub async fn stats(&self, id: &VolumeId) -> Result<VolumeStats> {
        let lifecycle = self.lifecycle("stats")?;
        if !self.registry().contains(id) {
            return Err(VolumeError::NotFound(id.clone()));
        }
        dispatch::call("stats", self.timeout(), lifecycle.stats(id))
            .await
            .map_err(|failure| {
                VolumeError::from_driver(id, "stats", Capability::Lifecycle, failure.into_error())
            })
    }

    pub async fn alerts(&self, id: &VolumeId) -> Result<VolumeAlerts> {
        let lifecycle = self.lifecycle("alerts")?;
        if !self.registry().contains(id) {
            return Err(VolumeError::NotFound(id.clone()));
        }
        dispatch::call("alerts", self.timeout(), lifecycle.alerts(id))
            .await
            .map_err(|failure| {
                VolumeError::from_driver(id, "alerts", Capability::Lifecycle, failure.into_error())
            })
    }

    /// Copies of the requested volumes, in request order.
    pub fn inspect(&self, ids: &[VolumeId]) -> Result<Vec<Volume>> {
        ids.iter()
            .map(|id| {
                self.registry()
                    .get(id)
                    .ok_or_else(|| VolumeError::NotFound(id.clone()))
            })
            .collect()
    }

    /// Volumes matching `locator` and config `labels`; blank fields match all.
    pub fn enumerate(&self, locator: &VolumeLocator, labels: &Labels) -> Result<Vec<Volume>> {
        let query = LocatorQuery::new(locator, labels)?;
        if query.is_empty() {
            return Ok(self.registry().volumes());
        }
        Ok(self.registry().filter(|volume| query.matches_volume(volume)))
    }

    pub fn snap_inspect(&self, ids: &[SnapId]) -> Result<Vec<VolumeSnap>> {
        ids.iter()
            .map(|id| {
                self.registry()
                    .get_snap(id)
                    .ok_or_else(|| VolumeError::SnapNotFound(id.clone()))
            })
            .collect()
    }

    /// Snapshots whose source volume matches `locator` and whose own labels
    /// match `labels`.
    pub fn snap_enumerate(&self, locator: &VolumeLocator, labels: &Labels) -> Result<Vec<VolumeSnap>> {
        let query = LocatorQuery::new(locator, labels)?;
        Ok(self
            .registry()
            .filter_snaps(|snap, source| query.matches_snap(snap, source)))
    }

    /// Snapshots taken from `id`, oldest first.
    pub fn snapshots_of(&self, id: &VolumeId) -> Result<Vec<VolumeSnap>> {
        if !self.registry().contains(id) {
            return Err(VolumeError::NotFound(id.clone()));
        }
        Ok(self.registry().snaps_of(id))
    }

    /// Pull driver reported usage, status and replicas into the registry.
    ///
    /// An empty `ids` refreshes every volume. State is never changed.
    pub async fn refresh(&self, ids: &[VolumeId]) -> Result<Vec<Volume>> {
        let enumerator = self.enumerator("refresh")?;
        let ids: Vec<VolumeId> = if ids.is_empty() {
            self.registry().volumes().into_iter().map(|v| v.id).collect()
        } else {
            self.inspect(ids)?.into_iter().map(|v| v.id).collect()
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let reports = dispatch::call("refresh", self.timeout(), enumerator.inspect(&ids))
            .await
            .map_err(|failure| {
                VolumeError::from_driver(&ids[0], "refresh", Capability::Enumerate, failure.into_error())
            })?;

        let mut refreshed = Vec::with_capacity(reports.len());
        for report in reports {
            let Some(lock) = self.registry().lock_for(&report.id) else {
                debug!(volume_id = %report.id, "driver reported a volume the registry does not know");
                continue;
            };
            let _guard = lock.lock_owned().await;
            let scanned = Utc::now();
            if let Some(volume) = self.registry().update(&report.id, |volume| {
                volume.usage = report.usage;
                volume.status = report.status;
                volume.replica_set = report.replica_set.clone();
                if !report.format.is_none() {
                    volume.format = report.format;
                }
                volume.last_scan = Some(scanned);
            }) {
                refreshed.push(volume);
            }
        }
        Ok(refreshed)
    }

    /// Shut the driver down. The registry stays readable.
    pub async fn shutdown(&self) {
        if let Some(lifecycle) = self.shared.driver.lifecycle() {
            lifecycle.shutdown().await;
        }
        info!(driver = self.driver_name(), "driver shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use volume_contracts::SnapshotInfo;
    use volume_types::Filesystem;

    use super::*;

    /// Minimal driver: every call succeeds unless a failure is queued.
    #[derive(Default)]
    struct ScriptedDriver {
        calls: StdMutex<Vec<&'static str>>,
        fail_next: StdMutex<Option<DriverError>>,
    }

    impl ScriptedDriver {
        fn record(&self, call: &'static str) -> std::result::Result<(), DriverError> {
            self.calls.lock().unwrap().push(call);
            match self.fail_next.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn fail_next(&self, err: DriverError) {
            *self.fail_next.lock().unwrap() = Some(err);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LifecycleDriver for ScriptedDriver {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn create(
            &self,
            _id: &VolumeId,
            _locator: &VolumeLocator,
            _options: &CreateOptions,
            spec: &VolumeSpec,
        ) -> std::result::Result<Provisioned, DriverError> {
            self.record("create")?;
            Ok(Provisioned {
                usage: spec.size,
                ..Default::default()
            })
        }

        async fn delete(&self, _id: &VolumeId) -> std::result::Result<(), DriverError> {
            self.record("delete")
        }

        async fn snapshot(
            &self,
            _id: &VolumeId,
            _snap_id: &SnapId,
            _labels: &Labels,
        ) -> std::result::Result<SnapshotInfo, DriverError> {
            self.record("snapshot")?;
            Ok(SnapshotInfo::default())
        }

        async fn snap_delete(&self, _snap_id: &SnapId) -> std::result::Result<(), DriverError> {
            self.record("snap-delete")
        }

        async fn stats(&self, _id: &VolumeId) -> std::result::Result<VolumeStats, DriverError> {
            self.record("stats")?;
            Ok(VolumeStats::default())
        }

        async fn alerts(&self, _id: &VolumeId) -> std::result::Result<VolumeAlerts, DriverError> {
            self.record("alerts")?;
            Ok(VolumeAlerts::default())
        }

        async fn shutdown(&self) {}
    }

    #[async_trait]
    impl BlockDriver for ScriptedDriver {
        async fn attach(&self, _id: &VolumeId) -> std::result::Result<AttachInfo, DriverError> {
            self.record("attach")?;
            Ok(AttachInfo {
                device_path: "/dev/xvdb".to_string(),
                attached_on: None,
            })
        }

        async fn format(
            &self,
            _id: &VolumeId,
            _filesystem: Filesystem,
        ) -> std::result::Result<(), DriverError> {
            self.record("format")
        }

        async fn detach(&self, _id: &VolumeId) -> std::result::Result<(), DriverError> {
            self.record("detach")
        }
    }

    #[async_trait]
    impl MountDriver for ScriptedDriver {
        async fn mount(&self, _id: &VolumeId, _path: &str) -> std::result::Result<(), DriverError> {
            self.record("mount")
        }

        async fn unmount(&self, _id: &VolumeId, _path: &str) -> std::result::Result<(), DriverError> {
            self.record("unmount")
        }
    }

    fn ext4_spec() -> VolumeSpec {
        VolumeSpec {
            size: 1 << 30,
            format: Filesystem::Ext4,
            ..Default::default()
        }
    }

    fn block_manager(driver: Arc<ScriptedDriver>) -> Manager {
        let handle = DriverHandle::new("scripted")
            .with_lifecycle(driver.clone())
            .with_block(driver.clone())
            .with_mount(driver);
        Manager::new(handle, ManagerConfig::default())
    }

    #[tokio::test]
    async fn block_volume_walks_the_whole_lifecycle() {
        let driver = Arc::new(ScriptedDriver::default());
        let manager = block_manager(driver.clone());

        let id = manager
            .create(VolumeLocator::named("db1"), CreateOptions::default(), ext4_spec())
            .await
            .unwrap();
        assert_eq!(manager.attach(&id).await.unwrap(), "/dev/xvdb");
        manager.format(&id).await.unwrap();
        manager.mount(&id, "/mnt/db1").await.unwrap();

        let volume = &manager.inspect(std::slice::from_ref(&id)).unwrap()[0];
        assert_eq!(volume.state, VolumeState::Mounted);
        assert_eq!(volume.attach_path.as_deref(), Some("/mnt/db1"));
        assert_eq!(volume.format, Filesystem::Ext4);

        manager.unmount(&id, "/mnt/db1").await.unwrap();
        manager.detach(&id).await.unwrap();
        manager.delete(&id).await.unwrap();

        assert!(matches!(
            manager.inspect(std::slice::from_ref(&id)),
            Err(VolumeError::NotFound(_))
        ));
        assert_eq!(
            driver.calls(),
            vec!["create", "attach", "format", "mount", "unmount", "detach", "delete"]
        );
    }

    #[tokio::test]
    async fn missing_capability_fails_before_touching_the_volume() {
        let driver = Arc::new(ScriptedDriver::default());
        let manager = Manager::new(
            DriverHandle::new("lifecycle-only").with_lifecycle(driver.clone()),
            ManagerConfig::default(),
        );
        let id = manager
            .create(VolumeLocator::named("db1"), CreateOptions::default(), ext4_spec())
            .await
            .unwrap();

        let err = manager.attach(&id).await.unwrap_err();
        assert!(matches!(
            err,
            VolumeError::Unsupported {
                capability: Capability::Block,
                ..
            }
        ));
        assert_eq!(driver.calls(), vec!["create"]);
    }

    #[tokio::test]
    async fn refused_calls_roll_back_and_broken_calls_record_error() {
        let driver = Arc::new(ScriptedDriver::default());
        let manager = block_manager(driver.clone());
        let id = manager
            .create(VolumeLocator::named("db1"), CreateOptions::default(), ext4_spec())
            .await
            .unwrap();

        driver.fail_next(DriverError::new(DriverErrorKind::Busy, "target busy"));
        assert!(manager.attach(&id).await.is_err());
        let volume = manager.inspect(std::slice::from_ref(&id)).unwrap().remove(0);
        assert_eq!(volume.state, VolumeState::Available);
        assert!(!volume.has_error());

        driver.fail_next(DriverError::internal("iscsi login failed"));
        assert!(manager.attach(&id).await.is_err());
        let volume = manager.inspect(std::slice::from_ref(&id)).unwrap().remove(0);
        assert_eq!(volume.state, VolumeState::Error);
        assert_eq!(volume.prior_state, Some(VolumeState::Available));
        assert_eq!(volume.error_string, "iscsi login failed");

        // Force delete is the way out.
        manager.delete(&id).await.unwrap();
        assert!(manager.enumerate(&VolumeLocator::default(), &Labels::new()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_backed_volumes_mount_straight_from_available() {
        let driver = Arc::new(ScriptedDriver::default());
        let manager = Manager::new(
            DriverHandle::new("nfs")
                .with_lifecycle(driver.clone())
                .with_mount(driver.clone()),
            ManagerConfig::default(),
        );
        let id = manager
            .create(VolumeLocator::named("share"), CreateOptions::default(), VolumeSpec::default())
            .await
            .unwrap();

        manager.mount(&id, "/srv/share").await.unwrap();
        assert_eq!(
            manager.inspect(std::slice::from_ref(&id)).unwrap()[0].state,
            VolumeState::Mounted
        );
        manager.unmount(&id, "/srv/share").await.unwrap();
        assert_eq!(
            manager.inspect(std::slice::from_ref(&id)).unwrap()[0].state,
            VolumeState::Available
        );
    }
}
