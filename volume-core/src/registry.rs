// SPDX-License-Identifier: GPL-3.0-only

//! Authoritative record of every known volume and snapshot.
//!
//! Volumes live in an arena of slots; the slot index doubles as the key into
//! the [`LockTable`]. All accessors hand out clones, so callers can never hold
//! a reference into a record outside the manager's lock discipline.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::Mutex;
use volume_types::{SnapId, Volume, VolumeId, VolumeLocator, VolumeSnap, VolumeSpec, VolumeState};

use crate::config::ReusePolicy;
use crate::error::{Result, VolumeError};
use crate::locks::{LockTable, VolumeGuard};

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Option<Volume>>,
    index: HashMap<VolumeId, usize>,
    snaps: HashMap<SnapId, VolumeSnap>,
    /// Ids of deleted volumes, kept so an id is never handed out twice.
    tombstones: HashSet<VolumeId>,
}

/// Outcome of matching a create request against the registry.
#[derive(Debug)]
pub enum CreateClaim {
    /// An equal, available volume exists and is returned as is.
    Reuse(VolumeId),
    /// An equal volume whose create failed indeterminately; create is retried.
    Retry(VolumeId),
    /// An equal volume is being created right now.
    InFlight(VolumeId),
    /// A new pending record was registered; its lock is already held.
    New(VolumeId, VolumeGuard),
}

#[derive(Debug, Default)]
pub struct Registry {
    inner: RwLock<Inner>,
    locks: LockTable,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, id: &VolumeId) -> Option<Volume> {
        let inner = self.read();
        let slot = *inner.index.get(id)?;
        inner.slots.get(slot).and_then(Clone::clone)
    }

    pub fn contains(&self, id: &VolumeId) -> bool {
        self.read().index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The exclusive lock guarding `id`.
    pub fn lock_for(&self, id: &VolumeId) -> Option<Arc<Mutex<()>>> {
        let slot = *self.read().index.get(id)?;
        self.locks.get(slot)
    }

    /// Atomically match a create request and, if nothing matches, register a
    /// pending record for `id`.
    pub fn claim_create(
        &self,
        id: VolumeId,
        locator: &VolumeLocator,
        spec: &VolumeSpec,
        fail_if_exists: bool,
        policy: ReusePolicy,
    ) -> Result<CreateClaim> {
        let mut inner = self.write();

        if fail_if_exists
            && inner
                .slots
                .iter()
                .flatten()
                .any(|volume| &volume.locator == locator)
        {
            return Err(VolumeError::AlreadyExists {
                name: locator.name.clone(),
            });
        }

        let candidate = inner
            .slots
            .iter()
            .flatten()
            .filter(|volume| policy.matches(volume, locator, spec))
            .find_map(|volume| match volume.state {
                VolumeState::Available => Some(CreateClaim::Reuse(volume.id.clone())),
                VolumeState::Pending => Some(CreateClaim::InFlight(volume.id.clone())),
                VolumeState::Error if volume.prior_state == Some(VolumeState::Pending) => {
                    Some(CreateClaim::Retry(volume.id.clone()))
                }
                _ => None,
            });
        if let Some(claim) = candidate {
            return Ok(claim);
        }

        if inner.index.contains_key(&id) || inner.tombstones.contains(&id) {
            return Err(VolumeError::Internal(format!("volume id {id} is already in use")));
        }

        let (slot, guard) = self.locks.push_locked();
        debug_assert_eq!(slot, inner.slots.len());
        inner
            .slots
            .push(Some(Volume::pending(id.clone(), locator.clone(), spec.clone())));
        inner.index.insert(id.clone(), slot);

        Ok(CreateClaim::New(id, guard))
    }

    /// Apply `f` to the record for `id` and return the committed copy.
    pub fn update<F>(&self, id: &VolumeId, f: F) -> Option<Volume>
    where
        F: FnOnce(&mut Volume),
    {
        let mut inner = self.write();
        let slot = *inner.index.get(id)?;
        let volume = inner.slots.get_mut(slot)?.as_mut()?;
        f(volume);
        Some(volume.clone())
    }

    /// Drop the record for `id` and retire the id for good.
    pub fn remove(&self, id: &VolumeId) -> Option<Volume> {
        let mut inner = self.write();
        let slot = inner.index.remove(id)?;
        inner.tombstones.insert(id.clone());
        inner.slots.get_mut(slot).and_then(Option::take)
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.read().slots.iter().flatten().cloned().collect()
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<Volume>
    where
        P: Fn(&Volume) -> bool,
    {
        self.read()
            .slots
            .iter()
            .flatten()
            .filter(|volume| predicate(volume))
            .cloned()
            .collect()
    }

    pub fn insert_snap(&self, snap: VolumeSnap) {
        self.write().snaps.insert(snap.id.clone(), snap);
    }

    pub fn get_snap(&self, id: &SnapId) -> Option<VolumeSnap> {
        self.read().snaps.get(id).cloned()
    }

    pub fn remove_snap(&self, id: &SnapId) -> Option<VolumeSnap> {
        self.write().snaps.remove(id)
    }

    pub fn snaps_of(&self, volume_id: &VolumeId) -> Vec<VolumeSnap> {
        let mut snaps: Vec<VolumeSnap> = self
            .read()
            .snaps
            .values()
            .filter(|snap| &snap.volume_id == volume_id)
            .cloned()
            .collect();
        snaps.sort_by(|a, b| a.ctime.cmp(&b.ctime));
        snaps
    }

    /// Snapshots accepted by `predicate`, given the snapshot and its source.
    pub fn filter_snaps<P>(&self, predicate: P) -> Vec<VolumeSnap>
    where
        P: Fn(&VolumeSnap, Option<&Volume>) -> bool,
    {
        let inner = self.read();
        let mut snaps: Vec<VolumeSnap> = inner
            .snaps
            .values()
            .filter(|snap| {
                let source = inner
                    .index
                    .get(&snap.volume_id)
                    .and_then(|slot| inner.slots.get(*slot))
                    .and_then(Option::as_ref);
                predicate(snap, source)
            })
            .cloned()
            .collect();
        snaps.sort_by(|a, b| a.ctime.cmp(&b.ctime));
        snaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim_new(registry: &Registry, name: &str) -> (VolumeId, VolumeGuard) {
        match registry
            .claim_create(
                VolumeId::generate(),
                &VolumeLocator::named(name),
                &VolumeSpec::default(),
                false,
                ReusePolicy::LocatorAndSpec,
            )
            .unwrap()
        {
            CreateClaim::New(id, guard) => (id, guard),
            other => panic!("expected a new record, got {other:?}"),
        }
    }

    #[test]
    fn new_claims_register_pending_records() {
        let registry = Registry::new();
        let (id, _guard) = claim_new(&registry, "db1");

        let volume = registry.get(&id).unwrap();
        assert_eq!(volume.state, VolumeState::Pending);
        assert_eq!(registry.len(), 1);
        assert!(registry.lock_for(&id).unwrap().try_lock_owned().is_err());
    }

    #[test]
    fn equal_pending_claim_is_reported_in_flight() {
        let registry = Registry::new();
        let (id, _guard) = claim_new(&registry, "db1");

        let claim = registry
            .claim_create(
                VolumeId::generate(),
                &VolumeLocator::named("db1"),
                &VolumeSpec::default(),
                false,
                ReusePolicy::LocatorAndSpec,
            )
            .unwrap();
        assert!(matches!(claim, CreateClaim::InFlight(found) if found == id));
    }

    #[test]
    fn available_volume_is_reused_and_fail_if_exists_rejects() {
        let registry = Registry::new();
        let (id, guard) = claim_new(&registry, "db1");
        registry.update(&id, |v| v.state = VolumeState::Available);
        drop(guard);

        let reuse = registry
            .claim_create(
                VolumeId::generate(),
                &VolumeLocator::named("db1"),
                &VolumeSpec::default(),
                false,
                ReusePolicy::LocatorAndSpec,
            )
            .unwrap();
        assert!(matches!(reuse, CreateClaim::Reuse(found) if found == id));

        let err = registry
            .claim_create(
                VolumeId::generate(),
                &VolumeLocator::named("db1"),
                &VolumeSpec::default(),
                true,
                ReusePolicy::LocatorAndSpec,
            )
            .unwrap_err();
        assert!(matches!(err, VolumeError::AlreadyExists { .. }));
    }

    #[test]
    fn removed_ids_are_tombstoned() {
        let registry = Registry::new();
        let (id, _guard) = claim_new(&registry, "db1");

        assert!(registry.remove(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert!(registry.lock_for(&id).is_none());

        let err = registry
            .claim_create(
                id.clone(),
                &VolumeLocator::named("db2"),
                &VolumeSpec::default(),
                false,
                ReusePolicy::LocatorAndSpec,
            )
            .unwrap_err();
        assert!(matches!(err, VolumeError::Internal(_)));
    }

    #[test]
    fn update_commits_and_returns_a_copy() {
        let registry = Registry::new();
        let (id, _guard) = claim_new(&registry, "db1");

        let mut copy = registry
            .update(&id, |v| {
                v.state = VolumeState::Attached;
                v.device_path = Some("/dev/xvdb".to_string());
            })
            .unwrap();
        copy.device_path = None;

        let stored = registry.get(&id).unwrap();
        assert_eq!(stored.state, VolumeState::Attached);
        assert_eq!(stored.device_path.as_deref(), Some("/dev/xvdb"));
    }
}
