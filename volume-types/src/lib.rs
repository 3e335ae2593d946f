// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for volume lifecycle management
//!
//! This crate defines the single source of truth for the volume domain types.
//! These models are used throughout the stack:
//!
//! - **volume-contracts**: Driver capability traits take and return these types
//! - **volume-core**: The registry stores them and hands out clones
//! - **volume-service**: Prints them as JSON for the command shell
//!
//! ## Identity
//!
//! A volume has two identities: the system assigned [`VolumeId`] and the
//! user facing [`VolumeLocator`] (name plus labels) used for search.
//! Snapshots live in their own [`SnapId`] namespace.

pub mod common;
pub mod snapshot;
pub mod stats;
pub mod volume;

pub use common::{bytes_to_pretty, parse_size};
pub use snapshot::{SnapId, VolumeSnap};
pub use stats::{Alert, AlertSeverity, VolumeAlerts, VolumeStats};
pub use volume::{
    CreateOptions, Filesystem, Labels, OpaqueHandle, Volume, VolumeCos, VolumeId, VolumeLocator,
    VolumeSpec, VolumeState, VolumeStatus,
};
