// SPDX-License-Identifier: GPL-3.0-only

pub mod errors;
pub mod replies;

pub use errors::{DriverError, DriverErrorKind};
pub use replies::{AttachInfo, Provisioned, RecoveredState, SnapshotInfo, VolumeReport};
