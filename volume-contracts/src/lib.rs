// SPDX-License-Identifier: GPL-3.0-only

pub mod driver;
pub mod protocol;
pub mod traits;

pub use driver::{Capability, DriverHandle};
pub use protocol::{
    AttachInfo, DriverError, DriverErrorKind, Provisioned, RecoveredState, SnapshotInfo,
    VolumeReport,
};
pub use traits::{BlockDriver, Enumerator, LifecycleDriver, MountDriver};
