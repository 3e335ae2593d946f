// SPDX-License-Identifier: GPL-3.0-only

//! Test support for the volume manager.
//!
//! [`FakeDriver`] records every call and lets a test script the outcome of
//! each operation, including hangs and panics.

pub mod fake;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use volume_contracts::DriverHandle;
use volume_core::{Manager, ManagerConfig};
use volume_types::{Filesystem, VolumeSpec};

pub use fake::{Behavior, Call, FakeDriver, Op};

/// Route manager logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// A manager over `driver` with every capability and a short deadline.
pub fn manager(driver: &Arc<FakeDriver>) -> Manager {
    Manager::new(
        DriverHandle::full("fake", driver.clone()),
        ManagerConfig::default().with_driver_timeout(Duration::from_secs(5)),
    )
}

pub fn block_spec(size: u64, format: Filesystem) -> VolumeSpec {
    VolumeSpec {
        size,
        format,
        ..Default::default()
    }
}
