// SPDX-License-Identifier: GPL-3.0-only

pub mod memory;

use std::sync::Arc;

use volume_contracts::DriverHandle;

use crate::config::{DriverKind, DriverSection};
use memory::MemoryDriver;

/// Instantiate the backend described by `section`, trimmed to the
/// capabilities it lists.
pub fn build_driver(section: &DriverSection, kind: DriverKind) -> DriverHandle {
    let handle = match kind {
        DriverKind::Memory => {
            DriverHandle::full(section.name.clone(), Arc::new(MemoryDriver::new(&section.name)))
        }
    };
    handle.restrict(section.capability_set())
}
