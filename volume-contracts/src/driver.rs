// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::sync::Arc;

use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};

use crate::{BlockDriver, Enumerator, LifecycleDriver, MountDriver};

/// One of the four independently implementable driver contracts.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Lifecycle,
    Block,
    Mount,
    Enumerate,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lifecycle => "lifecycle",
            Self::Block => "block",
            Self::Mount => "mount",
            Self::Enumerate => "enumerate",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "lifecycle" => Some(Self::Lifecycle),
            "block" => Some(Self::Block),
            "mount" => Some(Self::Mount),
            "enumerate" | "enumerator" => Some(Self::Enumerate),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function tables of a driver instance, one optional table per capability.
///
/// The manager probes [`DriverHandle::capabilities`] before dispatching, so a
/// driver only registers the groups it actually implements.
#[derive(Clone)]
pub struct DriverHandle {
    name: String,
    lifecycle: Option<Arc<dyn LifecycleDriver>>,
    block: Option<Arc<dyn BlockDriver>>,
    mount: Option<Arc<dyn MountDriver>>,
    enumerator: Option<Arc<dyn Enumerator>>,
}

impl DriverHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: None,
            block: None,
            mount: None,
            enumerator: None,
        }
    }

    /// Register every capability of a driver that implements all four groups.
    pub fn full<D>(name: impl Into<String>, driver: Arc<D>) -> Self
    where
        D: LifecycleDriver + BlockDriver + MountDriver + Enumerator + 'static,
    {
        Self::new(name)
            .with_lifecycle(driver.clone())
            .with_block(driver.clone())
            .with_mount(driver.clone())
            .with_enumerator(driver)
    }

    pub fn with_lifecycle(mut self, driver: Arc<dyn LifecycleDriver>) -> Self {
        self.lifecycle = Some(driver);
        self
    }

    pub fn with_block(mut self, driver: Arc<dyn BlockDriver>) -> Self {
        self.block = Some(driver);
        self
    }

    pub fn with_mount(mut self, driver: Arc<dyn MountDriver>) -> Self {
        self.mount = Some(driver);
        self
    }

    pub fn with_enumerator(mut self, driver: Arc<dyn Enumerator>) -> Self {
        self.enumerator = Some(driver);
        self
    }

    /// Drop every table not named in `keep`.
    pub fn restrict(mut self, keep: BitFlags<Capability>) -> Self {
        if !keep.contains(Capability::Lifecycle) {
            self.lifecycle = None;
        }
        if !keep.contains(Capability::Block) {
            self.block = None;
        }
        if !keep.contains(Capability::Mount) {
            self.mount = None;
        }
        if !keep.contains(Capability::Enumerate) {
            self.enumerator = None;
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> BitFlags<Capability> {
        let mut caps = BitFlags::empty();
        if self.lifecycle.is_some() {
            caps |= Capability::Lifecycle;
        }
        if self.block.is_some() {
            caps |= Capability::Block;
        }
        if self.mount.is_some() {
            caps |= Capability::Mount;
        }
        if self.enumerator.is_some() {
            caps |= Capability::Enumerate;
        }
        caps
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    pub fn lifecycle(&self) -> Option<Arc<dyn LifecycleDriver>> {
        self.lifecycle.clone()
    }

    pub fn block(&self) -> Option<Arc<dyn BlockDriver>> {
        self.block.clone()
    }

    pub fn mount(&self) -> Option<Arc<dyn MountDriver>> {
        self.mount.clone()
    }

    pub fn enumerator(&self) -> Option<Arc<dyn Enumerator>> {
        self.enumerator.clone()
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
