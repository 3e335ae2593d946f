// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use tracing::info;
use volume_core::Manager;

use crate::adapters::build_driver;
use crate::config::Config;

/// One manager per configured driver, addressed by driver name.
pub struct DriverRegistry {
    managers: BTreeMap<String, Manager>,
    default: String,
}

impl DriverRegistry {
    pub fn build(config: &Config) -> Result<Self> {
        let mut managers = BTreeMap::new();
        for section in &config.drivers {
            let kind = section
                .driver_kind()
                .ok_or_else(|| anyhow!("unknown driver kind '{}'", section.kind))?;
            let handle = build_driver(section, kind);
            info!(
                driver = %section.name,
                kind = %section.kind,
                capabilities = ?handle.capabilities(),
                "driver registered"
            );
            managers.insert(
                section.name.clone(),
                Manager::new(handle, config.manager.manager_config()),
            );
        }

        let default = config
            .drivers
            .first()
            .map(|section| section.name.clone())
            .ok_or_else(|| anyhow!("no drivers configured"))?;

        Ok(Self { managers, default })
    }

    pub fn get(&self, name: &str) -> Option<&Manager> {
        self.managers.get(name)
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }

    pub fn managers(&self) -> impl Iterator<Item = &Manager> {
        self.managers.values()
    }

    pub async fn shutdown_all(&self) {
        for manager in self.managers.values() {
            manager.shutdown().await;
        }
    }
}
