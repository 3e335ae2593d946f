// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use enumflags2::BitFlags;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use volume_contracts::Capability;
use volume_core::{ManagerConfig, ReusePolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
    #[error("invalid config {path:?}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LoggingLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Backends `volumed` knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Memory,
}

impl DriverKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSection {
    /// Per driver call deadline; 0 disables it.
    pub driver_timeout_ms: u64,
    pub reuse_policy: ReusePolicy,
}

impl Default for ManagerSection {
    fn default() -> Self {
        Self {
            driver_timeout_ms: 30_000,
            reuse_policy: ReusePolicy::default(),
        }
    }
}

impl ManagerSection {
    pub fn manager_config(&self) -> ManagerConfig {
        let config = ManagerConfig::default().with_reuse_policy(self.reuse_policy);
        match self.driver_timeout_ms {
            0 => config,
            ms => config.with_driver_timeout(Duration::from_millis(ms)),
        }
    }
}

fn all_capabilities() -> Vec<String> {
    BitFlags::<Capability>::all()
        .iter()
        .map(|c| c.as_str().to_string())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSection {
    pub name: String,
    pub kind: String,
    #[serde(default = "all_capabilities")]
    pub capabilities: Vec<String>,
}

impl DriverSection {
    pub fn driver_kind(&self) -> Option<DriverKind> {
        DriverKind::from_name(&self.kind)
    }

    /// Capability set named in the config. Unknown names are skipped;
    /// [`Config::validate`] rejects them up front.
    pub fn capability_set(&self) -> BitFlags<Capability> {
        self.capabilities
            .iter()
            .filter_map(|name| Capability::from_name(name))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: LoggingLevel,
    /// Also write daily rolling log files here.
    pub log_dir: Option<PathBuf>,
    pub manager: ManagerSection,
    pub drivers: Vec<DriverSection>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LoggingLevel::Info,
            log_dir: None,
            manager: ManagerSection::default(),
            drivers: vec![DriverSection {
                name: "mem".to_string(),
                kind: "memory".to_string(),
                capabilities: all_capabilities(),
            }],
        }
    }
}

impl Config {
    /// Load `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|error| ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;
        Self::parse(&raw).map_err(|reason| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let config: Config = toml::from_str(raw).map_err(|error| error.to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.drivers.is_empty() {
            return Err("at least one driver must be configured".to_string());
        }

        let mut seen = HashSet::new();
        for driver in &self.drivers {
            if driver.name.trim().is_empty() {
                return Err("driver name must not be empty".to_string());
            }
            if !seen.insert(driver.name.as_str()) {
                return Err(format!("driver '{}' is configured twice", driver.name));
            }
            if driver.driver_kind().is_none() {
                return Err(format!(
                    "driver '{}' has unknown kind '{}'",
                    driver.name, driver.kind
                ));
            }
            if let Some(bad) = driver
                .capabilities
                .iter()
                .find(|name| Capability::from_name(name).is_none())
            {
                return Err(format!(
                    "driver '{}' lists unknown capability '{bad}'",
                    driver.name
                ));
            }
            if !driver.capability_set().contains(Capability::Lifecycle) {
                return Err(format!(
                    "driver '{}' must offer the lifecycle capability",
                    driver.name
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        let config = Config::load(Path::new("/nonexistent/volumed.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.drivers[0].capability_set(), BitFlags::<Capability>::all());
    }

    #[test]
    fn full_config_parses() {
        let config = Config::parse(
            r#"
            log_level = "debug"

            [manager]
            driver_timeout_ms = 0
            reuse_policy = "never"

            [[drivers]]
            name = "nfs"
            kind = "memory"
            capabilities = ["lifecycle", "mount"]
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level.as_directive(), "debug");
        assert_eq!(config.manager.reuse_policy, ReusePolicy::Never);
        let manager = config.manager.manager_config();
        assert!(manager.driver_timeout.is_none());
        assert_eq!(
            config.drivers[0].capability_set(),
            Capability::Lifecycle | Capability::Mount
        );
    }

    #[test]
    fn validation_rejects_bad_driver_sections() {
        let duplicate = r#"
            [[drivers]]
            name = "a"
            kind = "memory"
            [[drivers]]
            name = "a"
            kind = "memory"
        "#;
        assert!(Config::parse(duplicate).unwrap_err().contains("twice"));

        let unknown = r#"
            [[drivers]]
            name = "a"
            kind = "ceph"
        "#;
        assert!(Config::parse(unknown).unwrap_err().contains("unknown kind"));

        let empty = r#"
            [[drivers]]
            name = ""
            kind = "memory"
        "#;
        assert!(Config::parse(empty).unwrap_err().contains("empty"));

        let no_lifecycle = r#"
            [[drivers]]
            name = "a"
            kind = "memory"
            capabilities = ["block"]
        "#;
        assert!(Config::parse(no_lifecycle).unwrap_err().contains("lifecycle"));
    }
}
