// SPDX-License-Identifier: GPL-3.0-only

//! Line oriented command shell. Each input line is one command; each reply is
//! one line of JSON, either `{"ok": ...}` or `{"error": {"kind", "message"}}`.

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::debug;
use volume_core::{Manager, VolumeError};
use volume_types::{
    CreateOptions, Filesystem, Labels, SnapId, VolumeCos, VolumeId, VolumeLocator, VolumeSpec,
    bytes_to_pretty, parse_size,
};

use crate::routing::DriverRegistry;

fn size_arg(raw: &str) -> Result<u64, String> {
    parse_size(raw).map_err(|e| e.to_string())
}

fn label_arg(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

fn fs_arg(raw: &str) -> Result<Filesystem, String> {
    Filesystem::from_name(raw).ok_or_else(|| format!("unknown filesystem '{raw}'"))
}

fn cos_arg(raw: &str) -> Result<VolumeCos, String> {
    match raw {
        "none" => Ok(VolumeCos::None),
        "low" => Ok(VolumeCos::Low),
        "medium" => Ok(VolumeCos::Medium),
        "high" => Ok(VolumeCos::High),
        _ => Err(format!("unknown class of service '{raw}'")),
    }
}

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct Line {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Command {
    /// List configured drivers and their capabilities
    Drivers,
    /// Direct later commands to another driver
    Use { driver: String },
    /// Create a volume, or return an equal existing one
    Create {
        name: String,
        #[arg(value_parser = size_arg)]
        size: u64,
        /// Locator labels
        #[arg(value_parser = label_arg)]
        labels: Vec<(String, String)>,
        #[arg(long, value_parser = fs_arg, default_value = "ext4")]
        fs: Filesystem,
        #[arg(long = "config-label", value_parser = label_arg)]
        config_labels: Vec<(String, String)>,
        #[arg(long, default_value_t = 0)]
        ha_level: u32,
        #[arg(long, value_parser = cos_arg, default_value = "none")]
        cos: VolumeCos,
        #[arg(long)]
        ephemeral: bool,
        #[arg(long)]
        fail_if_exists: bool,
        #[arg(long)]
        from_snap: Option<String>,
    },
    Delete { id: String },
    Attach { id: String },
    Format { id: String },
    Detach { id: String },
    Mount { id: String, path: String },
    Unmount { id: String, path: String },
    /// Snapshot a volume; I/O should be quiesced first
    Snap {
        id: String,
        #[arg(value_parser = label_arg)]
        labels: Vec<(String, String)>,
    },
    SnapDelete { id: String },
    Inspect {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Filter by optional name (a regex when it has pattern characters) and key=value labels
    Enumerate { filters: Vec<String> },
    SnapInspect {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    SnapEnumerate { filters: Vec<String> },
    /// Snapshots of one volume, oldest first
    Snaps { id: String },
    Stats { id: String },
    Alerts { id: String },
    Recover { id: String },
    /// Pull usage and status from the driver
    Refresh { ids: Vec<String> },
    #[command(alias = "exit")]
    Quit,
}

impl Command {
    pub fn parse_line(line: &str) -> Result<Self, clap::Error> {
        Line::try_parse_from(line.split_whitespace()).map(|line| line.command)
    }
}

/// Split `[name] [key=value..]` filters into a locator and labels.
fn split_filters(filters: &[String]) -> Result<(VolumeLocator, Labels)> {
    let mut locator = VolumeLocator::default();
    let mut labels = Labels::new();
    for filter in filters {
        match label_arg(filter) {
            Ok((key, value)) => {
                labels.insert(key, value);
            }
            Err(_) if locator.name.is_empty() => locator.name = filter.clone(),
            Err(_) => return Err(anyhow!("more than one name given: '{filter}'")),
        }
    }
    Ok((locator, labels))
}

fn error_kind(err: &VolumeError) -> &'static str {
    match err {
        VolumeError::NotFound(_) | VolumeError::SnapNotFound(_) => "not_found",
        VolumeError::AlreadyExists { .. } => "already_exists",
        VolumeError::InvalidState { .. } => "invalid_state",
        VolumeError::AlreadyAttached(_) => "already_attached",
        VolumeError::NotAttached(_) => "not_attached",
        VolumeError::Unsupported { .. } => "unsupported",
        VolumeError::HasDependents { .. } => "has_dependents",
        VolumeError::InvalidArgument(_) => "invalid_argument",
        VolumeError::Timeout { .. } => "timeout",
        VolumeError::Driver(_) => "driver",
        VolumeError::Internal(_) => "internal",
    }
}

/// Render a failure as the shell's JSON error reply.
pub fn error_reply(err: &anyhow::Error) -> Value {
    let kind = err
        .downcast_ref::<VolumeError>()
        .map(error_kind)
        .unwrap_or("invalid_command");
    json!({ "error": { "kind": kind, "message": format!("{err:#}") } })
}

pub enum Reply {
    Json(Value),
    Quit,
}

pub struct Shell {
    registry: DriverRegistry,
    current: String,
}

impl Shell {
    pub fn new(registry: DriverRegistry) -> Self {
        let current = registry.default_name().to_string();
        Self { registry, current }
    }

    pub fn current_driver(&self) -> &str {
        &self.current
    }

    pub fn select(&mut self, driver: &str) -> Result<()> {
        if self.registry.get(driver).is_none() {
            let known: Vec<&str> = self.registry.names().collect();
            return Err(anyhow!(
                "no driver named '{driver}' (known: {})",
                known.join(", ")
            ));
        }
        self.current = driver.to_string();
        Ok(())
    }

    fn manager(&self) -> Result<&Manager> {
        self.registry
            .get(&self.current)
            .ok_or_else(|| anyhow!("no driver named '{}'", self.current))
    }

    /// Parse and run one input line. Blank lines and `#` comments yield `None`.
    pub async fn handle_line(&mut self, line: &str) -> Option<Reply> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let command = match Command::parse_line(line) {
            Ok(command) => command,
            Err(e) => {
                return Some(Reply::Json(json!({
                    "error": { "kind": "invalid_command", "message": e.to_string().trim_end() }
                })));
            }
        };
        debug!(driver = %self.current, ?command, "shell command");

        match self.execute(command).await {
            Ok(Some(value)) => Some(Reply::Json(json!({ "ok": value }))),
            Ok(None) => Some(Reply::Quit),
            Err(e) => Some(Reply::Json(error_reply(&e))),
        }
    }

    /// Run `command`; `Ok(None)` asks the caller to stop.
    pub async fn execute(&mut self, command: Command) -> Result<Option<Value>> {
        let value = match command {
            Command::Quit => return Ok(None),
            Command::Drivers => {
                let drivers: Vec<Value> = self
                    .registry
                    .managers()
                    .map(|manager| {
                        json!({
                            "name": manager.driver_name(),
                            "capabilities": manager
                                .capabilities()
                                .iter()
                                .map(|c| c.as_str())
                                .collect::<Vec<_>>(),
                            "selected": manager.driver_name() == self.current,
                        })
                    })
                    .collect();
                json!(drivers)
            }
            Command::Use { driver } => {
                self.select(&driver)?;
                json!({ "driver": driver })
            }
            Command::Create {
                name,
                size,
                labels,
                fs,
                config_labels,
                ha_level,
                cos,
                ephemeral,
                fail_if_exists,
                from_snap,
            } => {
                let locator = VolumeLocator {
                    name,
                    volume_labels: labels.into_iter().collect(),
                };
                let spec = VolumeSpec {
                    ephemeral,
                    size,
                    format: fs,
                    ha_level,
                    cos,
                    config_labels: config_labels.into_iter().collect(),
                    ..Default::default()
                };
                let options = CreateOptions {
                    fail_if_exists,
                    create_from_snap: from_snap.map(SnapId::from),
                };
                let id = self.manager()?.create(locator, options, spec).await?;
                json!({ "id": id, "size": bytes_to_pretty(size, false) })
            }
            Command::Delete { id } => {
                self.manager()?.delete(&VolumeId::from(id.as_str())).await?;
                json!({ "deleted": id })
            }
            Command::Attach { id } => {
                let device = self.manager()?.attach(&VolumeId::from(id.as_str())).await?;
                json!({ "id": id, "device_path": device })
            }
            Command::Format { id } => {
                self.manager()?.format(&VolumeId::from(id.as_str())).await?;
                json!({ "formatted": id })
            }
            Command::Detach { id } => {
                self.manager()?.detach(&VolumeId::from(id.as_str())).await?;
                json!({ "detached": id })
            }
            Command::Mount { id, path } => {
                self.manager()?
                    .mount(&VolumeId::from(id.as_str()), &path)
                    .await?;
                json!({ "id": id, "mount_path": path })
            }
            Command::Unmount { id, path } => {
                self.manager()?
                    .unmount(&VolumeId::from(id.as_str()), &path)
                    .await?;
                json!({ "unmounted": id })
            }
            Command::Snap { id, labels } => {
                let snap_id = self
                    .manager()?
                    .snapshot(&VolumeId::from(id.as_str()), labels.into_iter().collect())
                    .await?;
                json!({ "snap_id": snap_id, "volume_id": id })
            }
            Command::SnapDelete { id } => {
                self.manager()?.snap_delete(&SnapId::from(id.as_str())).await?;
                json!({ "deleted": id })
            }
            Command::Inspect { ids } => {
                let ids: Vec<VolumeId> = ids.into_iter().map(VolumeId::from).collect();
                serde_json::to_value(self.manager()?.inspect(&ids)?)?
            }
            Command::Enumerate { filters } => {
                let (locator, labels) = split_filters(&filters)?;
                serde_json::to_value(self.manager()?.enumerate(&locator, &labels)?)?
            }
            Command::SnapInspect { ids } => {
                let ids: Vec<SnapId> = ids.into_iter().map(SnapId::from).collect();
                serde_json::to_value(self.manager()?.snap_inspect(&ids)?)?
            }
            Command::SnapEnumerate { filters } => {
                let (locator, labels) = split_filters(&filters)?;
                serde_json::to_value(self.manager()?.snap_enumerate(&locator, &labels)?)?
            }
            Command::Snaps { id } => {
                serde_json::to_value(self.manager()?.snapshots_of(&VolumeId::from(id.as_str()))?)?
            }
            Command::Stats { id } => {
                serde_json::to_value(self.manager()?.stats(&VolumeId::from(id.as_str())).await?)?
            }
            Command::Alerts { id } => {
                serde_json::to_value(self.manager()?.alerts(&VolumeId::from(id.as_str())).await?)?
            }
            Command::Recover { id } => {
                let state = self.manager()?.recover(&VolumeId::from(id.as_str())).await?;
                json!({ "id": id, "state": state })
            }
            Command::Refresh { ids } => {
                let ids: Vec<VolumeId> = ids.into_iter().map(VolumeId::from).collect();
                serde_json::to_value(self.manager()?.refresh(&ids).await?)?
            }
        };
        Ok(Some(value))
    }

    pub async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    use super::*;

    fn shell() -> Shell {
        Shell::new(DriverRegistry::build(&Config::default()).unwrap())
    }

    async fn ok(shell: &mut Shell, line: &str) -> Value {
        match shell.handle_line(line).await {
            Some(Reply::Json(value)) => {
                assert!(value.get("error").is_none(), "{line}: {value}");
                value["ok"].clone()
            }
            _ => panic!("{line}: expected a reply"),
        }
    }

    async fn err_kind(shell: &mut Shell, line: &str) -> String {
        match shell.handle_line(line).await {
            Some(Reply::Json(value)) => value["error"]["kind"].as_str().unwrap().to_string(),
            _ => panic!("{line}: expected a reply"),
        }
    }

    #[test]
    fn create_arguments_parse() {
        let command =
            Command::parse_line("create db1 10G tier=gold --fs xfs --fail-if-exists").unwrap();
        match command {
            Command::Create {
                name,
                size,
                labels,
                fs,
                ha_level,
                fail_if_exists,
                from_snap,
                ..
            } => {
                assert_eq!(name, "db1");
                assert_eq!(ha_level, 0);
                assert_eq!(size, 10 * 1024 * 1024 * 1024);
                assert_eq!(labels, vec![("tier".to_string(), "gold".to_string())]);
                assert_eq!(fs, Filesystem::Xfs);
                assert!(fail_if_exists);
                assert!(from_snap.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(Command::parse_line("create db1 lots").is_err());
        assert_eq!(Command::parse_line("exit").unwrap(), Command::Quit);
    }

    #[test]
    fn filters_split_into_name_and_labels() {
        let (locator, labels) =
            split_filters(&["db.*".to_string(), "app=pg".to_string()]).unwrap();
        assert_eq!(locator.name, "db.*");
        assert_eq!(labels.get("app").map(String::as_str), Some("pg"));
        assert!(split_filters(&["a".to_string(), "b".to_string()]).is_err());
    }

    #[tokio::test]
    async fn db1_through_the_shell() {
        let mut shell = shell();
        let id = ok(&mut shell, "create db1 1G").await["id"]
            .as_str()
            .unwrap()
            .to_string();

        let attached = ok(&mut shell, &format!("attach {id}")).await;
        assert_eq!(attached["device_path"], "/dev/xvdb");
        ok(&mut shell, &format!("format {id}")).await;
        ok(&mut shell, &format!("mount {id} /mnt/db1")).await;

        let volumes = ok(&mut shell, "enumerate db.*").await;
        assert_eq!(volumes[0]["state"], "mounted");
        assert_eq!(volumes[0]["attach_path"], "/mnt/db1");

        assert_eq!(err_kind(&mut shell, &format!("delete {id}")).await, "invalid_state");
        assert_eq!(err_kind(&mut shell, &format!("attach {id}")).await, "already_attached");

        ok(&mut shell, &format!("unmount {id} /mnt/db1")).await;
        ok(&mut shell, &format!("detach {id}")).await;
        ok(&mut shell, &format!("delete {id}")).await;
        assert_eq!(err_kind(&mut shell, &format!("inspect {id}")).await, "not_found");
    }

    #[tokio::test]
    async fn bad_input_is_reported_not_fatal() {
        let mut shell = shell();
        assert_eq!(err_kind(&mut shell, "frobnicate").await, "invalid_command");
        assert_eq!(err_kind(&mut shell, "use nowhere").await, "invalid_command");
        assert_eq!(err_kind(&mut shell, "enumerate db[").await, "invalid_argument");
        assert!(shell.handle_line("   ").await.is_none());
        assert!(matches!(shell.handle_line("quit").await, Some(Reply::Quit)));
    }
}
