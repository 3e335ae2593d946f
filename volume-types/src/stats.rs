// SPDX-License-Identifier: GPL-3.0-only

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// I/O statistics reported by a driver for one volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub reads: u64,
    pub read_ms: u64,
    pub read_bytes: u64,
    pub writes: u64,
    pub write_ms: u64,
    pub write_bytes: u64,
    /// Operations currently in progress
    pub io_progress: u64,
    pub io_ms: u64,
    pub bytes_used: u64,
    /// Length of the sampling interval
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Notify,
    Warning,
    Alarm,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Alerts raised on a volume, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAlerts {
    pub alerts: Vec<Alert>,
}

impl VolumeAlerts {
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Highest severity present, if any.
    pub fn worst(&self) -> Option<AlertSeverity> {
        self.alerts
            .iter()
            .map(|alert| alert.severity)
            .max_by_key(|severity| match severity {
                AlertSeverity::Notify => 0,
                AlertSeverity::Warning => 1,
                AlertSeverity::Alarm => 2,
            })
    }
}
