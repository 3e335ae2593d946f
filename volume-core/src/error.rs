// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;
use volume_contracts::{Capability, DriverError, DriverErrorKind};
use volume_types::{SnapId, VolumeId, VolumeState};

use crate::state::Event;

/// Errors surfaced by the lifecycle manager.
#[derive(Debug, Clone, Error)]
pub enum VolumeError {
    #[error("volume {0} not found")]
    NotFound(VolumeId),

    #[error("snapshot {0} not found")]
    SnapNotFound(SnapId),

    #[error("volume '{name}' already exists")]
    AlreadyExists { name: String },

    #[error("cannot {event} volume {id} in state {state}: {reason}")]
    InvalidState {
        id: VolumeId,
        state: VolumeState,
        event: Event,
        reason: String,
    },

    #[error("volume {0} is already attached")]
    AlreadyAttached(VolumeId),

    #[error("volume {0} is not attached")]
    NotAttached(VolumeId),

    #[error("driver does not implement {capability} (needed for {operation})")]
    Unsupported {
        capability: Capability,
        operation: &'static str,
    },

    #[error("volume {id} has dependents: {reason}")]
    HasDependents { id: VolumeId, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{operation} timed out: {message}")]
    Timeout {
        operation: &'static str,
        message: String,
    },

    #[error("driver error: {0}")]
    Driver(DriverError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VolumeError {
    /// Translate a failure reported by the `capability` driver for volume `id`.
    pub fn from_driver(
        id: &VolumeId,
        operation: &'static str,
        capability: Capability,
        err: DriverError,
    ) -> Self {
        match err.kind {
            DriverErrorKind::NotFound => Self::NotFound(id.clone()),
            DriverErrorKind::AlreadyExists => Self::AlreadyExists {
                name: id.to_string(),
            },
            DriverErrorKind::HasSnapshots => Self::HasDependents {
                id: id.clone(),
                reason: format!("volume has snapshots ({})", err.message),
            },
            DriverErrorKind::HasAttachments => Self::HasDependents {
                id: id.clone(),
                reason: format!("volume has attachments ({})", err.message),
            },
            DriverErrorKind::AlreadyAttached => Self::AlreadyAttached(id.clone()),
            DriverErrorKind::NotAttached => Self::NotAttached(id.clone()),
            DriverErrorKind::Timeout => Self::Timeout {
                operation,
                message: err.message,
            },
            DriverErrorKind::Unsupported => Self::Unsupported {
                capability,
                operation,
            },
            _ => Self::Driver(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, VolumeError>;
