// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverErrorKind {
    NotFound,
    AlreadyExists,
    AlreadyAttached,
    NotAttached,
    HasSnapshots,
    HasAttachments,
    Busy,
    InvalidInput,
    Unsupported,
    Timeout,
    Internal,
}

impl DriverErrorKind {
    pub fn code(self) -> u16 {
        match self {
            Self::InvalidInput => 400,
            Self::NotFound => 404,
            Self::AlreadyExists => 409,
            Self::AlreadyAttached => 409,
            Self::NotAttached => 412,
            Self::HasSnapshots => 424,
            Self::HasAttachments => 424,
            Self::Busy => 423,
            Self::Unsupported => 501,
            Self::Timeout => 504,
            Self::Internal => 500,
        }
    }

    /// Whether the driver guarantees it made no change to the volume.
    ///
    /// Recoverable failures roll the volume back to the state it was in
    /// before the call; everything else leaves it in `Error`.
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Self::Timeout | Self::Internal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct DriverError {
    pub kind: DriverErrorKind,
    /// Backend specific error number, zero when the backend has none
    #[serde(default)]
    pub errno: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            errno: 0,
            message: message.into(),
        }
    }

    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = errno;
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Internal, message)
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(
            DriverErrorKind::Unsupported,
            format!("{operation} is not implemented by this driver"),
        )
    }

    /// Error number recorded on a volume that entered `Error` because of this failure.
    pub fn code(&self) -> i32 {
        if self.errno != 0 {
            self.errno
        } else {
            i32::from(self.kind.code())
        }
    }
}
