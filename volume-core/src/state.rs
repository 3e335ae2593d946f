// SPDX-License-Identifier: GPL-3.0-only

//! Volume state machine.
//!
//! ```text
//! Pending -> Available -> Attached -> Mounted
//!              ^   |        ^  |        |
//!              |   |        |  +-format-+ (stays Attached)
//!              |   |        +-- unmount-+
//!              +---+-detach-+
//!              Available/Error -> Deleting -> Deleted
//! ```
//!
//! Any failed in-flight transition may land in `Error`; that is decided by the
//! manager from the driver outcome, not by this table.

use std::fmt;

use volume_contracts::Capability;
use volume_types::VolumeState;

/// A lifecycle request, as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Create,
    Attach,
    Format,
    Mount,
    Unmount,
    Detach,
    Delete,
    Snapshot,
    SnapDelete,
    Recover,
}

impl Event {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Attach => "attach",
            Self::Format => "format",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Detach => "detach",
            Self::Delete => "delete",
            Self::Snapshot => "snapshot",
            Self::SnapDelete => "snap-delete",
            Self::Recover => "recover",
        }
    }

    /// The driver capability that carries this request.
    pub fn capability(self) -> Capability {
        match self {
            Self::Attach | Self::Format | Self::Detach => Capability::Block,
            Self::Mount | Self::Unmount => Capability::Mount,
            _ => Capability::Lifecycle,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the driver exposes storage to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Attach exports a block device that is then mounted.
    Block,
    /// File based storage is mounted straight from `Available`.
    File,
}

/// An allowed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: VolumeState,
    /// State committed while the driver call runs
    pub in_flight: Option<VolumeState>,
    pub to: VolumeState,
}

impl Transition {
    fn direct(from: VolumeState, to: VolumeState) -> Self {
        Self {
            from,
            in_flight: None,
            to,
        }
    }

    fn through(from: VolumeState, in_flight: VolumeState, to: VolumeState) -> Self {
        Self {
            from,
            in_flight: Some(in_flight),
            to,
        }
    }

    pub fn changes_state(&self) -> bool {
        self.from != self.to
    }
}

/// Why a transition is not allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AlreadyAttached,
    NotAttached,
    InvalidState(&'static str),
}

/// Look up `event` in the transition table for a volume currently in `from`.
pub fn plan(from: VolumeState, event: Event, backing: Backing) -> Result<Transition, Rejection> {
    use VolumeState::*;

    match (from, event) {
        (Deleted, _) => Err(Rejection::InvalidState("volume is deleted")),
        (Pending | Deleting, _) => Err(Rejection::InvalidState("another operation is in flight")),

        (Error, Event::Delete) => Ok(Transition::through(Error, Deleting, Deleted)),
        (Error, Event::Recover) => Ok(Transition::direct(Error, Available)),
        (Error, Event::Create) => Ok(Transition::through(Error, Pending, Available)),
        (Error, Event::Snapshot | Event::SnapDelete) => Ok(Transition::direct(Error, Error)),
        (Error, _) => Err(Rejection::InvalidState("volume is in error state")),
        (_, Event::Recover) => Err(Rejection::InvalidState("volume is not in error state")),
        (_, Event::Create) => Err(Rejection::InvalidState("volume already exists")),

        (state, Event::Snapshot | Event::SnapDelete) => Ok(Transition::direct(state, state)),

        (Available, Event::Attach) => Ok(Transition::direct(Available, Attached)),
        (Attached | Mounted, Event::Attach) => Err(Rejection::AlreadyAttached),

        (Attached, Event::Format) => Ok(Transition::direct(Attached, Attached)),
        (Available, Event::Format) => Err(Rejection::NotAttached),
        (Mounted, Event::Format) => Err(Rejection::InvalidState("volume is mounted")),

        (Attached, Event::Mount) if backing == Backing::Block => {
            Ok(Transition::direct(Attached, Mounted))
        }
        (Available, Event::Mount) if backing == Backing::File => {
            Ok(Transition::direct(Available, Mounted))
        }
        (Available, Event::Mount) => Err(Rejection::NotAttached),
        (Mounted, Event::Mount) => Err(Rejection::InvalidState("volume is already mounted")),

        (Mounted, Event::Unmount) => Ok(Transition::direct(
            Mounted,
            match backing {
                Backing::Block => Attached,
                Backing::File => Available,
            },
        )),
        (_, Event::Unmount) => Err(Rejection::InvalidState("volume is not mounted")),

        (Attached, Event::Detach) => Ok(Transition::direct(Attached, Available)),
        (Available, Event::Detach) => Err(Rejection::NotAttached),
        (Mounted, Event::Detach) => Err(Rejection::InvalidState("volume is mounted")),

        (Available, Event::Delete) => Ok(Transition::through(Available, Deleting, Deleted)),
        (Attached | Mounted, Event::Delete) => {
            Err(Rejection::InvalidState("volume has attachments"))
        }

        (_, Event::Mount) => Err(Rejection::InvalidState("volume cannot be mounted")),
    }
}
