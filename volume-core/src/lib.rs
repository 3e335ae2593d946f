// SPDX-License-Identifier: GPL-3.0-only

//! Volume lifecycle orchestration.
//!
//! The [`Manager`] owns a [`registry::Registry`] of volumes for one driver
//! and moves them through the [`state`] machine. Drivers plug in through the
//! capability traits of `volume-contracts`; a missing capability surfaces as
//! [`VolumeError::Unsupported`].

pub mod config;
pub mod dispatch;
pub mod error;
pub mod locks;
pub mod manager;
pub mod matcher;
pub mod registry;
pub mod state;

pub use config::{ManagerConfig, ReusePolicy};
pub use error::{Result, VolumeError};
pub use manager::Manager;
pub use matcher::LocatorQuery;
pub use state::{Backing, Event};
