// SPDX-License-Identifier: GPL-3.0-only

pub mod block;
pub mod enumerator;
pub mod lifecycle;
pub mod mount;

pub use block::BlockDriver;
pub use enumerator::Enumerator;
pub use lifecycle::LifecycleDriver;
pub use mount::MountDriver;
