//! Container lifecycle for the corral runtime.
//!
//! [`container::Container`] is the entry point. It owns the container's
//! cgroup through [`manager::ResourceManager`], persists a
//! [`state::State`] snapshot, and starts the init process with the
//! bootstrap protocol in [`bootstrap`] and [`process`]. The init side of
//! that protocol lives in `init`.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod bootstrap;
pub mod container;
#[cfg(target_os = "linux")]
pub mod init;
pub mod manager;
pub mod proc;
pub mod process;
pub mod state;
