//! # corral-core
//!
//! Linux isolation primitives for the corral runtime.
//!
//! - **Cgroups v1**: one driver per controller behind capability traits,
//!   tied together by [`cgroup::Cgroup`].
//! - **Namespaces**: clone flags and `/proc/<pid>/ns` path resolution.
//! - **Filesystem**: `pivot_root`, `/proc` and `/dev` setup, read-only and
//!   masked paths.
//! - **Sysctl**: kernel parameters under `/proc/sys`.
//!
//! Mount and namespace syscalls are Linux-only and compiled out elsewhere.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod cgroup;
#[cfg(target_os = "linux")]
pub mod filesystem;
pub mod namespace;
pub mod sysctl;
