//! Root filesystem setup inside the container's mount namespace.
//!
//! Runs in the container init after the clone, in this order:
//! [`pivot_root::pivot_root`], [`pivot_root::make_root_private`],
//! [`mount::mount_proc`], [`mount::mount_dev`], [`devices::populate`],
//! then path hardening with [`mount::readonly_path`] and
//! [`mount::mask_path`], and finally [`mount::readonly_root`] when the
//! container asks for a read-only rootfs.

pub mod devices;
pub mod mount;
pub mod pivot_root;

use corral_common::error::CorralError;

/// Wraps a failed mount-related syscall with its target.
pub(crate) fn sys_error(call: &str, target: impl std::fmt::Display, err: nix::errno::Errno) -> CorralError {
    CorralError::sys(format!("{call} {target}"), err)
}
