//! Root filesystem switching via `pivot_root(2)`.
//!
//! Unlike `chroot`, `pivot_root` replaces the root mount of the namespace,
//! so the host filesystem can be detached entirely afterwards.

use std::path::Path;

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::unistd::{chdir, pivot_root as sys_pivot_root};

use corral_common::error::Result;

use super::sys_error;

/// Makes `rootfs` the new `/` and detaches the old root.
///
/// Mount events are first made private so the bind mount and the detach
/// never propagate to the host. The rootfs is bind-mounted onto itself
/// because `pivot_root` needs a mount point, then pivoted with the old root
/// stacked on the same directory and lazily unmounted.
///
/// # Errors
///
/// Returns an error if any mount, `chdir` or `pivot_root` call fails.
pub fn pivot_root(rootfs: &Path) -> Result<()> {
    let shown = rootfs.display();
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| sys_error("make-rprivate", "/", e))?;
    mount(
        Some(rootfs),
        rootfs,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| sys_error("bind mount", &shown, e))?;
    chdir(rootfs).map_err(|e| sys_error("chdir", &shown, e))?;
    sys_pivot_root(".", ".").map_err(|e| sys_error("pivot_root", &shown, e))?;
    umount2(".", MntFlags::MNT_DETACH).map_err(|e| sys_error("umount old root", ".", e))?;
    chdir("/").map_err(|e| sys_error("chdir", "/", e))?;
    tracing::debug!(rootfs = %shown, "pivoted into container rootfs");
    Ok(())
}

/// Remounts `/` private and recursive so later mounts stay inside the
/// container.
///
/// # Errors
///
/// Returns an error if the remount fails.
pub fn make_root_private() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| sys_error("make-rprivate", "/", e))
}
