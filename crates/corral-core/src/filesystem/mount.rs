//! Pseudo-filesystem mounts and path hardening inside the container.

use std::path::Path;

use nix::mount::{MsFlags, mount};

use corral_common::error::Result;

use super::sys_error;

/// What a hardening target turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// Nothing exists at the path; hardening skips it.
    Missing,
    /// A directory.
    Directory,
    /// Any other file type.
    File,
}

impl PathKind {
    /// Inspects a path without following a trailing symlink.
    #[must_use]
    pub fn of(path: &Path) -> Self {
        match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => Self::Directory,
            Ok(_) => Self::File,
            Err(_) => Self::Missing,
        }
    }
}

/// Mounts a fresh procfs on `/proc` with `noexec,nosuid,nodev`.
///
/// # Errors
///
/// Returns an error if `mount(2)` fails.
pub fn mount_proc() -> Result<()> {
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| sys_error("mount", "/proc", e))?;
    tracing::debug!("mounted /proc");
    Ok(())
}

/// Mounts a tmpfs on `/dev` with mode 0755, `nosuid` and `strictatime`.
///
/// # Errors
///
/// Returns an error if `mount(2)` fails.
pub fn mount_dev() -> Result<()> {
    mount(
        Some("tmpfs"),
        "/dev",
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| sys_error("mount", "/dev", e))?;
    tracing::debug!("mounted /dev");
    Ok(())
}

/// Makes `path` read-only by bind-mounting it onto itself and remounting
/// the bind read-only. Missing paths are skipped.
///
/// # Errors
///
/// Returns an error if either mount fails.
pub fn readonly_path(path: &Path) -> Result<()> {
    if PathKind::of(path) == PathKind::Missing {
        tracing::debug!(path = %path.display(), "read-only path missing, skipped");
        return Ok(());
    }
    let shown = path.display();
    mount(
        Some(path),
        path,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| sys_error("bind mount", &shown, e))?;
    mount(
        Some(path),
        path,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| sys_error("remount read-only", &shown, e))?;
    Ok(())
}

/// Hides `path`: files get `/dev/null` bind-mounted over them, directories
/// an empty read-only tmpfs. Missing paths are skipped.
///
/// # Errors
///
/// Returns an error if the mount fails.
pub fn mask_path(path: &Path) -> Result<()> {
    let shown = path.display();
    match PathKind::of(path) {
        PathKind::Missing => {
            tracing::debug!(path = %shown, "masked path missing, skipped");
            Ok(())
        }
        PathKind::Directory => mount(
            Some("tmpfs"),
            path,
            Some("tmpfs"),
            MsFlags::MS_RDONLY,
            None::<&str>,
        )
        .map_err(|e| sys_error("mask directory", &shown, e)),
        PathKind::File => mount(
            Some("/dev/null"),
            path,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| sys_error("mask file", &shown, e)),
    }
}

/// Remounts the container's `/` read-only.
///
/// # Errors
///
/// Returns an error if the remount fails.
pub fn readonly_root() -> Result<()> {
    mount(
        Some("/"),
        "/",
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        None::<&str>,
    )
    .map_err(|e| sys_error("remount read-only", "/", e))?;
    tracing::debug!("root filesystem remounted read-only");
    Ok(())
}
