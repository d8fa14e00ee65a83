//! The device nodes, directories and links every container `/dev` gets.

use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::Path;

use nix::sys::stat::{Mode, SFlag, makedev, mknod};

use corral_common::error::{CorralError, Result};

use super::sys_error;

/// A character device created in the container's `/dev`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Device {
    /// File name under `/dev`.
    pub name: &'static str,
    /// Device major number.
    pub major: u64,
    /// Device minor number.
    pub minor: u64,
    /// Permission bits.
    pub mode: u32,
}

/// Standard character devices.
pub const DEFAULT_DEVICES: [Device; 6] = [
    Device { name: "null", major: 1, minor: 3, mode: 0o666 },
    Device { name: "zero", major: 1, minor: 5, mode: 0o666 },
    Device { name: "full", major: 1, minor: 7, mode: 0o666 },
    Device { name: "random", major: 1, minor: 8, mode: 0o666 },
    Device { name: "urandom", major: 1, minor: 9, mode: 0o666 },
    Device { name: "tty", major: 5, minor: 0, mode: 0o666 },
];

/// Directories created under `/dev`.
pub const DEV_DIRS: [&str; 2] = ["pts", "shm"];

/// Symlinks created under `/dev`, as `(name, target)`.
pub const DEV_LINKS: [(&str, &str); 4] = [
    ("fd", "/proc/self/fd"),
    ("stdin", "/proc/self/fd/0"),
    ("stdout", "/proc/self/fd/1"),
    ("stderr", "/proc/self/fd/2"),
];

/// Creates the device nodes, directories and links under `dev`.
///
/// # Errors
///
/// Returns an error if any node, directory or link cannot be created.
pub fn populate(dev: &Path) -> Result<()> {
    for device in DEFAULT_DEVICES {
        create_node(dev, device)?;
    }
    create_dirs_and_links(dev)?;
    tracing::debug!(dev = %dev.display(), "populated /dev");
    Ok(())
}

fn create_node(dev: &Path, device: Device) -> Result<()> {
    let path = dev.join(device.name);
    mknod(
        &path,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(device.mode),
        makedev(device.major, device.minor),
    )
    .map_err(|e| sys_error("mknod", path.display(), e))?;
    // mknod honours the umask; the final mode is set explicitly.
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(device.mode))
        .map_err(|e| CorralError::Io { path, source: e })
}

/// Creates the `/dev` directories and links, the part of [`populate`]
/// that needs no privileges.
///
/// # Errors
///
/// Returns an error if a directory or link cannot be created.
pub fn create_dirs_and_links(dev: &Path) -> Result<()> {
    for dir in DEV_DIRS {
        let path = dev.join(dir);
        std::fs::create_dir_all(&path).map_err(|e| CorralError::Io { path, source: e })?;
    }
    for (name, target) in DEV_LINKS {
        let path = dev.join(name);
        symlink(target, &path).map_err(|e| CorralError::Io { path, source: e })?;
    }
    Ok(())
}
