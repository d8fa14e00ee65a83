//! Kernel parameters written under `/proc/sys`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

/// Location of the sysctl tree inside a freshly mounted `/proc`.
pub const PROC_SYS: &str = "/proc/sys";

/// Maps a dotted sysctl key such as `net.ipv4.ip_forward` to its file
/// under `root`.
///
/// # Errors
///
/// Returns [`CorralError::Config`] for keys with empty or `..` components.
pub fn sysctl_path(root: &Path, key: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for part in key.split(['.', '/']) {
        if part.is_empty() || part == ".." {
            return Err(CorralError::Config {
                message: format!("invalid sysctl key {key:?}"),
            });
        }
        path.push(part);
    }
    Ok(path)
}

/// Writes one kernel parameter.
///
/// # Errors
///
/// Returns an error if the key is malformed or the write fails.
pub fn write(root: &Path, key: &str, value: &str) -> Result<()> {
    let path = sysctl_path(root, key)?;
    std::fs::write(&path, value).map_err(|e| CorralError::Io {
        path: path.clone(),
        source: e,
    })?;
    tracing::debug!(key, value, "sysctl written");
    Ok(())
}

/// Writes every configured kernel parameter, stopping at the first failure.
///
/// # Errors
///
/// Returns the first failed write.
pub fn apply(root: &Path, sysctl: &BTreeMap<String, String>) -> Result<()> {
    for (key, value) in sysctl {
        write(root, key, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dots_become_directories() {
        assert_eq!(
            sysctl_path(Path::new("/proc/sys"), "net.ipv4.ip_forward").expect("path"),
            PathBuf::from("/proc/sys/net/ipv4/ip_forward")
        );
        assert_eq!(
            sysctl_path(Path::new("/proc/sys"), "kernel/msgmax").expect("path"),
            PathBuf::from("/proc/sys/kernel/msgmax")
        );
    }

    #[test]
    fn escaping_keys_are_rejected() {
        for key in ["", "net..ipv4", "../../etc/passwd", "net.ipv4."] {
            assert!(sysctl_path(Path::new("/proc/sys"), key).is_err(), "{key:?}");
        }
    }

    #[test]
    fn apply_writes_each_value() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(root.path().join("net/ipv4")).expect("mkdir");
        std::fs::create_dir_all(root.path().join("kernel")).expect("mkdir");
        let sysctl = BTreeMap::from([
            ("net.ipv4.ip_forward".to_owned(), "1".to_owned()),
            ("kernel.msgmax".to_owned(), "8192".to_owned()),
        ]);
        apply(root.path(), &sysctl).expect("apply");
        let read = |p: &str| std::fs::read_to_string(root.path().join(p)).expect("read");
        assert_eq!(read("net/ipv4/ip_forward"), "1");
        assert_eq!(read("kernel/msgmax"), "8192");
    }

    #[test]
    fn missing_parameter_fails() {
        let root = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            write(root.path(), "vm.nope", "1"),
            Err(CorralError::Io { .. })
        ));
    }
}
