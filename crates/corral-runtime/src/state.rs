//! Persisted container state.
//!
//! The state file is written to a temporary file in the container
//! directory and renamed over `state.json`, so a reader sees either the
//! previous state or the new one, never a partial write.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use corral_common::config::Config;
use corral_common::constants::STATE_FILENAME;
use corral_common::error::{CorralError, Result};
use corral_common::types::NamespaceType;

/// Snapshot of a container, as stored in `<root>/<id>/state.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Container identifier.
    pub id: String,
    /// Container configuration.
    pub config: Config,
    /// Host pid of the init process; zero before the container starts.
    pub init_process_pid: i32,
    /// Start time of the init process in clock ticks since boot.
    pub init_process_start: u64,
    /// When the container was created.
    pub created: DateTime<Utc>,
    /// Namespace paths of the init process.
    #[serde(default)]
    pub namespace_paths: BTreeMap<NamespaceType, String>,
    /// Cgroup directory per controller.
    #[serde(default)]
    pub cgroup_paths: BTreeMap<String, PathBuf>,
}

impl State {
    /// Path of the state file inside a container directory.
    #[must_use]
    pub fn path(dir: &Path) -> PathBuf {
        dir.join(STATE_FILENAME)
    }

    /// Atomically replaces the state file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be serialized, written or
    /// renamed into place.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let staged = self.stage(dir)?;
        commit(staged, dir)
    }

    /// Writes the serialized state to a synced temporary file in `dir`.
    pub(crate) fn stage(&self, dir: &Path) -> Result<tempfile::NamedTempFile> {
        let io_err = |e| CorralError::Io {
            path: dir.to_path_buf(),
            source: e,
        };
        let mut file = tempfile::Builder::new()
            .prefix("state-")
            .tempfile_in(dir)
            .map_err(io_err)?;
        serde_json::to_writer(&mut file, self)?;
        file.flush().map_err(io_err)?;
        file.as_file().sync_all().map_err(io_err)?;
        Ok(file)
    }

    /// Reads the state file from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if no state file exists, or an
    /// error if it cannot be read or parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = Self::path(dir);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CorralError::NotFound {
                    kind: "container",
                    id: dir
                        .file_name()
                        .map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
                }
            } else {
                CorralError::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        let state = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "state loaded");
        Ok(state)
    }

    /// Removes the state file from `dir`. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(dir: &Path) -> Result<()> {
        let path = Self::path(dir);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::Io { path, source: e }),
        }
    }
}

fn commit(staged: tempfile::NamedTempFile, dir: &Path) -> Result<()> {
    let path = State::path(dir);
    let _ = staged.persist(&path).map_err(|e| CorralError::Io {
        path: path.clone(),
        source: e.error,
    })?;
    tracing::debug!(path = %path.display(), "state saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: i32) -> State {
        State {
            id: "web".into(),
            config: Config {
                rootfs: "/rootfs".into(),
                hostname: "web".into(),
                ..Config::default()
            },
            init_process_pid: pid,
            init_process_start: 1234,
            created: Utc::now(),
            namespace_paths: BTreeMap::from([(NamespaceType::Mount, "/proc/7/ns/mnt".to_owned())]),
            cgroup_paths: BTreeMap::from([("cpu".to_owned(), PathBuf::from("/sys/fs/cgroup/cpu/web"))]),
        }
    }

    #[test]
    fn save_then_load_returns_same_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = sample(7);
        state.save(dir.path()).expect("save");
        assert_eq!(State::load(dir.path()).expect("load"), state);
    }

    #[test]
    fn namespace_keys_use_clone_flag_names() {
        let json = serde_json::to_value(sample(7)).expect("serialize");
        assert_eq!(json["namespace_paths"]["NEWNS"], "/proc/7/ns/mnt");
    }

    #[test]
    fn save_leaves_no_temporary_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        sample(1).save(dir.path()).expect("save");
        sample(2).save(dir.path()).expect("save again");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .map(|e| e.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from(STATE_FILENAME)]);
    }

    #[test]
    fn interrupted_save_keeps_previous_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let old = sample(1);
        old.save(dir.path()).expect("save");

        // Stage the new state but never rename it, as if the process died
        // between the write and the rename.
        let staged = sample(2).stage(dir.path()).expect("stage");
        let _leftover = staged.into_temp_path().keep().expect("keep");

        assert_eq!(State::load(dir.path()).expect("load"), old);
    }

    #[test]
    fn load_without_state_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            State::load(dir.path()),
            Err(CorralError::NotFound { kind: "container", .. })
        ));
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        sample(1).save(dir.path()).expect("save");
        State::remove(dir.path()).expect("remove");
        State::remove(dir.path()).expect("remove again");
        assert!(!State::path(dir.path()).exists());
    }
}
