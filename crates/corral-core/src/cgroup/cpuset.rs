//! `cpuset` controller: pins a group to CPUs and memory nodes.
//!
//! A fresh cpuset group starts with empty `cpuset.cpus` and `cpuset.mems`
//! and refuses tasks until both are filled, so creation copies them down
//! from the nearest ancestor before applying the requested values.

use std::io;
use std::path::{Path, PathBuf};

use super::utils::{create_dir, join, write_control};
use super::{CgroupError, CgroupOptions, Creator, Name, Pather, Resources, Result, Subsystem, Updater};

const CPUS: &str = "cpuset.cpus";
const MEMS: &str = "cpuset.mems";

/// Driver for the `cpuset` hierarchy.
#[derive(Debug, Clone)]
pub struct CpusetController {
    root: PathBuf,
}

impl CpusetController {
    /// Creates a driver for `<root>/cpuset`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.join(Name::Cpuset.as_str()),
        }
    }

    /// Creates `dir` and every missing ancestor below the hierarchy root,
    /// inheriting each one's cpus and mems from its parent.
    fn ensure_parent(&self, dir: &Path, options: &CgroupOptions) -> Result<()> {
        if dir == self.root || !dir.starts_with(&self.root) {
            return Ok(());
        }
        let Some(parent) = dir.parent() else {
            return Ok(());
        };
        self.ensure_parent(parent, options)?;
        create_dir(dir, options)?;
        copy_if_empty(parent, dir, CPUS, options)?;
        copy_if_empty(parent, dir, MEMS, options)
    }
}

/// Reads a cpuset file, treating a missing file as empty.
fn read_value(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(v) => Ok(v.trim().to_owned()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(CgroupError::io(path, e)),
    }
}

fn copy_if_empty(parent: &Path, dir: &Path, file: &str, options: &CgroupOptions) -> Result<()> {
    if !read_value(&dir.join(file))?.is_empty() {
        return Ok(());
    }
    let inherited = read_value(&parent.join(file))?;
    if inherited.is_empty() {
        return Ok(());
    }
    write_control(&dir.join(file), &inherited, options)
}

impl Subsystem for CpusetController {
    fn name(&self) -> Name {
        Name::Cpuset
    }

    fn as_pather(&self) -> Option<&dyn Pather> {
        Some(self)
    }

    fn as_creator(&self) -> Option<&dyn Creator> {
        Some(self)
    }

    fn as_updater(&self) -> Option<&dyn Updater> {
        Some(self)
    }
}

impl Pather for CpusetController {
    fn path(&self, path: &Path) -> PathBuf {
        join(&self.root, path)
    }
}

impl Creator for CpusetController {
    fn create(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        let dir = self.path(path);
        self.ensure_parent(&dir, options)?;
        let Some(cpu) = &resources.cpu else {
            return Ok(());
        };
        for (file, value) in [(CPUS, &cpu.cpus), (MEMS, &cpu.mems)] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                write_control(&dir.join(file), value, options)?;
            }
        }
        Ok(())
    }
}

impl Updater for CpusetController {
    fn update(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        self.create(path, resources, options)
    }
}
