//! `net_prio` controller: per-interface traffic priorities.

use std::path::{Path, PathBuf};

use super::utils::{create_dir, join, write_control};
use super::{CgroupOptions, Creator, Name, Pather, Resources, Result, Subsystem, Updater};

/// Driver for the `net_prio` hierarchy.
#[derive(Debug, Clone)]
pub struct NetPrioController {
    root: PathBuf,
}

impl NetPrioController {
    /// Creates a driver for `<root>/net_prio`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.join(Name::NetPrio.as_str()),
        }
    }
}

impl Subsystem for NetPrioController {
    fn name(&self) -> Name {
        Name::NetPrio
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

impl Pather for NetPrioController {
    fn path(&self, path: &Path) -> PathBuf {
        join(&self.root, path)
    }
}

impl Creator for NetPrioController {
    fn create(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        let dir = self.path(path);
        create_dir(&dir, options)?;
        let Some(network) = &resources.network else {
            return Ok(());
        };
        // The kernel takes one "<iface> <prio>" pair per write.
        let file = dir.join("net_prio.ifpriomap");
        for entry in &network.priorities {
            write_control(&file, &format!("{} {}", entry.name, entry.priority), options)?;
        }
        Ok(())
    }
}

impl Updater for NetPrioController {
    fn update(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        self.create(path, resources, options)
    }
}
