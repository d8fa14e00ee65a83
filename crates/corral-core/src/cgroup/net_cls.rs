//! `net_cls` controller: tags outgoing packets with a class id.

use std::path::{Path, PathBuf};

use super::utils::{create_dir, join, write_control};
use super::{CgroupOptions, Creator, Name, Pather, Resources, Result, Subsystem, Updater};

/// Driver for the `net_cls` hierarchy.
#[derive(Debug, Clone)]
pub struct NetClsController {
    root: PathBuf,
}

impl NetClsController {
    /// Creates a driver for `<root>/net_cls`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.join(Name::NetCls.as_str()),
        }
    }
}

impl Subsystem for NetClsController {
    fn name(&self) -> Name {
        Name::NetCls
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

impl Pather for NetClsController {
    fn path(&self, path: &Path) -> PathBuf {
        join(&self.root, path)
    }
}

impl Creator for NetClsController {
    fn create(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        let dir = self.path(path);
        create_dir(&dir, options)?;
        if let Some(class_id) = resources.network.as_ref().and_then(|n| n.class_id) {
            write_control(&dir.join("net_cls.classid"), &class_id.to_string(), options)?;
        }
        Ok(())
    }
}

impl Updater for NetClsController {
    fn update(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        self.create(path, resources, options)
    }
}
