//! `pids` controller: task count limit and accounting.

use std::path::{Path, PathBuf};

use super::utils::{create_dir, join, parse_uint, read_file, read_uint, write_control};
use super::{
    CgroupOptions, Creator, Metrics, Name, Pather, PidsStat, Resources, Result, Stater, Subsystem,
    Updater,
};

/// Driver for the `pids` hierarchy.
#[derive(Debug, Clone)]
pub struct PidsController {
    root: PathBuf,
}

impl PidsController {
    /// Creates a driver for `<root>/pids`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.join(Name::Pids.as_str()),
        }
    }
}

impl Subsystem for PidsController {
    fn name(&self) -> Name {
        Name::Pids
    }

    fn as_pather(&self) -> Option<&dyn Pather> {
        Some(self)
    }

    fn as_creator(&self) -> Option<&dyn Creator> {
        Some(self)
    }

    fn as_stater(&self) -> Option<&dyn Stater> {
        Some(self)
    }

    fn as_updater(&self) -> Option<&dyn Updater> {
        Some(self)
    }
}

impl Pather for PidsController {
    fn path(&self, path: &Path) -> PathBuf {
        join(&self.root, path)
    }
}

impl Creator for PidsController {
    fn create(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        let dir = self.path(path);
        create_dir(&dir, options)?;
        let Some(pids) = resources.pids else {
            return Ok(());
        };
        let value = match pids.limit {
            0 => return Ok(()),
            limit if limit < 0 => "max".to_owned(),
            limit => limit.to_string(),
        };
        write_control(&dir.join("pids.max"), &value, options)?;
        tracing::debug!(path = %dir.display(), limit = %value, "pids limit set");
        Ok(())
    }
}

impl Updater for PidsController {
    fn update(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        self.create(path, resources, options)
    }
}

impl Stater for PidsController {
    fn stat(&self, path: &Path) -> Result<Metrics> {
        let dir = self.path(path);
        let current = read_uint(&dir.join("pids.current"))?;
        let max_path = dir.join("pids.max");
        let max = read_file(&max_path)?;
        let limit = match max.trim() {
            "max" => 0,
            value => parse_uint(value, &max_path)?,
        };
        Ok(Metrics::Pids(PidsStat { current, limit }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::PidsResources;
    use crate::cgroup::testing::{options, read};

    fn with_limit(limit: i64) -> Resources {
        Resources {
            pids: Some(PidsResources { limit }),
            ..Resources::default()
        }
    }

    #[test]
    fn limit_rules() {
        let root = tempfile::tempdir().expect("tempdir");
        let driver = PidsController::new(root.path());

        driver.create(Path::new("/a"), &with_limit(64), &options()).expect("positive");
        assert_eq!(read(&root.path().join("pids/a/pids.max")), "64");

        driver.create(Path::new("/b"), &with_limit(-1), &options()).expect("negative");
        assert_eq!(read(&root.path().join("pids/b/pids.max")), "max");

        driver.create(Path::new("/c"), &with_limit(0), &options()).expect("zero");
        assert!(root.path().join("pids/c").is_dir());
        assert!(!root.path().join("pids/c/pids.max").exists());
    }

    #[test]
    fn stat_reports_unlimited_as_zero() {
        let root = tempfile::tempdir().expect("tempdir");
        let dir = root.path().join("pids/web");
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("pids.current"), "3\n").expect("write");
        std::fs::write(dir.join("pids.max"), "max\n").expect("write");

        let driver = PidsController::new(root.path());
        let Metrics::Pids(stat) = driver.stat(Path::new("web")).expect("stat") else {
            panic!("wrong fragment");
        };
        assert_eq!(stat, PidsStat { current: 3, limit: 0 });

        std::fs::write(dir.join("pids.max"), "128\n").expect("write");
        let Metrics::Pids(stat) = driver.stat(Path::new("web")).expect("stat") else {
            panic!("wrong fragment");
        };
        assert_eq!(stat.limit, 128);
    }
}
