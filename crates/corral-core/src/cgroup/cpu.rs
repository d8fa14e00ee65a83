//! `cpu` controller: CFS and realtime bandwidth, shares, throttling stats.

use std::path::{Path, PathBuf};

use super::utils::{create_dir, join, parse_kv, read_file, write_control};
use super::{
    CgroupOptions, Creator, Metrics, Name, Pather, Resources, Result, Stater, Subsystem,
    ThrottlingStat, Updater,
};

/// Driver for the `cpu` hierarchy.
#[derive(Debug, Clone)]
pub struct CpuController {
    root: PathBuf,
}

impl CpuController {
    /// Creates a driver for `<root>/cpu`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.join(Name::Cpu.as_str()),
        }
    }
}

impl Subsystem for CpuController {
    fn name(&self) -> Name {
        Name::Cpu
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

impl Pather for CpuController {
    fn path(&self, path: &Path) -> PathBuf {
        join(&self.root, path)
    }
}

impl Creator for CpuController {
    fn create(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        let dir = self.path(path);
        create_dir(&dir, options)?;
        let Some(cpu) = &resources.cpu else {
            return Ok(());
        };
        // The period must land before a quota that only fits the new period.
        let tunables = [
            ("rt_period_us", cpu.realtime_period.map(|v| v.to_string())),
            ("rt_runtime_us", cpu.realtime_runtime.map(|v| v.to_string())),
            ("shares", cpu.shares.map(|v| v.to_string())),
            ("cfs_period_us", cpu.period.map(|v| v.to_string())),
            ("cfs_quota_us", cpu.quota.map(|v| v.to_string())),
        ];
        for (name, value) in tunables {
            if let Some(value) = value {
                write_control(&dir.join(format!("cpu.{name}")), &value, options)?;
                tracing::debug!(path = %dir.display(), tunable = name, value = %value, "cpu tunable set");
            }
        }
        Ok(())
    }
}

impl Updater for CpuController {
    fn update(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        self.create(path, resources, options)
    }
}

impl Stater for CpuController {
    fn stat(&self, path: &Path) -> Result<Metrics> {
        let file = self.path(path).join("cpu.stat");
        let content = read_file(&file)?;
        let mut stat = ThrottlingStat::default();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let (key, value) = parse_kv(line, &file)?;
            match key {
                "nr_periods" => stat.periods = value,
                "nr_throttled" => stat.throttled_periods = value,
                "throttled_time" => stat.throttled_time = value,
                _ => {}
            }
        }
        Ok(Metrics::Throttling(stat))
    }
}
