//! `cpuacct` controller: CPU time accounting. Read-only.

use std::path::{Path, PathBuf};

use super::utils::{join, parse_kv, parse_uint, read_file, read_uint};
use super::{CpuUsage, Metrics, Name, Pather, Result, Stater, Subsystem};

/// Clock ticks per second used by `cpuacct.stat`.
const USER_HZ: u64 = 100;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Driver for the `cpuacct` hierarchy.
#[derive(Debug, Clone)]
pub struct CpuacctController {
    root: PathBuf,
}

impl CpuacctController {
    /// Creates a driver for `<root>/cpuacct`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.join(Name::Cpuacct.as_str()),
        }
    }
}

impl Subsystem for CpuacctController {
    fn name(&self) -> Name {
        Name::Cpuacct
    }

    fn as_pather(&self) -> Option<&dyn Pather> {
        Some(self)
    }

    fn as_stater(&self) -> Option<&dyn Stater> {
        Some(self)
    }
}

impl Pather for CpuacctController {
    fn path(&self, path: &Path) -> PathBuf {
        join(&self.root, path)
    }
}

impl Stater for CpuacctController {
    fn stat(&self, path: &Path) -> Result<Metrics> {
        let dir = self.path(path);
        let total = read_uint(&dir.join("cpuacct.usage"))?;

        let percpu_path = dir.join("cpuacct.usage_percpu");
        let per_cpu = read_file(&percpu_path)?
            .split_whitespace()
            .map(|v| parse_uint(v, &percpu_path))
            .collect::<Result<Vec<_>>>()?;

        let stat_path = dir.join("cpuacct.stat");
        let mut usage = CpuUsage {
            total,
            per_cpu,
            ..CpuUsage::default()
        };
        for line in read_file(&stat_path)?.lines().filter(|l| !l.trim().is_empty()) {
            let (key, ticks) = parse_kv(line, &stat_path)?;
            let nanos = ticks.saturating_mul(NANOS_PER_SECOND) / USER_HZ;
            match key {
                "user" => usage.user = nanos,
                "system" => usage.kernel = nanos,
                _ => {}
            }
        }
        Ok(Metrics::CpuUsage(usage))
    }
}
