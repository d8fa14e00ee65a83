//! `memory` controller: limits, swap, kernel memory and accounting.

use std::path::{Path, PathBuf};

use super::utils::{create_dir, join, parse_kv, read_file, read_uint, write_control};
use super::{
    CgroupOptions, Creator, MemoryEntry, MemoryStat, Metrics, Name, Pather, Resources, Result,
    Stater, Subsystem, Updater,
};

/// Driver for the `memory` hierarchy.
#[derive(Debug, Clone)]
pub struct MemoryController {
    root: PathBuf,
}

impl MemoryController {
    /// Creates a driver for `<root>/memory`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.join(Name::Memory.as_str()),
        }
    }
}

/// Reads the usage, max usage, fail count and limit of one accounting
/// domain. `module` is empty for plain memory, otherwise `memsw`, `kmem`
/// or `kmem.tcp`.
fn read_entry(dir: &Path, module: &str) -> Result<MemoryEntry> {
    let file = |name: &str| {
        if module.is_empty() {
            dir.join(format!("memory.{name}"))
        } else {
            dir.join(format!("memory.{module}.{name}"))
        }
    };
    Ok(MemoryEntry {
        usage: read_uint(&file("usage_in_bytes"))?,
        max: read_uint(&file("max_usage_in_bytes"))?,
        failcnt: read_uint(&file("failcnt"))?,
        limit: read_uint(&file("limit_in_bytes"))?,
    })
}

/// Like [`read_entry`], but a domain the kernel does not account is absent.
fn read_optional_entry(dir: &Path, module: &str) -> Result<Option<MemoryEntry>> {
    match read_entry(dir, module) {
        Ok(entry) => Ok(Some(entry)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

impl Subsystem for MemoryController {
    fn name(&self) -> Name {
        Name::Memory
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

impl Pather for MemoryController {
    fn path(&self, path: &Path) -> PathBuf {
        join(&self.root, path)
    }
}

impl Creator for MemoryController {
    fn create(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        let dir = self.path(path);
        create_dir(&dir, options)?;
        let Some(memory) = &resources.memory else {
            return Ok(());
        };
        let mut tunables = [
            ("limit_in_bytes", memory.limit.map(|v| v.to_string())),
            ("memsw.limit_in_bytes", memory.swap.map(|v| v.to_string())),
            ("kmem.limit_in_bytes", memory.kernel.map(|v| v.to_string())),
            ("kmem.tcp.limit_in_bytes", memory.kernel_tcp.map(|v| v.to_string())),
            ("swappiness", memory.swappiness.map(|v| v.to_string())),
            ("soft_limit_in_bytes", memory.reservation.map(|v| v.to_string())),
            (
                "oom_control",
                memory.disable_oom_killer.filter(|d| *d).map(|_| "1".to_owned()),
            ),
        ];
        // memsw must never be below the plain limit. The limit goes first
        // unless it rises above the memsw already in place.
        if let (Some(limit), Some(_)) = (memory.limit, memory.swap) {
            let current = read_uint(&dir.join("memory.memsw.limit_in_bytes"));
            if current.is_ok_and(|current| swap_first(limit, current)) {
                tunables.swap(0, 1);
            }
        }
        for (name, value) in tunables {
            if let Some(value) = value {
                write_control(&dir.join(format!("memory.{name}")), &value, options)?;
                tracing::debug!(path = %dir.display(), tunable = name, value = %value, "memory tunable set");
            }
        }
        Ok(())
    }
}

/// Whether a new `limit` exceeds the current memsw limit. Negative limits
/// mean unlimited.
fn swap_first(limit: i64, current_swap: u64) -> bool {
    u64::try_from(limit).unwrap_or(u64::MAX) > current_swap
}

impl Updater for MemoryController {
    fn update(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        self.create(path, resources, options)
    }
}

impl Stater for MemoryController {
    fn stat(&self, path: &Path) -> Result<Metrics> {
        let dir = self.path(path);
        let stat_path = dir.join("memory.stat");
        let mut stat = MemoryStat::default();
        for line in read_file(&stat_path)?.lines().filter(|l| !l.trim().is_empty()) {
            let (key, value) = parse_kv(line, &stat_path)?;
            stat.set(key, value);
        }
        stat.usage = read_entry(&dir, "")?;
        stat.swap = read_optional_entry(&dir, "memsw")?;
        stat.kernel = read_optional_entry(&dir, "kmem")?;
        stat.kernel_tcp = read_optional_entry(&dir, "kmem.tcp")?;
        Ok(Metrics::Memory(stat))
    }
}
