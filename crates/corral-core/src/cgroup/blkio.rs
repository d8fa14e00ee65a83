//! `blkio` controller: I/O weights and per-device accounting.
//!
//! Accounting comes from one of two file families. The CFQ scheduler
//! exposes `blkio.*_recursive` files; without it only the
//! `blkio.throttle.*` pair exists. The CFQ family is preferred when
//! present. Lines look like `8:0 Read 4096`, or `8:0 4096` for files
//! without an operation column, and a trailing `Total N` line is skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use corral_common::constants::PROC_ROOT;

use super::utils::{create_dir, join, parse_uint, read_file, write_control};
use super::{
    BlkioEntry, BlkioStat, CgroupError, CgroupOptions, Creator, Metrics, Name, Pather, Resources,
    Result, Stater, Subsystem, Updater,
};

const SYS_ROOT: &str = "/sys";

/// Driver for the `blkio` hierarchy.
#[derive(Debug, Clone)]
pub struct BlkioController {
    root: PathBuf,
    sys_root: PathBuf,
    proc_root: PathBuf,
}

impl BlkioController {
    /// Creates a driver for `<root>/blkio`, resolving device names through
    /// `/sys` and `/proc`.
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self::with_device_roots(root, Path::new(SYS_ROOT), Path::new(PROC_ROOT))
    }

    /// Creates a driver that resolves device names under other sysfs and
    /// procfs mounts.
    #[must_use]
    pub fn with_device_roots(root: &Path, sys_root: &Path, proc_root: &Path) -> Self {
        Self {
            root: root.join(Name::Blkio.as_str()),
            sys_root: sys_root.to_path_buf(),
            proc_root: proc_root.to_path_buf(),
        }
    }
}

/// Resolves `major:minor` pairs to kernel device names, caching lookups
/// for the duration of one stat call.
struct DeviceNames<'a> {
    sys_root: &'a Path,
    proc_root: &'a Path,
    cache: HashMap<(u64, u64), String>,
    partitions: Option<HashMap<(u64, u64), String>>,
}

impl<'a> DeviceNames<'a> {
    fn new(sys_root: &'a Path, proc_root: &'a Path) -> Self {
        Self {
            sys_root,
            proc_root,
            cache: HashMap::new(),
            partitions: None,
        }
    }

    fn lookup(&mut self, major: u64, minor: u64) -> String {
        if let Some(name) = self.cache.get(&(major, minor)) {
            return name.clone();
        }
        let name = self
            .from_uevent(major, minor)
            .or_else(|| self.from_partitions(major, minor))
            .unwrap_or_default();
        let _ = self.cache.insert((major, minor), name.clone());
        name
    }

    fn from_uevent(&self, major: u64, minor: u64) -> Option<String> {
        let uevent = self
            .sys_root
            .join(format!("dev/block/{major}:{minor}/uevent"));
        let content = std::fs::read_to_string(uevent).ok()?;
        content
            .lines()
            .find_map(|l| l.strip_prefix("DEVNAME="))
            .map(str::to_owned)
    }

    fn from_partitions(&mut self, major: u64, minor: u64) -> Option<String> {
        let proc_root = self.proc_root;
        let table = self.partitions.get_or_insert_with(|| {
            let content = std::fs::read_to_string(proc_root.join("partitions")).unwrap_or_default();
            content
                .lines()
                .filter_map(|line| {
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    let [major, minor, _blocks, name] = fields.as_slice() else {
                        return None;
                    };
                    Some(((major.parse().ok()?, minor.parse().ok()?), (*name).to_owned()))
                })
                .collect()
        });
        table.get(&(major, minor)).cloned()
    }
}

fn parse_entries(content: &str, path: &Path, names: &mut DeviceNames<'_>) -> Result<Vec<BlkioEntry>> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let fields: Vec<&str> = line
            .split([' ', ':'])
            .filter(|f| !f.is_empty())
            .collect();
        let (major, minor, op, value) = match fields.as_slice() {
            [] | ["Total", _] => continue,
            [major, minor, value] => (*major, *minor, "", *value),
            [major, minor, op, value, ..] => (*major, *minor, *op, *value),
            _ => {
                return Err(CgroupError::InvalidStatFormat {
                    path: path.to_path_buf(),
                    line: line.to_owned(),
                });
            }
        };
        let major = parse_uint(major, path)?;
        let minor = parse_uint(minor, path)?;
        entries.push(BlkioEntry {
            op: op.to_owned(),
            device: names.lookup(major, minor),
            major,
            minor,
            value: parse_uint(value, path)?,
        });
    }
    Ok(entries)
}

impl Subsystem for BlkioController {
    fn name(&self) -> Name {
        Name::Blkio
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

impl Pather for BlkioController {
    fn path(&self, path: &Path) -> PathBuf {
        join(&self.root, path)
    }
}

impl Creator for BlkioController {
    fn create(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        let dir = self.path(path);
        create_dir(&dir, options)?;
        let Some(block_io) = resources.block_io else {
            return Ok(());
        };
        for (file, value) in [
            ("blkio.weight", block_io.weight),
            ("blkio.leaf_weight", block_io.leaf_weight),
        ] {
            if let Some(value) = value {
                write_control(&dir.join(file), &value.to_string(), options)?;
            }
        }
        Ok(())
    }
}

impl Updater for BlkioController {
    fn update(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()> {
        self.create(path, resources, options)
    }
}

impl Stater for BlkioController {
    fn stat(&self, path: &Path) -> Result<Metrics> {
        let dir = self.path(path);
        let mut names = DeviceNames::new(&self.sys_root, &self.proc_root);
        let mut stat = BlkioStat::default();
        let cfq = dir.join("blkio.io_serviced_recursive").exists();
        let files: Vec<(&str, &mut Vec<BlkioEntry>)> = if cfq {
            vec![
                ("sectors_recursive", &mut stat.sectors_recursive),
                ("io_service_bytes_recursive", &mut stat.io_service_bytes_recursive),
                ("io_serviced_recursive", &mut stat.io_serviced_recursive),
                ("io_queued_recursive", &mut stat.io_queued_recursive),
                ("io_service_time_recursive", &mut stat.io_service_time_recursive),
                ("io_wait_time_recursive", &mut stat.io_wait_time_recursive),
                ("io_merged_recursive", &mut stat.io_merged_recursive),
                ("time_recursive", &mut stat.io_time_recursive),
            ]
        } else {
            vec![
                ("throttle.io_service_bytes", &mut stat.io_service_bytes_recursive),
                ("throttle.io_serviced", &mut stat.io_serviced_recursive),
            ]
        };
        for (name, slot) in files {
            let file = dir.join(format!("blkio.{name}"));
            *slot = parse_entries(&read_file(&file)?, &file, &mut names)?;
        }
        Ok(Metrics::Blkio(stat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::BlockIoResources;
    use crate::cgroup::testing::{files_in, options, read};

    struct Fixture {
        _tmp: tempfile::TempDir,
        driver: BlkioController,
        dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().expect("tempdir");
        let sys = tmp.path().join("sys");
        let proc = tmp.path().join("proc");
        std::fs::create_dir_all(sys.join("dev/block/8:0")).expect("mkdir");
        std::fs::write(sys.join("dev/block/8:0/uevent"), "MAJOR=8\nMINOR=0\nDEVNAME=sda\n").expect("write");
        std::fs::create_dir_all(&proc).expect("mkdir");
        std::fs::write(
            proc.join("partitions"),
            "major minor  #blocks  name\n\n 253        0   1048576 vda\n",
        )
        .expect("write");
        let dir = tmp.path().join("cgroup/blkio/web");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let driver = BlkioController::with_device_roots(&tmp.path().join("cgroup"), &sys, &proc);
        Fixture {
            _tmp: tmp,
            driver,
            dir,
        }
    }

    #[test]
    fn writes_weights() {
        let f = fixture();
        let resources = Resources {
            block_io: Some(BlockIoResources {
                weight: Some(500),
                leaf_weight: None,
            }),
            ..Resources::default()
        };
        f.driver.create(Path::new("web"), &resources, &options()).expect("create");
        assert_eq!(files_in(&f.dir), vec!["blkio.weight"]);
        assert_eq!(read(&f.dir.join("blkio.weight")), "500");
    }

    #[test]
    fn throttle_schema_when_cfq_is_absent() {
        let f = fixture();
        std::fs::write(
            f.dir.join("blkio.throttle.io_service_bytes"),
            "8:0 Read 4096\n8:0 Write 1024\n253:0 Read 7\nTotal 5127\n",
        )
        .expect("write");
        std::fs::write(f.dir.join("blkio.throttle.io_serviced"), "8:0 Read 1\n").expect("write");

        let Metrics::Blkio(stat) = f.driver.stat(Path::new("web")).expect("stat") else {
            panic!("wrong fragment");
        };
        assert_eq!(stat.io_service_bytes_recursive.len(), 3);
        assert_eq!(
            stat.io_service_bytes_recursive[0],
            BlkioEntry {
                op: "Read".into(),
                device: "sda".into(),
                major: 8,
                minor: 0,
                value: 4096,
            }
        );
        assert_eq!(stat.io_service_bytes_recursive[2].device, "vda");
        assert_eq!(stat.io_serviced_recursive.len(), 1);
        assert!(stat.sectors_recursive.is_empty());
    }

    #[test]
    fn cfq_schema_preferred_when_present() {
        let f = fixture();
        for name in [
            "sectors_recursive",
            "io_service_bytes_recursive",
            "io_serviced_recursive",
            "io_queued_recursive",
            "io_service_time_recursive",
            "io_wait_time_recursive",
            "io_merged_recursive",
            "time_recursive",
        ] {
            std::fs::write(f.dir.join(format!("blkio.{name}")), "").expect("write");
        }
        std::fs::write(f.dir.join("blkio.sectors_recursive"), "8:0 16\n").expect("write");
        std::fs::write(f.dir.join("blkio.throttle.io_serviced"), "garbage").expect("write");

        let Metrics::Blkio(stat) = f.driver.stat(Path::new("web")).expect("stat") else {
            panic!("wrong fragment");
        };
        assert_eq!(stat.sectors_recursive.len(), 1);
        assert_eq!(stat.sectors_recursive[0].op, "");
        assert_eq!(stat.sectors_recursive[0].value, 16);
    }

    #[test]
    fn no_schema_is_fatal() {
        let f = fixture();
        let err = f.driver.stat(Path::new("web")).expect_err("no files");
        assert!(err.is_not_found());
    }

    #[test]
    fn malformed_line_is_rejected() {
        let f = fixture();
        std::fs::write(f.dir.join("blkio.throttle.io_service_bytes"), "8:0\n").expect("write");
        std::fs::write(f.dir.join("blkio.throttle.io_serviced"), "").expect("write");
        assert!(matches!(
            f.driver.stat(Path::new("web")),
            Err(CgroupError::InvalidStatFormat { .. })
        ));
    }
}
