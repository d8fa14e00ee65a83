//! Integration tests for the cgroup manager over a fake hierarchy.
//!
//! Every test builds a temporary directory with one sub-directory per
//! controller, standing in for `/sys/fs/cgroup`, and lets the drivers
//! create control files in it.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use corral_core::cgroup::{
    Backoff, Cgroup, CgroupError, CgroupOptions, CpuResources, Creator, Deleter, MemoryResources,
    Metrics, Name, Pather, PidsResources, PidsStat, Resources, Stater, Subsystem, defaults,
    err_passthrough, ignore_not_exist, remove_tree, rmdir,
};

fn options() -> CgroupOptions {
    CgroupOptions {
        file_mode: Some(0o644),
        remove_backoff: quick_backoff(),
        remove: remove_tree,
        ..CgroupOptions::default()
    }
}

const fn quick_backoff() -> Backoff {
    Backoff {
        attempts: 2,
        initial: Duration::from_millis(1),
    }
}

fn fake_root() -> tempfile::TempDir {
    let root = tempfile::tempdir().expect("tempdir");
    for name in Name::ALL {
        std::fs::create_dir_all(root.path().join(name.as_str())).expect("controller root");
    }
    root
}

/// Every regular file under `dir` with its content, keyed by relative path.
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, String> {
    let mut out = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).expect("read dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let content = std::fs::read_to_string(&path).expect("read file");
                let _ = out.insert(path.strip_prefix(dir).expect("prefix").to_path_buf(), content);
            }
        }
    }
    out
}

fn full_resources() -> Resources {
    Resources {
        cpu: Some(CpuResources {
            shares: Some(256),
            quota: Some(50_000),
            period: Some(100_000),
            cpus: Some("0".into()),
            ..CpuResources::default()
        }),
        memory: Some(MemoryResources {
            limit: Some(1 << 30),
            swappiness: Some(10),
            ..MemoryResources::default()
        }),
        pids: Some(PidsResources { limit: 32 }),
        ..Resources::default()
    }
}

// ── Construction ─────────────────────────────────────────────────────

#[test]
fn cpu_shares_alone_writes_a_single_file() {
    let root = fake_root();
    let resources = Resources {
        cpu: Some(CpuResources {
            shares: Some(512),
            ..CpuResources::default()
        }),
        ..Resources::default()
    };

    let cgroup = Cgroup::with_root(root.path(), "/corral/web", &resources, options()).expect("create");

    let files = snapshot(root.path());
    assert_eq!(
        files,
        BTreeMap::from([(PathBuf::from("cpu/corral/web/cpu.shares"), "512".to_owned())])
    );
    assert_eq!(cgroup.subsystems(), Name::ALL);
    for name in Name::ALL {
        assert!(root.path().join(name.as_str()).join("corral/web").is_dir());
    }
}

#[test]
fn empty_resources_write_nothing() {
    let root = fake_root();
    let _cgroup = Cgroup::with_root(root.path(), "web", &Resources::default(), options()).expect("create");
    assert!(snapshot(root.path()).is_empty());
}

#[test]
fn update_after_empty_create_matches_create() {
    let created = fake_root();
    let updated = fake_root();
    let resources = full_resources();

    let _a = Cgroup::with_root(created.path(), "web", &resources, options()).expect("create");
    let b = Cgroup::with_root(updated.path(), "web", &Resources::default(), options()).expect("create");
    b.update(&resources).expect("update");

    assert_eq!(snapshot(created.path()), snapshot(updated.path()));
    assert!(!snapshot(created.path()).is_empty());
}

#[test]
fn unmounted_controllers_are_skipped() {
    let root = tempfile::tempdir().expect("tempdir");
    for name in [Name::Cpu, Name::Memory] {
        std::fs::create_dir_all(root.path().join(name.as_str())).expect("mkdir");
    }
    let cgroup = Cgroup::with_root(root.path(), "web", &full_resources(), options()).expect("create");

    assert_eq!(cgroup.subsystems(), vec![Name::Cpu, Name::Memory]);
    assert!(!root.path().join("pids").exists());
    assert!(matches!(
        cgroup.subsystem_path(Name::Pids),
        Err(CgroupError::SubsystemNotFound { .. })
    ));
    let paths = cgroup.paths();
    assert_eq!(paths[&Name::Cpu], root.path().join("cpu/web"));
}

#[derive(Debug)]
struct FailingCreator {
    root: PathBuf,
}

impl Subsystem for FailingCreator {
    fn name(&self) -> Name {
        Name::Blkio
    }

    fn as_pather(&self) -> Option<&dyn Pather> {
        Some(self)
    }

    fn as_creator(&self) -> Option<&dyn Creator> {
        Some(self)
    }
}

impl Pather for FailingCreator {
    fn path(&self, path: &Path) -> PathBuf {
        self.root.join(corral_core::cgroup::clean_path(path))
    }
}

impl Creator for FailingCreator {
    fn create(&self, _path: &Path, _resources: &Resources, _options: &CgroupOptions) -> corral_core::cgroup::Result<()> {
        Err(CgroupError::io(&self.root, io::Error::from(io::ErrorKind::PermissionDenied)))
    }
}

#[test]
fn failed_construction_removes_created_directories() {
    let root = fake_root();
    let mut drivers = defaults(root.path());
    drivers.truncate(2);
    drivers.push(Box::new(FailingCreator {
        root: root.path().join("blkio"),
    }));

    let err = Cgroup::from_subsystems(drivers, "web", &Resources::default(), options()).expect_err("must fail");
    assert!(matches!(err, CgroupError::Io { .. }));
    assert!(!root.path().join("pids/web").exists());
    assert!(!root.path().join("net_cls/web").exists());
}

#[test]
fn load_attaches_without_writing() {
    let root = fake_root();
    let created = Cgroup::with_root(root.path(), "web", &full_resources(), options()).expect("create");
    let before = snapshot(root.path());

    std::fs::remove_dir(root.path().join("net_prio/web")).expect("remove one controller dir");
    let loaded = Cgroup::load(root.path(), "web", options());

    assert_eq!(snapshot(root.path()), before);
    assert!(!loaded.subsystems().contains(&Name::NetPrio));
    assert_eq!(loaded.subsystems().len(), created.subsystems().len() - 1);
}

// ── Membership ───────────────────────────────────────────────────────

#[test]
fn add_writes_pid_to_every_controller() {
    let root = fake_root();
    let cgroup = Cgroup::with_root(root.path(), "web", &Resources::default(), options()).expect("create");

    cgroup.add(4242).expect("add");
    cgroup.add_task(4243).expect("add task");

    for name in Name::ALL {
        let dir = root.path().join(name.as_str()).join("web");
        assert_eq!(std::fs::read_to_string(dir.join("cgroup.procs")).expect("procs"), "4242");
        assert_eq!(std::fs::read_to_string(dir.join("tasks")).expect("tasks"), "4243");
    }
}

#[test]
fn invalid_pid_touches_nothing() {
    let root = fake_root();
    let cgroup = Cgroup::with_root(root.path(), "web", &Resources::default(), options()).expect("create");

    for pid in [0, -1, i32::MIN] {
        assert!(matches!(cgroup.add(pid), Err(CgroupError::InvalidPid { pid: p }) if p == pid));
        assert!(matches!(cgroup.add_task(pid), Err(CgroupError::InvalidPid { .. })));
    }
    assert!(snapshot(root.path()).is_empty());
}

#[test]
fn processes_walk_nested_groups_when_recursive() {
    let root = fake_root();
    let cgroup = Cgroup::with_root(root.path(), "web", &Resources::default(), options()).expect("create");
    let dir = root.path().join("pids/web");
    std::fs::create_dir_all(dir.join("child")).expect("mkdir");
    std::fs::write(dir.join("cgroup.procs"), "1\n2\n").expect("write");
    std::fs::write(dir.join("child/cgroup.procs"), "3\n").expect("write");
    std::fs::write(dir.join("tasks"), "1\n2\n9\n").expect("write");
    std::fs::write(dir.join("child/tasks"), "3\n").expect("write");

    let flat = cgroup.processes(Name::Pids, false).expect("processes");
    assert_eq!(flat.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![1, 2]);
    assert!(flat.iter().all(|p| p.subsystem == Name::Pids && p.path == dir));

    let deep = cgroup.processes(Name::Pids, true).expect("processes");
    assert_eq!(deep.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(deep[2].path, dir.join("child"));

    let tasks = cgroup.tasks(Name::Pids, true).expect("tasks");
    assert_eq!(tasks.iter().map(|t| t.tid).collect::<Vec<_>>(), vec![1, 2, 9, 3]);
}

// ── Stat ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct FakeStater {
    name: Name,
    outcome: fn() -> corral_core::cgroup::Result<Metrics>,
}

impl Subsystem for FakeStater {
    fn name(&self) -> Name {
        self.name
    }

    fn as_stater(&self) -> Option<&dyn Stater> {
        Some(self)
    }
}

impl Stater for FakeStater {
    fn stat(&self, _path: &Path) -> corral_core::cgroup::Result<Metrics> {
        (self.outcome)()
    }
}

fn pids_ok() -> corral_core::cgroup::Result<Metrics> {
    Ok(Metrics::Pids(PidsStat { current: 4, limit: 8 }))
}

fn missing_file() -> corral_core::cgroup::Result<Metrics> {
    Err(CgroupError::io(
        "/sys/fs/cgroup/memory/web/memory.stat",
        io::Error::from(io::ErrorKind::NotFound),
    ))
}

fn denied() -> corral_core::cgroup::Result<Metrics> {
    Err(CgroupError::io(
        "/sys/fs/cgroup/blkio/web/blkio.throttle.io_serviced",
        io::Error::from(io::ErrorKind::PermissionDenied),
    ))
}

fn stat_cgroup(outcomes: &[(Name, fn() -> corral_core::cgroup::Result<Metrics>)]) -> Cgroup {
    let drivers: Vec<Box<dyn Subsystem>> = outcomes
        .iter()
        .map(|(name, outcome)| {
            Box::new(FakeStater {
                name: *name,
                outcome: *outcome,
            }) as Box<dyn Subsystem>
        })
        .collect();
    Cgroup::from_subsystems(drivers, "web", &Resources::default(), options()).expect("create")
}

#[test]
fn stat_failure_is_all_or_nothing_by_default() {
    let cgroup = stat_cgroup(&[(Name::Pids, pids_ok), (Name::Memory, missing_file)]);
    let err = cgroup.stat(&[]).expect_err("memory failed");
    assert!(err.is_not_found());
    assert!(cgroup.stat(&[err_passthrough]).is_err());
}

#[test]
fn stat_handler_can_swallow_missing_files() {
    let cgroup = stat_cgroup(&[(Name::Pids, pids_ok), (Name::Memory, missing_file)]);
    let stats = cgroup.stat(&[ignore_not_exist]).expect("missing file ignored");
    assert_eq!(stats.pids, Some(PidsStat { current: 4, limit: 8 }));
    assert!(stats.memory.is_none());
    assert!(stats.cpu.is_none());
}

#[test]
fn stat_handler_keeps_other_failures() {
    let cgroup = stat_cgroup(&[
        (Name::Pids, pids_ok),
        (Name::Memory, missing_file),
        (Name::Blkio, denied),
    ]);
    let err = cgroup.stat(&[ignore_not_exist]).expect_err("denied is kept");
    assert!(matches!(err, CgroupError::Io { ref source, .. } if source.kind() == io::ErrorKind::PermissionDenied));
}

#[test]
fn stat_over_real_drivers() {
    let root = fake_root();
    let cgroup = Cgroup::with_root(root.path(), "web", &Resources::default(), options()).expect("create");
    let pids = root.path().join("pids/web");
    std::fs::write(pids.join("pids.current"), "2\n").expect("write");
    std::fs::write(pids.join("pids.max"), "max\n").expect("write");
    std::fs::write(root.path().join("cpu/web/cpu.stat"), "nr_periods 1\nnr_throttled 0\nthrottled_time 0\n")
        .expect("write");

    let stats = cgroup.stat(&[ignore_not_exist]).expect("stat");
    assert_eq!(stats.pids, Some(PidsStat { current: 2, limit: 0 }));
    let cpu = stats.cpu.expect("cpu section");
    assert_eq!(cpu.throttling.expect("throttling").periods, 1);
    assert!(cpu.usage.is_none());
    assert!(stats.memory.is_none());
    assert!(stats.blkio.is_none());
}

// ── Delete ───────────────────────────────────────────────────────────

#[test]
fn delete_is_terminal_and_never_touches_the_filesystem_again() {
    let root = fake_root();
    let cgroup = Cgroup::with_root(root.path(), "web", &full_resources(), options()).expect("create");
    cgroup.delete().expect("delete");
    for name in Name::ALL {
        assert!(!root.path().join(name.as_str()).join("web").exists());
    }

    // With the hierarchy gone, any filesystem access would surface as Io.
    drop(root);
    assert!(matches!(cgroup.add(1), Err(CgroupError::Deleted)));
    assert!(matches!(cgroup.add_task(1), Err(CgroupError::Deleted)));
    assert!(matches!(cgroup.stat(&[]), Err(CgroupError::Deleted)));
    assert!(matches!(cgroup.update(&full_resources()), Err(CgroupError::Deleted)));
    assert!(matches!(cgroup.processes(Name::Pids, true), Err(CgroupError::Deleted)));
    assert!(matches!(cgroup.tasks(Name::Pids, false), Err(CgroupError::Deleted)));
    assert!(matches!(cgroup.delete(), Err(CgroupError::Deleted)));
}

#[derive(Debug)]
struct FlakyDeleter {
    failures_left: AtomicUsize,
}

impl Subsystem for FlakyDeleter {
    fn name(&self) -> Name {
        Name::NetCls
    }

    fn as_deleter(&self) -> Option<&dyn Deleter> {
        Some(self)
    }
}

impl Deleter for FlakyDeleter {
    fn delete(&self, _path: &Path) -> corral_core::cgroup::Result<()> {
        if self.failures_left.load(Ordering::SeqCst) == 0 {
            return Ok(());
        }
        let _ = self.failures_left.fetch_sub(1, Ordering::SeqCst);
        Err(CgroupError::io("net_cls", io::Error::from(io::ErrorKind::ResourceBusy)))
    }
}

#[test]
fn failed_delete_names_survivors_and_can_be_retried() {
    let drivers: Vec<Box<dyn Subsystem>> = vec![Box::new(FlakyDeleter {
        failures_left: AtomicUsize::new(1),
    })];
    let cgroup = Cgroup::from_subsystems(drivers, "web", &Resources::default(), options()).expect("create");

    let err = cgroup.delete().expect_err("first delete fails");
    assert!(matches!(&err, CgroupError::RemoveFailed { paths } if paths == &["net_cls".to_owned()]));
    assert_eq!(err.to_string(), "cgroups: unable to remove paths net_cls");

    cgroup.delete().expect("retry succeeds");
    assert!(matches!(cgroup.add(1), Err(CgroupError::Deleted)));
}

#[test]
fn default_delete_leaves_nested_groups_in_place() {
    let root = fake_root();
    let options = CgroupOptions {
        remove_backoff: quick_backoff(),
        ..CgroupOptions::default()
    };
    let cgroup = Cgroup::with_root(root.path(), "web", &Resources::default(), options).expect("create");
    let nested = root.path().join("cpu/web/nested");
    std::fs::create_dir(&nested).expect("nested group");
    std::fs::write(nested.join("keep.txt"), "").expect("nested file");

    let err = cgroup.delete().expect_err("nested group blocks removal");
    let cpu_dir = root.path().join("cpu/web").display().to_string();
    assert!(matches!(&err, CgroupError::RemoveFailed { paths } if paths == &[cpu_dir.clone()]));
    assert!(nested.join("keep.txt").exists());
    assert!(!root.path().join("memory/web").exists());

    std::fs::remove_dir_all(&nested).expect("clear nested group");
    cgroup.delete().expect("retry succeeds");
    assert!(!root.path().join("cpu/web").exists());
}

static BUSY_REMOVALS: AtomicUsize = AtomicUsize::new(0);

fn busy_four_times(path: &Path) -> io::Result<()> {
    if BUSY_REMOVALS.fetch_add(1, Ordering::SeqCst) < 4 {
        return Err(io::Error::from(io::ErrorKind::ResourceBusy));
    }
    rmdir(path)
}

#[test]
fn delete_backs_off_until_the_group_goes_away() {
    let root = fake_root();
    let mut drivers = defaults(root.path());
    drivers.truncate(1);
    let options = CgroupOptions {
        remove: busy_four_times,
        ..CgroupOptions::default()
    };
    let cgroup = Cgroup::from_subsystems(drivers, "web", &Resources::default(), options).expect("create");

    let start = Instant::now();
    cgroup.delete().expect("fifth attempt succeeds");
    assert!(start.elapsed() >= Duration::from_millis(10 + 20 + 40 + 80));
    assert_eq!(BUSY_REMOVALS.load(Ordering::SeqCst), 5);
    assert!(!root.path().join("pids/web").exists());
}

#[test]
fn concurrent_operations_serialize() {
    let root = fake_root();
    let cgroup = Arc::new(Cgroup::with_root(root.path(), "web", &Resources::default(), options()).expect("create"));
    let handles: Vec<_> = (1..=8)
        .map(|pid| {
            let cgroup = Arc::clone(&cgroup);
            std::thread::spawn(move || cgroup.add(pid))
        })
        .collect();
    for handle in handles {
        handle.join().expect("join").expect("add");
    }
    let written: i32 = std::fs::read_to_string(root.path().join("cpu/web/cgroup.procs"))
        .expect("procs")
        .parse()
        .expect("single pid");
    assert!((1..=8).contains(&written));
}
