//! Container lifecycle over a fake cgroup hierarchy and a fake `/proc`.
//!
//! Nothing here needs root: containers are created but never started, and
//! a started init is simulated by writing its state file and a matching
//! `/proc/<pid>/stat` entry.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use chrono::Utc;
use nix::sys::signal::Signal;

use corral_common::config::{Config, Namespace, RuntimeConfig};
use corral_common::error::CorralError;
use corral_common::types::{NamespaceType, Status};
use corral_core::cgroup::Name;
use corral_runtime::container::Container;
use corral_runtime::state::State;

const PID: i32 = 4242;
const START: u64 = 777;

struct Fixture {
    _dir: tempfile::TempDir,
    runtime: RuntimeConfig,
    proc_root: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let cgroup_root = dir.path().join("cgroup");
        for name in Name::ALL {
            std::fs::create_dir_all(cgroup_root.join(name.as_str())).expect("controller root");
        }
        let proc_root = dir.path().join("proc");
        std::fs::create_dir(&proc_root).expect("proc");
        Self {
            runtime: RuntimeConfig {
                root: dir.path().join("run"),
                cgroup_root: Some(cgroup_root),
            },
            proc_root,
            _dir: dir,
        }
    }

    fn cgroup_dir(&self, name: Name, id: &str) -> std::path::PathBuf {
        self.runtime
            .cgroup_root
            .as_ref()
            .expect("cgroup root")
            .join(name.as_str())
            .join(id)
    }

    /// Writes `/proc/<pid>/stat` with the given state letter and start time.
    fn set_proc(&self, pid: i32, state: char, start_time: u64) {
        let dir = self.proc_root.join(pid.to_string());
        std::fs::create_dir_all(&dir).expect("proc pid dir");
        let mut fields = vec![state.to_string()];
        fields.extend((4..22).map(|i| i.to_string()));
        fields.push(start_time.to_string());
        std::fs::write(dir.join("stat"), format!("{pid} (sh) {}\n", fields.join(" "))).expect("stat");
    }

    /// Creates a container and rewrites its state as if its init had started.
    fn started(&self, id: &str) -> Container {
        let container = Container::create(&self.runtime, id, config()).expect("create");
        let mut state = container.state();
        state.init_process_pid = PID;
        state.init_process_start = START;
        state.save(container.dir()).expect("save");
        Container::load(&self.runtime, id)
            .expect("load")
            .with_proc_root(&self.proc_root)
    }
}

fn config() -> Config {
    Config {
        rootfs: "/var/lib/corral/rootfs".into(),
        hostname: "box".into(),
        namespaces: vec![
            Namespace {
                kind: NamespaceType::Pid,
                path: None,
            },
            Namespace {
                kind: NamespaceType::Net,
                path: Some("/var/run/netns/blue".into()),
            },
        ],
        ..Config::default()
    }
}

// ── Create ───────────────────────────────────────────────────────────

#[test]
fn create_writes_private_directory_state_and_cgroup() {
    let fx = Fixture::new();
    let container = Container::create(&fx.runtime, "web", config()).expect("create");

    let mode = std::fs::metadata(container.dir()).expect("dir").permissions().mode();
    assert_eq!(mode & 0o777, 0o711);
    assert!(fx.cgroup_dir(Name::Cpu, "web").is_dir());
    assert!(fx.cgroup_dir(Name::Memory, "web").is_dir());

    let state = State::load(container.dir()).expect("state");
    assert_eq!(state.id, "web");
    assert_eq!(state.init_process_pid, 0);
    assert_eq!(state.config, config());
    assert_eq!(state.cgroup_paths["cpu"], fx.cgroup_dir(Name::Cpu, "web"));
    assert!(state.namespace_paths.is_empty());
}

#[test]
fn create_refuses_existing_container() {
    let fx = Fixture::new();
    drop(Container::create(&fx.runtime, "web", config()).expect("create"));
    assert!(matches!(
        Container::create(&fx.runtime, "web", config()),
        Err(CorralError::AlreadyExists { .. })
    ));
}

#[test]
fn create_rejects_bad_ids_without_side_effects() {
    let fx = Fixture::new();
    for id in ["../escape", "", "a b"] {
        assert!(matches!(
            Container::create(&fx.runtime, id, config()),
            Err(CorralError::InvalidId { .. })
        ));
    }
    assert!(!fx.runtime.root.exists());
}

#[test]
fn failed_create_rolls_back_directory_and_cgroup() {
    let fx = Fixture::new();
    // A file where the cpu group directory should go fails creation after
    // the earlier controllers already made theirs.
    std::fs::write(fx.cgroup_dir(Name::Cpu, "web"), "").expect("block cpu group");
    assert!(Container::create(&fx.runtime, "web", config()).is_err());
    assert!(!fx.runtime.container_dir("web").exists());
    assert!(!fx.cgroup_dir(Name::Pids, "web").exists());
    assert!(!fx.cgroup_dir(Name::Memory, "web").exists());
}

// ── Status ───────────────────────────────────────────────────────────

#[test]
fn never_started_container_is_stopped() {
    let fx = Fixture::new();
    let container = Container::create(&fx.runtime, "web", config())
        .expect("create")
        .with_proc_root(&fx.proc_root);
    assert_eq!(container.status(), Status::Stopped);
    assert!(container.init().is_none());
}

#[test]
fn running_init_is_running() {
    let fx = Fixture::new();
    fx.set_proc(PID, 'R', START);
    assert_eq!(fx.started("web").status(), Status::Running);
}

#[test]
fn sleeping_init_is_running() {
    let fx = Fixture::new();
    fx.set_proc(PID, 'S', START);
    assert_eq!(fx.started("web").status(), Status::Running);
}

#[test]
fn zombie_init_is_stopped() {
    let fx = Fixture::new();
    fx.set_proc(PID, 'Z', START);
    assert_eq!(fx.started("web").status(), Status::Stopped);
}

#[test]
fn missing_proc_entry_is_stopped() {
    let fx = Fixture::new();
    assert_eq!(fx.started("web").status(), Status::Stopped);
}

#[test]
fn reused_pid_is_stopped() {
    let fx = Fixture::new();
    fx.set_proc(PID, 'R', START + 1);
    assert_eq!(fx.started("web").status(), Status::Stopped);
}

// ── State ────────────────────────────────────────────────────────────

#[test]
fn load_restores_the_init_handle() {
    let fx = Fixture::new();
    let container = fx.started("web");
    let init = container.init().expect("init");
    assert_eq!(init.pid, PID);
    assert_eq!(init.start_time, START);
    assert_eq!(container.config().hostname, "box");
}

#[test]
fn state_reports_configured_namespace_paths() {
    let fx = Fixture::new();
    let state = fx.started("web").state();
    let expected = BTreeMap::from([
        (NamespaceType::Pid, format!("/proc/{PID}/ns/pid")),
        (NamespaceType::Net, "/var/run/netns/blue".to_owned()),
    ]);
    assert_eq!(state.namespace_paths, expected);
    assert!(state.created <= Utc::now());
}

#[test]
fn load_of_unknown_container_is_not_found() {
    let fx = Fixture::new();
    assert!(matches!(
        Container::load(&fx.runtime, "ghost"),
        Err(CorralError::NotFound { .. })
    ));
}

// ── Signals ──────────────────────────────────────────────────────────

#[test]
fn signal_all_on_stopped_container_is_a_no_op() {
    let fx = Fixture::new();
    let container = fx.started("web");
    container.signal(Signal::SIGTERM, true).expect("no-op");
}

#[test]
fn signal_init_of_stopped_container_is_refused() {
    let fx = Fixture::new();
    fx.set_proc(PID, 'Z', START);
    let container = fx.started("web");
    assert!(matches!(
        container.signal(Signal::SIGTERM, false),
        Err(CorralError::InvalidState { .. })
    ));
}

// ── Stats and update ─────────────────────────────────────────────────

#[test]
fn stats_tolerate_missing_accounting_files() {
    let fx = Fixture::new();
    let container = Container::create(&fx.runtime, "web", config()).expect("create");
    let stats = container.stats().expect("stats");
    assert!(stats.cpu.is_none());
    assert!(stats.memory.is_none());
}

// ── Destroy ──────────────────────────────────────────────────────────

#[test]
fn destroy_removes_cgroup_state_and_directory() {
    let fx = Fixture::new();
    let container = fx.started("web");
    container.destroy().expect("destroy");
    assert!(!container.dir().exists());
    assert!(!fx.cgroup_dir(Name::Cpu, "web").exists());
    assert!(!fx.cgroup_dir(Name::Pids, "web").exists());
    assert!(matches!(
        Container::load(&fx.runtime, "web"),
        Err(CorralError::NotFound { .. })
    ));
}

#[test]
fn destroy_refuses_running_container() {
    let fx = Fixture::new();
    fx.set_proc(PID, 'R', START);
    let container = fx.started("web");
    assert!(matches!(
        container.destroy(),
        Err(CorralError::InvalidState { .. })
    ));
    assert!(State::path(container.dir()).exists());
    assert!(Path::new(&fx.cgroup_dir(Name::Cpu, "web")).is_dir());
}
