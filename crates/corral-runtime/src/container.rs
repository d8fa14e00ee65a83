//! Container lifecycle.
//!
//! A [`Container`] ties together the state directory `<root>/<id>`, the
//! cgroup, and the init process. Status is never stored: it is derived
//! from `/proc/<pid>/stat` each time it is asked for.

use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nix::sys::signal::Signal;

use corral_common::config::{CgroupConfig, Config, ResourceConfig, RuntimeConfig};
use corral_common::constants::PROC_ROOT;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, Status};
use corral_core::cgroup::Stats;
use corral_core::namespace::namespace_paths;

use crate::bootstrap::BootstrapConfig;
use crate::manager::ResourceManager;
use crate::proc;
use crate::process::{self, InitProcess, ProcessSpec};
use crate::state::State;

const CONTAINER_DIR_MODE: u32 = 0o711;

/// A container and everything the runtime knows about it.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    dir: PathBuf,
    config: Config,
    manager: ResourceManager,
    init: Option<InitProcess>,
    created: DateTime<Utc>,
    proc_root: PathBuf,
}

impl Container {
    /// Creates the container directory and cgroup and writes the initial
    /// state. Nothing is left behind if any step fails.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidId`] for a malformed id,
    /// [`CorralError::AlreadyExists`] if the container exists, or the
    /// first failure while creating the directory, cgroup or state file.
    pub fn create(runtime: &RuntimeConfig, id: &str, config: Config) -> Result<Self> {
        let id = ContainerId::parse(id)?;
        config.validate()?;
        let dir = runtime.container_dir(id.as_str());
        if dir.exists() {
            return Err(CorralError::AlreadyExists {
                kind: "container",
                id: id.to_string(),
            });
        }
        create_container_dir(&runtime.root, &dir, &id)?;

        let manager = match ResourceManager::new(id.as_str(), &config, runtime) {
            Ok(manager) => manager,
            Err(e) => {
                remove_container_dir(&dir);
                return Err(e);
            }
        };
        let container = Self {
            id,
            dir,
            config,
            manager,
            init: None,
            created: Utc::now(),
            proc_root: PathBuf::from(PROC_ROOT),
        };
        if let Err(e) = container.save() {
            if let Err(cleanup) = container.manager.destroy() {
                tracing::warn!(id = %container.id, error = %cleanup, "failed to remove cgroup after failed create");
            }
            remove_container_dir(&container.dir);
            return Err(e);
        }
        tracing::info!(id = %container.id, dir = %container.dir.display(), "container created");
        Ok(container)
    }

    /// Loads a container from its persisted state.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if the container does not exist,
    /// or an error if its state cannot be read or its cgroup root found.
    pub fn load(runtime: &RuntimeConfig, id: &str) -> Result<Self> {
        let id = ContainerId::parse(id)?;
        let dir = runtime.container_dir(id.as_str());
        let state = State::load(&dir)?;
        let manager = ResourceManager::load(id.as_str(), &state.config, runtime)?;
        let init = (state.init_process_pid > 0).then_some(InitProcess {
            pid: state.init_process_pid,
            start_time: state.init_process_start,
        });
        tracing::debug!(id = %id, pid = state.init_process_pid, "container loaded");
        Ok(Self {
            id,
            dir,
            config: state.config,
            manager,
            init,
            created: state.created,
            proc_root: PathBuf::from(PROC_ROOT),
        })
    }

    /// Probes processes under `proc_root` instead of `/proc`.
    #[must_use]
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    /// Container identifier.
    #[must_use]
    pub const fn id(&self) -> &ContainerId {
        &self.id
    }

    /// State directory of the container.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Container configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Init process handle, if the container was started.
    #[must_use]
    pub const fn init(&self) -> Option<InitProcess> {
        self.init
    }

    /// Starts the init process and runs `command` inside the container.
    ///
    /// Returns once the user command has been executed; the state file
    /// then records the init pid.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] if the container is running,
    /// [`CorralError::Bootstrap`] if the init failed before executing the
    /// command, or any error from cloning, cgroup placement or saving.
    pub fn start(&mut self, command: &ProcessSpec) -> Result<()> {
        let status = self.status();
        if status != Status::Stopped {
            return Err(self.invalid_state(status, "cannot start a container that is already started"));
        }
        let record = BootstrapConfig {
            container_id: self.id.to_string(),
            args: command.args.clone(),
            env: command.env.clone(),
            cwd: command.cwd.clone(),
            config: self.config.clone(),
        };
        let init = process::start(&record, &self.manager, &self.proc_root)?;
        self.init = Some(init);
        self.save()?;
        tracing::info!(id = %self.id, pid = init.pid, "container started");
        Ok(())
    }

    /// Derives the current status from the init process.
    ///
    /// A missing init, a missing or unreadable `/proc/<pid>/stat`, a zombie
    /// or dead process, and a start time that differs from the recorded
    /// one (pid reused) all mean [`Status::Stopped`].
    #[must_use]
    pub fn status(&self) -> Status {
        let Some(init) = self.init else {
            return Status::Stopped;
        };
        match proc::stat(&self.proc_root, init.pid) {
            Ok(stat) if !stat.state.is_gone() && stat.start_time == init.start_time => Status::Running,
            Ok(stat) => {
                tracing::debug!(pid = init.pid, state = ?stat.state, "init process is gone or was replaced");
                Status::Stopped
            }
            Err(e) => {
                tracing::debug!(pid = init.pid, error = %e, "init process not found");
                Status::Stopped
            }
        }
    }

    /// Snapshot of everything the runtime records about the container.
    #[must_use]
    pub fn state(&self) -> State {
        let (pid, start) = self.init.map_or((0, 0), |i| (i.pid, i.start_time));
        let namespaces = if pid > 0 {
            namespace_paths(pid, &self.config.namespaces, &self.proc_root)
        } else {
            BTreeMap::new()
        };
        State {
            id: self.id.to_string(),
            config: self.config.clone(),
            init_process_pid: pid,
            init_process_start: start,
            created: self.created,
            namespace_paths: namespaces,
            cgroup_paths: self.manager.paths(),
        }
    }

    fn save(&self) -> Result<()> {
        self.state().save(&self.dir)
    }

    /// Sends `signal` to the init, or with `all` to every process in the
    /// container's cgroup.
    ///
    /// Signalling all processes of a stopped container does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] when signalling the init of a
    /// container that is not running, or an error if `kill(2)` fails.
    pub fn signal(&self, signal: Signal, all: bool) -> Result<()> {
        let status = self.status();
        if all {
            if status == Status::Stopped {
                tracing::debug!(id = %self.id, "container stopped, nothing to signal");
                return Ok(());
            }
            for pid in self.manager.processes()? {
                match nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), signal) {
                    Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
                    Err(e) => return Err(CorralError::sys(format!("kill({pid}, {signal})"), e)),
                }
            }
            tracing::info!(id = %self.id, %signal, "signal sent to all processes");
            return Ok(());
        }
        match (status, self.init) {
            (Status::Running | Status::Created | Status::Paused, Some(init)) => {
                init.signal(signal)?;
                tracing::info!(id = %self.id, pid = init.pid, %signal, "signal sent");
                Ok(())
            }
            _ => Err(self.invalid_state(status, "cannot signal a container that is not running")),
        }
    }

    /// Waits for the init process to exit. Only meaningful in the process
    /// that started the container.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] if the container was never
    /// started, or an error if waiting fails.
    pub fn wait(&self) -> Result<i32> {
        let init = self
            .init
            .ok_or_else(|| self.invalid_state(Status::Stopped, "container was never started"))?;
        let code = init.wait()?;
        tracing::info!(id = %self.id, pid = init.pid, code, "container init exited");
        Ok(code)
    }

    /// Collects cgroup accounting.
    ///
    /// # Errors
    ///
    /// Returns the first accounting failure other than a missing file.
    pub fn stats(&self) -> Result<Stats> {
        self.manager.stats()
    }

    /// Applies new resource limits and records them in the state.
    ///
    /// # Errors
    ///
    /// Returns an error if a controller rejects a value or the state
    /// cannot be saved.
    pub fn update(&mut self, resources: ResourceConfig) -> Result<()> {
        self.manager.update(&resources)?;
        self.config
            .cgroups
            .get_or_insert_with(CgroupConfig::default)
            .resources = resources;
        self.save()?;
        tracing::info!(id = %self.id, "container resources updated");
        Ok(())
    }

    /// Removes the cgroup, the state file and the container directory.
    ///
    /// A failed destroy can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidState`] if the container is running,
    /// or the first removal failure.
    pub fn destroy(&self) -> Result<()> {
        let status = self.status();
        if status == Status::Running {
            return Err(self.invalid_state(status, "cannot destroy a running container"));
        }
        self.manager.destroy()?;
        State::remove(&self.dir)?;
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CorralError::Io {
                    path: self.dir.clone(),
                    source: e,
                });
            }
        }
        tracing::info!(id = %self.id, "container destroyed");
        Ok(())
    }

    fn invalid_state(&self, status: Status, message: &str) -> CorralError {
        CorralError::InvalidState {
            id: self.id.to_string(),
            status: status.to_string(),
            message: message.to_owned(),
        }
    }
}

fn create_container_dir(root: &Path, dir: &Path, id: &ContainerId) -> Result<()> {
    let io_err = |path: &Path, e| CorralError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    std::fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
    match std::fs::create_dir(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            return Err(CorralError::AlreadyExists {
                kind: "container",
                id: id.to_string(),
            });
        }
        Err(e) => return Err(io_err(dir, e)),
    }
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(CONTAINER_DIR_MODE))
        .map_err(|e| io_err(dir, e))
}

fn remove_container_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "failed to remove container directory");
    }
}
