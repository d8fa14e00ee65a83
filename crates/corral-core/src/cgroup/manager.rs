//! The [`Cgroup`] handle tying the controller drivers together.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::utils::{create_dir, mount_point, read_ids, remove_with_backoff, walk_dirs, write_control};
use super::{
    CGROUP_PROCS, CGROUP_TASKS, CgroupError, CgroupOptions, Metrics, Name, Process, Resources,
    Result, Stater, Stats, Subsystem, Task, defaults,
};

/// Decides whether a driver's Stat failure reaches the caller. Returns
/// `true` to propagate; an error is dropped only when every handler
/// returns `false`.
pub type ErrorHandler = fn(&CgroupError) -> bool;

/// Propagates every error. Used when no handler is given.
#[must_use]
pub fn err_passthrough(_err: &CgroupError) -> bool {
    true
}

/// Drops errors caused by missing accounting files.
#[must_use]
pub fn ignore_not_exist(err: &CgroupError) -> bool {
    !err.is_not_found()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Active,
    Deleted,
}

/// One group of processes spread across the active controller hierarchies.
///
/// All operations serialize on an internal lock. Once [`Cgroup::delete`]
/// succeeds every operation fails with [`CgroupError::Deleted`] without
/// touching the filesystem.
#[derive(Debug)]
pub struct Cgroup {
    path: PathBuf,
    subsystems: Vec<Box<dyn Subsystem>>,
    options: CgroupOptions,
    state: Mutex<Lifecycle>,
}

impl Cgroup {
    /// Creates `path` in every controller mounted on this host and applies
    /// `resources`. The hierarchy root is discovered from the mount table.
    ///
    /// # Errors
    ///
    /// Returns an error if no cgroup mount exists or any driver fails to
    /// create its directory or write a limit.
    pub fn new(path: impl AsRef<Path>, resources: &Resources) -> Result<Self> {
        let root = mount_point()?;
        Self::with_root(&root, path, resources, CgroupOptions::default())
    }

    /// Like [`Cgroup::new`] with an explicit hierarchy root and options.
    ///
    /// # Errors
    ///
    /// Returns an error if any driver fails to create its directory or
    /// write a limit.
    pub fn with_root(
        root: &Path,
        path: impl AsRef<Path>,
        resources: &Resources,
        options: CgroupOptions,
    ) -> Result<Self> {
        Self::from_subsystems(defaults(root), path, resources, options)
    }

    /// Creates the group using a caller-supplied driver set.
    ///
    /// Drivers whose controller root does not exist are dropped. On failure,
    /// directories created by this call are removed again and no handle is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns the first driver failure.
    pub fn from_subsystems(
        subsystems: Vec<Box<dyn Subsystem>>,
        path: impl AsRef<Path>,
        resources: &Resources,
        options: CgroupOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let subsystems: Vec<_> = subsystems.into_iter().filter(|s| is_active(s.as_ref())).collect();
        let mut created = Vec::new();
        for subsystem in &subsystems {
            if let Err(e) = initialize(subsystem.as_ref(), &path, resources, &options, &mut created) {
                tracing::warn!(subsystem = %subsystem.name(), error = %e, "cgroup creation failed, rolling back");
                rollback(&created, &options);
                return Err(e);
            }
        }
        tracing::info!(path = %path.display(), subsystems = subsystems.len(), "cgroup created");
        Ok(Self {
            path,
            subsystems,
            options,
            state: Mutex::new(Lifecycle::Active),
        })
    }

    /// Attaches to an existing group without writing anything.
    ///
    /// Only controllers where the group directory exists are kept.
    #[must_use]
    pub fn load(root: &Path, path: impl AsRef<Path>, options: CgroupOptions) -> Self {
        let path = path.as_ref().to_path_buf();
        let subsystems: Vec<_> = defaults(root)
            .into_iter()
            .filter(|s| s.as_pather().is_some_and(|p| p.path(&path).is_dir()))
            .collect();
        tracing::debug!(path = %path.display(), subsystems = subsystems.len(), "cgroup loaded");
        Self {
            path,
            subsystems,
            options,
            state: Mutex::new(Lifecycle::Active),
        }
    }

    /// Cgroup path relative to each controller root.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Controllers active for this group, in driver order.
    #[must_use]
    pub fn subsystems(&self) -> Vec<Name> {
        self.subsystems.iter().map(|s| s.name()).collect()
    }

    /// Absolute directory of the group in every active controller.
    #[must_use]
    pub fn paths(&self) -> BTreeMap<Name, PathBuf> {
        self.subsystems
            .iter()
            .filter_map(|s| s.as_pather().map(|p| (s.name(), p.path(&self.path))))
            .collect()
    }

    /// Absolute directory of the group in one controller.
    ///
    /// # Errors
    ///
    /// Returns [`CgroupError::SubsystemNotFound`] if the controller is not active.
    pub fn subsystem_path(&self, name: Name) -> Result<PathBuf> {
        self.subsystems
            .iter()
            .find(|s| s.name() == name)
            .and_then(|s| s.as_pather())
            .map(|p| p.path(&self.path))
            .ok_or_else(|| CgroupError::SubsystemNotFound {
                name: name.to_string(),
            })
    }

    /// Moves a process, with all its threads, into the group.
    ///
    /// # Errors
    ///
    /// Returns [`CgroupError::InvalidPid`] for `pid <= 0` before touching
    /// anything, [`CgroupError::Deleted`] after deletion, or the first
    /// failed write.
    pub fn add(&self, pid: i32) -> Result<()> {
        self.attach(pid, CGROUP_PROCS)
    }

    /// Moves a single thread into the group.
    ///
    /// # Errors
    ///
    /// Same as [`Cgroup::add`].
    pub fn add_task(&self, tid: i32) -> Result<()> {
        self.attach(tid, CGROUP_TASKS)
    }

    fn attach(&self, id: i32, file: &str) -> Result<()> {
        if id <= 0 {
            return Err(CgroupError::InvalidPid { pid: id });
        }
        let _state = self.active()?;
        let value = id.to_string();
        for pather in self.subsystems.iter().filter_map(|s| s.as_pather()) {
            write_control(&pather.path(&self.path).join(file), &value, &self.options)?;
        }
        tracing::debug!(path = %self.path.display(), id, file, "attached to cgroup");
        Ok(())
    }

    /// Removes the group from every controller.
    ///
    /// Drivers with their own removal are asked to delete; every other
    /// directory is removed with `options.remove` and the configured
    /// backoff. With the default remover a nested group keeps its parent
    /// alive and the delete fails. All drivers are
    /// attempted even after a failure. The handle becomes terminal only
    /// when everything was removed, so a failed delete can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`CgroupError::RemoveFailed`] naming what survived.
    pub fn delete(&self) -> Result<()> {
        let mut state = self.active()?;
        let mut failed = Vec::new();
        for subsystem in &self.subsystems {
            if let Some(deleter) = subsystem.as_deleter() {
                if let Err(e) = deleter.delete(&self.path) {
                    tracing::warn!(subsystem = %subsystem.name(), error = %e, "cgroup removal failed");
                    failed.push(subsystem.name().to_string());
                }
            } else if let Some(pather) = subsystem.as_pather() {
                let dir = pather.path(&self.path);
                if let Err(e) = remove_with_backoff(&dir, self.options.remove_backoff, self.options.remove) {
                    tracing::warn!(path = %dir.display(), error = %e, "cgroup removal failed");
                    failed.push(dir.display().to_string());
                }
            }
        }
        if !failed.is_empty() {
            return Err(CgroupError::RemoveFailed { paths: failed });
        }
        *state = Lifecycle::Deleted;
        tracing::info!(path = %self.path.display(), "cgroup deleted");
        Ok(())
    }

    /// Collects accounting from every stat-capable driver concurrently.
    ///
    /// Each failure is passed through `handlers` (defaulting to
    /// [`err_passthrough`]). The result is all-or-nothing: if any failure
    /// is kept, the first one in driver order is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CgroupError::Deleted`] after deletion, or the first kept
    /// driver failure.
    pub fn stat(&self, handlers: &[ErrorHandler]) -> Result<Stats> {
        let _state = self.active()?;
        let default_handlers: [ErrorHandler; 1] = [err_passthrough];
        let handlers = if handlers.is_empty() {
            &default_handlers[..]
        } else {
            handlers
        };

        let staters: Vec<&dyn Stater> = self.subsystems.iter().filter_map(|s| s.as_stater()).collect();
        let path = self.path.as_path();
        let results: Vec<(Name, Result<Metrics>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = staters
                .into_iter()
                .map(|stater| (stater.name(), scope.spawn(move || stater.stat(path))))
                .collect();
            handles
                .into_iter()
                .map(|(name, handle)| {
                    let result = handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic));
                    (name, result)
                })
                .collect()
        });

        let mut stats = Stats::default();
        let mut kept = None;
        for (name, result) in results {
            match result {
                Ok(metrics) => stats.merge(metrics),
                Err(e) if handlers.iter().any(|h| h(&e)) => {
                    tracing::warn!(subsystem = %name, error = %e, "cgroup stat failed");
                    if kept.is_none() {
                        kept = Some(e);
                    }
                }
                Err(e) => {
                    tracing::debug!(subsystem = %name, error = %e, "cgroup stat error ignored");
                }
            }
        }
        kept.map_or(Ok(stats), Err)
    }

    /// Rewrites the limits of every update-capable driver. Unset fields
    /// are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`CgroupError::Deleted`] after deletion, or the first failed write.
    pub fn update(&self, resources: &Resources) -> Result<()> {
        let _state = self.active()?;
        for subsystem in &self.subsystems {
            if let Some(updater) = subsystem.as_updater() {
                updater.update(&self.path, resources, &self.options)?;
            }
        }
        tracing::debug!(path = %self.path.display(), "cgroup updated");
        Ok(())
    }

    /// Lists the processes of the group in one controller, including
    /// descendant groups when `recursive` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller is not active or a listing
    /// cannot be read.
    pub fn processes(&self, name: Name, recursive: bool) -> Result<Vec<Process>> {
        let _state = self.active()?;
        let mut out = Vec::new();
        for dir in self.listing_dirs(name, recursive)? {
            out.extend(read_ids(&dir, CGROUP_PROCS)?.into_iter().map(|pid| Process {
                subsystem: name,
                pid,
                path: dir.clone(),
            }));
        }
        Ok(out)
    }

    /// Lists the threads of the group in one controller, including
    /// descendant groups when `recursive` is set.
    ///
    /// # Errors
    ///
    /// Same as [`Cgroup::processes`].
    pub fn tasks(&self, name: Name, recursive: bool) -> Result<Vec<Task>> {
        let _state = self.active()?;
        let mut out = Vec::new();
        for dir in self.listing_dirs(name, recursive)? {
            out.extend(read_ids(&dir, CGROUP_TASKS)?.into_iter().map(|tid| Task {
                subsystem: name,
                tid,
                path: dir.clone(),
            }));
        }
        Ok(out)
    }

    fn listing_dirs(&self, name: Name, recursive: bool) -> Result<Vec<PathBuf>> {
        let dir = self.subsystem_path(name)?;
        if recursive { walk_dirs(&dir) } else { Ok(vec![dir]) }
    }

    fn active(&self) -> Result<MutexGuard<'_, Lifecycle>> {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Lifecycle::Active => Ok(guard),
            Lifecycle::Deleted => Err(CgroupError::Deleted),
        }
    }
}

/// A driver is active when its controller hierarchy is mounted.
fn is_active(subsystem: &dyn Subsystem) -> bool {
    subsystem
        .as_pather()
        .is_none_or(|p| p.path(Path::new("/")).is_dir())
}

fn initialize(
    subsystem: &dyn Subsystem,
    path: &Path,
    resources: &Resources,
    options: &CgroupOptions,
    created: &mut Vec<PathBuf>,
) -> Result<()> {
    let dir = subsystem.as_pather().map(|p| p.path(path));
    let existed = dir.as_ref().is_some_and(|d| d.exists());
    let result = match (subsystem.as_creator(), &dir) {
        (Some(creator), _) => creator.create(path, resources, options),
        (None, Some(dir)) => create_dir(dir, options),
        (None, None) => Ok(()),
    };
    if let Some(dir) = dir {
        if !existed && dir.exists() {
            created.push(dir);
        }
    }
    result
}

fn rollback(created: &[PathBuf], options: &CgroupOptions) {
    for dir in created.iter().rev() {
        if let Err(e) = (options.remove)(dir) {
            tracing::warn!(path = %dir.display(), error = %e, "failed to remove partially created cgroup");
        }
    }
}
