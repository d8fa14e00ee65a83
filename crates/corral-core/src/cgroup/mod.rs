//! Cgroup v1 resource management.
//!
//! A [`Cgroup`] is one logical group of processes spread across several
//! controller hierarchies (`/sys/fs/cgroup/<controller>/<path>`). Each
//! controller is handled by a driver implementing [`Subsystem`] plus any
//! subset of the capability traits below. The manager asks every driver
//! which capabilities it has and skips the ones it lacks.
//!
//! | driver     | path | create | update | stat |
//! |------------|------|--------|--------|------|
//! | `pids`     | yes  | yes    | yes    | yes  |
//! | `net_cls`  | yes  | yes    | yes    |      |
//! | `net_prio` | yes  | yes    | yes    |      |
//! | `cpuset`   | yes  | yes    | yes    |      |
//! | `cpu`      | yes  | yes    | yes    | yes  |
//! | `cpuacct`  | yes  |        |        | yes  |
//! | `memory`   | yes  | yes    | yes    | yes  |
//! | `blkio`    | yes  | yes    | yes    | yes  |

pub mod blkio;
pub mod cpu;
pub mod cpuacct;
pub mod cpuset;
pub mod memory;
pub mod net_cls;
pub mod net_prio;
pub mod pids;

mod manager;
mod resources;
mod stats;
mod utils;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use corral_common::error::CgroupError;
pub use manager::{Cgroup, ErrorHandler, err_passthrough, ignore_not_exist};
pub use resources::{
    BlockIoResources, CpuResources, InterfacePriority, MemoryResources, NetworkResources,
    PidsResources, Resources,
};
pub use stats::{
    BlkioEntry, BlkioStat, CpuStat, CpuUsage, MemoryEntry, MemoryStat, Metrics, PidsStat, Stats,
    ThrottlingStat,
};
pub use utils::{
    cgroup_destination, clean_path, mount_point, parse_cgroup_destination, parse_cgroup_file,
    parse_mount_point, remove_tree, remove_with_backoff, rmdir,
};

/// Result alias for the cgroup layer.
pub type Result<T> = std::result::Result<T, CgroupError>;

/// Control file listing the processes (thread group leaders) of a group.
pub const CGROUP_PROCS: &str = "cgroup.procs";

/// Control file listing every thread of a group.
pub const CGROUP_TASKS: &str = "tasks";

/// Default mode for directories created inside controller hierarchies.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Controllers corral knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Name {
    /// Task count limit.
    Pids,
    /// Network class id tagging.
    NetCls,
    /// Per-interface network priority.
    NetPrio,
    /// CPU and memory node pinning.
    Cpuset,
    /// CPU scheduling weight and bandwidth.
    Cpu,
    /// CPU usage accounting.
    Cpuacct,
    /// Memory limits and accounting.
    Memory,
    /// Block I/O weight and accounting.
    Blkio,
}

impl Name {
    /// Every controller, in driver order.
    pub const ALL: [Self; 8] = [
        Self::Pids,
        Self::NetCls,
        Self::NetPrio,
        Self::Cpuset,
        Self::Cpu,
        Self::Cpuacct,
        Self::Memory,
        Self::Blkio,
    ];

    /// Directory name of the controller hierarchy.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pids => "pids",
            Self::NetCls => "net_cls",
            Self::NetPrio => "net_prio",
            Self::Cpuset => "cpuset",
            Self::Cpu => "cpu",
            Self::Cpuacct => "cpuacct",
            Self::Memory => "memory",
            Self::Blkio => "blkio",
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Name {
    type Err = CgroupError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| CgroupError::SubsystemNotFound { name: s.to_owned() })
    }
}

/// Retry schedule used when removing controller directories.
///
/// The kernel refuses `rmdir` on a group while its last tasks are still
/// exiting, so removal is retried with a doubling delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total number of attempts.
    pub attempts: u32,
    /// Delay before the second attempt; doubled for every later one.
    pub initial: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial: Duration::from_millis(10),
        }
    }
}

/// Removes one controller directory. A missing directory counts as removed.
pub type Remover = fn(&Path) -> io::Result<()>;

/// Knobs controlling how the cgroup layer touches the filesystem.
#[derive(Debug, Clone, Copy)]
pub struct CgroupOptions {
    /// Mode for directories created inside controller hierarchies.
    pub dir_mode: u32,
    /// Mode for control files that do not exist yet. `None` never creates
    /// them, which is what the kernel expects; plain directories used as
    /// fake hierarchies need `Some`.
    pub file_mode: Option<u32>,
    /// Removal retry schedule.
    pub remove_backoff: Backoff,
    /// How a controller directory is removed. Defaults to [`rmdir`], which
    /// leaves non-empty directories and nested groups alone; plain
    /// directories used as fake hierarchies need [`remove_tree`].
    pub remove: Remover,
}

impl Default for CgroupOptions {
    fn default() -> Self {
        Self {
            dir_mode: DEFAULT_DIR_MODE,
            file_mode: None,
            remove_backoff: Backoff::default(),
            remove: rmdir,
        }
    }
}

/// A controller driver. Capabilities are discovered through the `as_*`
/// accessors, each of which defaults to "not supported".
pub trait Subsystem: Send + Sync + fmt::Debug {
    /// Controller this driver handles.
    fn name(&self) -> Name;

    /// Path resolution capability.
    fn as_pather(&self) -> Option<&dyn Pather> {
        None
    }

    /// Creation capability.
    fn as_creator(&self) -> Option<&dyn Creator> {
        None
    }

    /// Custom removal capability.
    fn as_deleter(&self) -> Option<&dyn Deleter> {
        None
    }

    /// Accounting capability.
    fn as_stater(&self) -> Option<&dyn Stater> {
        None
    }

    /// Limit update capability.
    fn as_updater(&self) -> Option<&dyn Updater> {
        None
    }
}

/// Maps a cgroup path onto this controller's hierarchy.
pub trait Pather: Subsystem {
    /// Absolute directory of `path` inside the controller hierarchy.
    fn path(&self, path: &Path) -> PathBuf;
}

/// Creates the controller directory and applies initial limits.
pub trait Creator: Subsystem {
    /// Creates the directory for `path` and writes every set limit.
    ///
    /// # Errors
    ///
    /// Returns an error on the first failed directory creation or write.
    fn create(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()>;
}

/// Removes the controller directory in a controller-specific way.
pub trait Deleter: Subsystem {
    /// Removes the directory for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory survives.
    fn delete(&self, path: &Path) -> Result<()>;
}

/// Reads controller accounting.
pub trait Stater: Subsystem {
    /// Reads the accounting files for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if a required accounting file is missing or malformed.
    fn stat(&self, path: &Path) -> Result<Metrics>;
}

/// Rewrites limits on an existing group.
pub trait Updater: Subsystem {
    /// Writes every set limit for `path`. Unset limits are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error on the first failed write.
    fn update(&self, path: &Path, resources: &Resources, options: &CgroupOptions) -> Result<()>;
}

/// A process found in a controller's `cgroup.procs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    /// Controller the process was listed under.
    pub subsystem: Name,
    /// Process id.
    pub pid: i32,
    /// Directory the process was listed in.
    pub path: PathBuf,
}

/// A thread found in a controller's `tasks` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Controller the thread was listed under.
    pub subsystem: Name,
    /// Thread id.
    pub tid: i32,
    /// Directory the thread was listed in.
    pub path: PathBuf,
}

/// Builds the default driver set rooted at `root`, in driver order.
#[must_use]
pub fn defaults(root: &Path) -> Vec<Box<dyn Subsystem>> {
    vec![
        Box::new(pids::PidsController::new(root)),
        Box::new(net_cls::NetClsController::new(root)),
        Box::new(net_prio::NetPrioController::new(root)),
        Box::new(cpuset::CpusetController::new(root)),
        Box::new(cpu::CpuController::new(root)),
        Box::new(cpuacct::CpuacctController::new(root)),
        Box::new(memory::MemoryController::new(root)),
        Box::new(blkio::BlkioController::new(root)),
    ]
}
