//! Container-level view of the cgroup layer.
//!
//! [`ResourceManager`] turns a container's [`ResourceConfig`] into cgroup
//! [`Resources`], owns the resulting [`Cgroup`], and exposes the handful of
//! operations the lifecycle needs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use corral_common::config::{Config, ResourceConfig, RuntimeConfig};
use corral_common::error::Result;
use corral_core::cgroup::{
    self, BlockIoResources, Cgroup, CgroupOptions, CpuResources, InterfacePriority, MemoryResources,
    Name, NetworkResources, PidsResources, Resources, Stats,
};

/// Cgroup resources of one container.
#[derive(Debug)]
pub struct ResourceManager {
    cgroup: Cgroup,
}

impl ResourceManager {
    /// Creates the container's cgroup and applies its configured limits.
    ///
    /// The cgroup path is `config.cgroups.path`, or `id` when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy root cannot be found or a
    /// controller rejects a limit.
    pub fn new(id: &str, config: &Config, runtime: &RuntimeConfig) -> Result<Self> {
        Self::with_options(id, config, runtime, CgroupOptions::default())
    }

    /// Like [`ResourceManager::new`] with explicit cgroup options.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceManager::new`].
    pub fn with_options(
        id: &str,
        config: &Config,
        runtime: &RuntimeConfig,
        options: CgroupOptions,
    ) -> Result<Self> {
        let resources = config
            .cgroups
            .as_ref()
            .map(|c| resources_from_config(&c.resources))
            .unwrap_or_default();
        let path = cgroup_path(id, config);
        let root = hierarchy_root(runtime)?;
        let cgroup = Cgroup::with_root(&root, &path, &resources, options)?;
        Ok(Self { cgroup })
    }

    /// Reattaches to the cgroup of an existing container.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy root cannot be found.
    pub fn load(id: &str, config: &Config, runtime: &RuntimeConfig) -> Result<Self> {
        let root = hierarchy_root(runtime)?;
        let cgroup = Cgroup::load(&root, cgroup_path(id, config), CgroupOptions::default());
        Ok(Self { cgroup })
    }

    /// Places `pid` in the group, both as a process and as a task.
    ///
    /// # Errors
    ///
    /// Returns an error if the pid is invalid or any controller refuses it.
    pub fn apply(&self, pid: i32) -> Result<()> {
        self.cgroup.add(pid)?;
        self.cgroup.add_task(pid)?;
        tracing::debug!(pid, path = %self.cgroup.path().display(), "process placed in cgroup");
        Ok(())
    }

    /// Rewrites the configured limits.
    ///
    /// # Errors
    ///
    /// Returns the first controller that rejects a value.
    pub fn update(&self, resources: &ResourceConfig) -> Result<()> {
        self.cgroup.update(&resources_from_config(resources))?;
        Ok(())
    }

    /// Collects accounting, tolerating accounting files the kernel lacks.
    ///
    /// # Errors
    ///
    /// Returns the first accounting failure that is not a missing file.
    pub fn stats(&self) -> Result<Stats> {
        Ok(self.cgroup.stat(&[cgroup::ignore_not_exist])?)
    }

    /// Pids of every process in the group and its descendants.
    ///
    /// Listed from the `cpu` controller when active, otherwise from the
    /// first active controller.
    ///
    /// # Errors
    ///
    /// Returns an error if a listing cannot be read.
    pub fn processes(&self) -> Result<Vec<i32>> {
        let active = self.cgroup.subsystems();
        let Some(name) = active.iter().copied().find(|n| *n == Name::Cpu).or_else(|| active.first().copied()) else {
            return Ok(Vec::new());
        };
        let mut pids: Vec<i32> = self.cgroup.processes(name, true)?.into_iter().map(|p| p.pid).collect();
        pids.sort_unstable();
        pids.dedup();
        Ok(pids)
    }

    /// Absolute group directory per active controller, keyed by name.
    #[must_use]
    pub fn paths(&self) -> BTreeMap<String, PathBuf> {
        self.cgroup
            .paths()
            .into_iter()
            .map(|(name, path)| (name.to_string(), path))
            .collect()
    }

    /// Removes the group from every controller.
    ///
    /// # Errors
    ///
    /// Returns an error naming the controllers that could not be removed.
    pub fn destroy(&self) -> Result<()> {
        self.cgroup.delete()?;
        Ok(())
    }
}

fn cgroup_path(id: &str, config: &Config) -> PathBuf {
    config
        .cgroups
        .as_ref()
        .and_then(|c| c.path.as_deref())
        .map_or_else(|| PathBuf::from(id), PathBuf::from)
}

fn hierarchy_root(runtime: &RuntimeConfig) -> Result<PathBuf> {
    match &runtime.cgroup_root {
        Some(root) => Ok(root.clone()),
        None => Ok(cgroup::mount_point()?),
    }
}

/// Converts container limits into cgroup resources.
///
/// A controller section is present only when at least one of its fields
/// is set, so unset limits never reach a control file.
#[must_use]
pub fn resources_from_config(rc: &ResourceConfig) -> Resources {
    let cpu = CpuResources {
        shares: rc.cpu_shares,
        quota: rc.cpu_quota,
        period: rc.cpu_period,
        realtime_runtime: rc.cpu_rt_runtime,
        realtime_period: rc.cpu_rt_period,
        cpus: rc.cpuset_cpus.clone(),
        mems: rc.cpuset_mems.clone(),
    };
    let memory = MemoryResources {
        limit: rc.memory,
        swap: rc.memory_swap,
        kernel: rc.kernel_memory,
        kernel_tcp: rc.kernel_memory_tcp,
        swappiness: rc.memory_swappiness,
        reservation: rc.memory_reservation,
        disable_oom_killer: rc.oom_kill_disable,
    };
    let block_io = BlockIoResources {
        weight: rc.blkio_weight,
        leaf_weight: rc.blkio_leaf_weight,
    };
    let network = NetworkResources {
        class_id: rc.net_cls_classid,
        priorities: rc
            .net_prio_ifpriomap
            .iter()
            .map(|p| InterfacePriority {
                name: p.interface.clone(),
                priority: p.priority,
            })
            .collect(),
    };
    Resources {
        cpu: (cpu != CpuResources::default()).then_some(cpu),
        memory: (memory != MemoryResources::default()).then_some(memory),
        pids: rc.pids_limit.map(|limit| PidsResources { limit }),
        block_io: (block_io != BlockIoResources::default()).then_some(block_io),
        network: (network != NetworkResources::default()).then_some(network),
    }
}
