//! Resource limits understood by the controller drivers.
//!
//! Every tunable is optional. Drivers write a control file only for the
//! fields that are set, so an unset field keeps whatever the kernel has.

use serde::{Deserialize, Serialize};

/// Limits applied to a cgroup, grouped by controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    /// `cpu` and `cpuset` tunables.
    pub cpu: Option<CpuResources>,
    /// `memory` tunables.
    pub memory: Option<MemoryResources>,
    /// `pids` tunables.
    pub pids: Option<PidsResources>,
    /// `blkio` tunables.
    pub block_io: Option<BlockIoResources>,
    /// `net_cls` and `net_prio` tunables.
    pub network: Option<NetworkResources>,
}

/// CPU scheduling and placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuResources {
    /// `cpu.shares`.
    pub shares: Option<u64>,
    /// `cpu.cfs_quota_us`; `-1` removes the quota.
    pub quota: Option<i64>,
    /// `cpu.cfs_period_us`.
    pub period: Option<u64>,
    /// `cpu.rt_runtime_us`.
    pub realtime_runtime: Option<i64>,
    /// `cpu.rt_period_us`.
    pub realtime_period: Option<u64>,
    /// `cpuset.cpus`.
    pub cpus: Option<String>,
    /// `cpuset.mems`.
    pub mems: Option<String>,
}

/// Memory limits, in bytes unless noted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryResources {
    /// `memory.limit_in_bytes`.
    pub limit: Option<i64>,
    /// `memory.memsw.limit_in_bytes`, memory plus swap.
    pub swap: Option<i64>,
    /// `memory.kmem.limit_in_bytes`.
    pub kernel: Option<i64>,
    /// `memory.kmem.tcp.limit_in_bytes`.
    pub kernel_tcp: Option<i64>,
    /// `memory.swappiness`, 0 to 100.
    pub swappiness: Option<u64>,
    /// `memory.soft_limit_in_bytes`.
    pub reservation: Option<i64>,
    /// Writes `1` to `memory.oom_control` when set to `true`.
    pub disable_oom_killer: Option<bool>,
}

/// Task count limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidsResources {
    /// Positive values are written as-is, negative values as `max`, zero
    /// leaves `pids.max` untouched.
    pub limit: i64,
}

/// Block I/O weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockIoResources {
    /// `blkio.weight`.
    pub weight: Option<u16>,
    /// `blkio.leaf_weight`.
    pub leaf_weight: Option<u16>,
}

/// Network classification and priorities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkResources {
    /// `net_cls.classid`.
    pub class_id: Option<u32>,
    /// Entries written one at a time to `net_prio.ifpriomap`.
    pub priorities: Vec<InterfacePriority>,
}

/// One `net_prio.ifpriomap` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfacePriority {
    /// Interface name.
    pub name: String,
    /// Priority for traffic leaving through the interface.
    pub priority: u32,
}
