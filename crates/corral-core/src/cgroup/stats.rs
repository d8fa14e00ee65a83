//! Accounting snapshots returned by [`Cgroup::stat`](super::Cgroup::stat).
//!
//! An absent section means the controller is not active for the group or
//! its driver was not asked; it never means "zero".

use serde::{Deserialize, Serialize};

/// Merged accounting across every active stat-capable driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Filled by `cpu` (throttling) and `cpuacct` (usage).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuStat>,
    /// Filled by `memory`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStat>,
    /// Filled by `pids`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pids: Option<PidsStat>,
    /// Filled by `blkio`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blkio: Option<BlkioStat>,
}

impl Stats {
    /// Folds one driver's fragment into the snapshot.
    pub fn merge(&mut self, metrics: Metrics) {
        match metrics {
            Metrics::Throttling(t) => self.cpu.get_or_insert_with(CpuStat::default).throttling = Some(t),
            Metrics::CpuUsage(u) => self.cpu.get_or_insert_with(CpuStat::default).usage = Some(u),
            Metrics::Memory(m) => self.memory = Some(m),
            Metrics::Pids(p) => self.pids = Some(p),
            Metrics::Blkio(b) => self.blkio = Some(b),
        }
    }
}

/// The part of [`Stats`] a single driver produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metrics {
    /// From `cpu.stat`.
    Throttling(ThrottlingStat),
    /// From the `cpuacct.*` files.
    CpuUsage(CpuUsage),
    /// From the `memory.*` files.
    Memory(MemoryStat),
    /// From `pids.current` and `pids.max`.
    Pids(PidsStat),
    /// From the `blkio.*` files.
    Blkio(BlkioStat),
}

/// CPU accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStat {
    /// Time consumed, from `cpuacct`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CpuUsage>,
    /// CFS bandwidth throttling, from `cpu`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throttling: Option<ThrottlingStat>,
}

/// CPU time consumed by the group, in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuUsage {
    /// Total CPU time.
    pub total: u64,
    /// CPU time per CPU.
    pub per_cpu: Vec<u64>,
    /// Time spent in kernel mode.
    pub kernel: u64,
    /// Time spent in user mode.
    pub user: u64,
}

/// CFS bandwidth throttling counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottlingStat {
    /// Enforcement periods elapsed.
    pub periods: u64,
    /// Periods in which the group was throttled.
    pub throttled_periods: u64,
    /// Total throttled time in nanoseconds.
    pub throttled_time: u64,
}

/// Task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidsStat {
    /// Tasks currently in the group.
    pub current: u64,
    /// Configured limit; zero when unlimited.
    pub limit: u64,
}

/// Usage counters for one memory accounting domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// `*.limit_in_bytes`.
    pub limit: u64,
    /// `*.usage_in_bytes`.
    pub usage: u64,
    /// `*.max_usage_in_bytes`.
    pub max: u64,
    /// `*.failcnt`.
    pub failcnt: u64,
}

/// Memory accounting: the `memory.stat` counters plus usage entries.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStat {
    pub cache: u64,
    pub rss: u64,
    pub rss_huge: u64,
    pub mapped_file: u64,
    pub dirty: u64,
    pub writeback: u64,
    pub pg_pg_in: u64,
    pub pg_pg_out: u64,
    pub pg_fault: u64,
    pub pg_maj_fault: u64,
    pub inactive_anon: u64,
    pub active_anon: u64,
    pub inactive_file: u64,
    pub active_file: u64,
    pub unevictable: u64,
    pub hierarchical_memory_limit: u64,
    pub hierarchical_swap_limit: u64,
    pub total_cache: u64,
    pub total_rss: u64,
    pub total_rss_huge: u64,
    pub total_mapped_file: u64,
    pub total_dirty: u64,
    pub total_writeback: u64,
    pub total_pg_pg_in: u64,
    pub total_pg_pg_out: u64,
    pub total_pg_fault: u64,
    pub total_pg_maj_fault: u64,
    pub total_inactive_anon: u64,
    pub total_active_anon: u64,
    pub total_inactive_file: u64,
    pub total_active_file: u64,
    pub total_unevictable: u64,
    /// `memory.*`.
    pub usage: MemoryEntry,
    /// `memory.memsw.*`; absent when swap accounting is off.
    pub swap: Option<MemoryEntry>,
    /// `memory.kmem.*`; absent when kernel memory accounting is off.
    pub kernel: Option<MemoryEntry>,
    /// `memory.kmem.tcp.*`; absent when TCP buffer accounting is off.
    pub kernel_tcp: Option<MemoryEntry>,
}

impl MemoryStat {
    /// Stores a `memory.stat` counter. Unknown keys are ignored.
    pub(crate) fn set(&mut self, key: &str, value: u64) {
        let slot = match key {
            "cache" => &mut self.cache,
            "rss" => &mut self.rss,
            "rss_huge" => &mut self.rss_huge,
            "mapped_file" => &mut self.mapped_file,
            "dirty" => &mut self.dirty,
            "writeback" => &mut self.writeback,
            "pgpgin" => &mut self.pg_pg_in,
            "pgpgout" => &mut self.pg_pg_out,
            "pgfault" => &mut self.pg_fault,
            "pgmajfault" => &mut self.pg_maj_fault,
            "inactive_anon" => &mut self.inactive_anon,
            "active_anon" => &mut self.active_anon,
            "inactive_file" => &mut self.inactive_file,
            "active_file" => &mut self.active_file,
            "unevictable" => &mut self.unevictable,
            "hierarchical_memory_limit" => &mut self.hierarchical_memory_limit,
            "hierarchical_memsw_limit" => &mut self.hierarchical_swap_limit,
            "total_cache" => &mut self.total_cache,
            "total_rss" => &mut self.total_rss,
            "total_rss_huge" => &mut self.total_rss_huge,
            "total_mapped_file" => &mut self.total_mapped_file,
            "total_dirty" => &mut self.total_dirty,
            "total_writeback" => &mut self.total_writeback,
            "total_pgpgin" => &mut self.total_pg_pg_in,
            "total_pgpgout" => &mut self.total_pg_pg_out,
            "total_pgfault" => &mut self.total_pg_fault,
            "total_pgmajfault" => &mut self.total_pg_maj_fault,
            "total_inactive_anon" => &mut self.total_inactive_anon,
            "total_active_anon" => &mut self.total_active_anon,
            "total_inactive_file" => &mut self.total_inactive_file,
            "total_active_file" => &mut self.total_active_file,
            "total_unevictable" => &mut self.total_unevictable,
            _ => return,
        };
        *slot = value;
    }
}

/// One block I/O accounting line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlkioEntry {
    /// Operation (`Read`, `Write`, `Sync`, `Async`, `Total`); empty for
    /// files without an operation column.
    pub op: String,
    /// Device name resolved from the kernel, empty when unknown.
    pub device: String,
    /// Device major number.
    pub major: u64,
    /// Device minor number.
    pub minor: u64,
    /// Counter value.
    pub value: u64,
}

/// Block I/O accounting, one list per `blkio` file.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlkioStat {
    pub io_service_bytes_recursive: Vec<BlkioEntry>,
    pub io_serviced_recursive: Vec<BlkioEntry>,
    pub io_queued_recursive: Vec<BlkioEntry>,
    pub io_service_time_recursive: Vec<BlkioEntry>,
    pub io_wait_time_recursive: Vec<BlkioEntry>,
    pub io_merged_recursive: Vec<BlkioEntry>,
    pub io_time_recursive: Vec<BlkioEntry>,
    pub sectors_recursive: Vec<BlkioEntry>,
}
