//! Configuration models for the corral runtime.
//!
//! [`RuntimeConfig`] describes where the runtime keeps its state.
//! [`Config`] is the per-container record loaded from a bundle's
//! `config.json`; it travels unchanged to the container init and is
//! persisted inside the container state.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CorralError, Result};
use crate::types::NamespaceType;

/// Root configuration for the corral runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory holding one state directory per container.
    pub root: PathBuf,
    /// Cgroup hierarchy root. When absent the root is discovered from
    /// the mount table.
    pub cgroup_root: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(crate::constants::DEFAULT_ROOT),
            cgroup_root: None,
        }
    }
}

impl RuntimeConfig {
    /// Directory holding the state of one container.
    #[must_use]
    pub fn container_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }
}

/// A namespace the container should own, optionally joined from a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Kind of namespace.
    #[serde(rename = "type")]
    pub kind: NamespaceType,
    /// Existing namespace to join instead of creating a fresh one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// UID/GID mapping for user namespaces. Carried through, never applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    /// First id inside the container.
    pub container_id: u32,
    /// First id on the host.
    pub host_id: u32,
    /// Number of mapped ids.
    pub size: u32,
}

/// Network interface request handed to the network collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Interface strategy, e.g. `loopback` or `veth`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Interface name inside the container.
    #[serde(default)]
    pub name: String,
    /// Host bridge to attach to.
    #[serde(default)]
    pub bridge: String,
    /// Address in CIDR notation.
    #[serde(default)]
    pub address: String,
    /// Default gateway.
    #[serde(default)]
    pub gateway: String,
    /// Interface MTU; zero keeps the kernel default.
    #[serde(default)]
    pub mtu: u32,
}

/// Route entry handed to the route collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination in CIDR notation.
    pub destination: String,
    /// Preferred source address.
    #[serde(default)]
    pub source: String,
    /// Gateway address.
    #[serde(default)]
    pub gateway: String,
    /// Outgoing interface.
    #[serde(default)]
    pub interface_name: String,
}

/// Interface priority entry for the `net_prio` controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfPrioMap {
    /// Interface name.
    pub interface: String,
    /// Priority assigned to traffic leaving through the interface.
    pub priority: u32,
}

/// Resource limits requested for the container's cgroup.
///
/// Every field is optional: an absent field leaves the kernel default in
/// place instead of writing zero.
#[allow(clippy::struct_field_names)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    /// Relative CPU weight.
    pub cpu_shares: Option<u64>,
    /// CFS quota in microseconds per period; negative means unlimited.
    pub cpu_quota: Option<i64>,
    /// CFS period in microseconds.
    pub cpu_period: Option<u64>,
    /// Realtime period in microseconds.
    pub cpu_rt_period: Option<u64>,
    /// Realtime runtime in microseconds.
    pub cpu_rt_runtime: Option<i64>,
    /// CPUs the container may run on, e.g. `0-3,6`.
    pub cpuset_cpus: Option<String>,
    /// Memory nodes the container may allocate from.
    pub cpuset_mems: Option<String>,
    /// Memory limit in bytes; `-1` means unlimited.
    pub memory: Option<i64>,
    /// Memory plus swap limit in bytes.
    pub memory_swap: Option<i64>,
    /// Soft memory limit in bytes.
    pub memory_reservation: Option<i64>,
    /// Kernel memory limit in bytes.
    pub kernel_memory: Option<i64>,
    /// Kernel TCP buffer limit in bytes.
    pub kernel_memory_tcp: Option<i64>,
    /// Swappiness, 0 to 100.
    pub memory_swappiness: Option<u64>,
    /// Disable the OOM killer for the container.
    pub oom_kill_disable: Option<bool>,
    /// Maximum number of tasks; negative means unlimited.
    pub pids_limit: Option<i64>,
    /// Block I/O weight, 10 to 1000.
    pub blkio_weight: Option<u16>,
    /// Block I/O weight for the cgroup's own tasks versus its children.
    pub blkio_leaf_weight: Option<u16>,
    /// Class id tagged on outgoing packets.
    pub net_cls_classid: Option<u32>,
    /// Per-interface traffic priorities.
    pub net_prio_ifpriomap: Vec<IfPrioMap>,
}

/// Cgroup placement and limits for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupConfig {
    /// Cgroup path relative to each controller root. Defaults to the container id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Resource limits.
    #[serde(default)]
    pub resources: ResourceConfig,
}

/// Configuration for executing a process inside a contained environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the container's root filesystem.
    pub rootfs: PathBuf,
    /// Remount the root filesystem read-only once set up.
    pub readonlyfs: bool,
    /// Hostname set inside the UTS namespace.
    pub hostname: String,
    /// Namespaces the container owns.
    pub namespaces: Vec<Namespace>,
    /// Cgroup placement and resource limits.
    pub cgroups: Option<CgroupConfig>,
    /// Paths bind-mounted over with `/dev/null` inside the container.
    pub mask_paths: Vec<String>,
    /// Paths remounted read-only inside the container.
    pub readonly_paths: Vec<String>,
    /// Kernel parameters written under `/proc/sys`.
    pub sysctl: BTreeMap<String, String>,
    /// User-defined labels.
    pub labels: Vec<String>,
    /// UID mappings for user namespaces.
    pub uid_mappings: Vec<IdMap>,
    /// GID mappings for user namespaces.
    pub gid_mappings: Vec<IdMap>,
    /// Network interfaces to provision.
    pub networks: Vec<Network>,
    /// Routes to install.
    pub routes: Vec<Route>,
}

impl Config {
    /// Loads and validates `config.json` from a bundle directory.
    ///
    /// A relative `rootfs` is resolved against the bundle directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// fails validation.
    pub fn load(bundle: &Path) -> Result<Self> {
        let path = bundle.join(crate::constants::CONFIG_FILENAME);
        let content = std::fs::read_to_string(&path).map_err(|e| CorralError::Io {
            path: path.clone(),
            source: e,
        })?;
        let mut config: Self = serde_json::from_str(&content)?;
        if config.rootfs.is_relative() {
            config.rootfs = bundle.join(&config.rootfs);
        }
        config.validate()?;
        tracing::debug!(path = %path.display(), rootfs = %config.rootfs.display(), "config loaded");
        Ok(config)
    }

    /// Checks the invariants the runtime relies on.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Config`] on an empty rootfs, a duplicated
    /// namespace, or an empty sysctl key.
    pub fn validate(&self) -> Result<()> {
        if self.rootfs.as_os_str().is_empty() {
            return Err(CorralError::Config {
                message: "rootfs must not be empty".into(),
            });
        }
        let mut seen = HashSet::new();
        for ns in &self.namespaces {
            if !seen.insert(ns.kind) {
                return Err(CorralError::Config {
                    message: format!("namespace {} listed more than once", ns.kind),
                });
            }
        }
        if self.sysctl.keys().any(String::is_empty) {
            return Err(CorralError::Config {
                message: "sysctl key must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Returns whether the container owns a namespace of this kind.
    #[must_use]
    pub fn contains_namespace(&self, kind: NamespaceType) -> bool {
        self.namespaces.iter().any(|ns| ns.kind == kind)
    }
}
