//! Linux namespace helpers.
//!
//! The container init is created with fresh namespaces at clone time;
//! this module maps the configured namespace kinds to clone flags and
//! resolves the `/proc/<pid>/ns/*` paths recorded in the container state.

pub mod uts;

use std::collections::BTreeMap;
use std::path::Path;

use corral_common::config::Namespace;
use corral_common::types::NamespaceType;

/// Namespaces every container init is cloned into.
pub const INIT_NAMESPACES: [NamespaceType; 5] = [
    NamespaceType::Uts,
    NamespaceType::Pid,
    NamespaceType::Mount,
    NamespaceType::Net,
    NamespaceType::Ipc,
];

/// Returns the `CLONE_NEW*` flag for a namespace kind.
#[cfg(target_os = "linux")]
#[must_use]
pub const fn clone_flag(kind: NamespaceType) -> nix::sched::CloneFlags {
    use nix::sched::CloneFlags;
    match kind {
        NamespaceType::Mount => CloneFlags::CLONE_NEWNS,
        NamespaceType::Uts => CloneFlags::CLONE_NEWUTS,
        NamespaceType::Ipc => CloneFlags::CLONE_NEWIPC,
        NamespaceType::Pid => CloneFlags::CLONE_NEWPID,
        NamespaceType::Net => CloneFlags::CLONE_NEWNET,
        NamespaceType::User => CloneFlags::CLONE_NEWUSER,
        NamespaceType::Cgroup => CloneFlags::CLONE_NEWCGROUP,
    }
}

/// Combines the clone flags of several namespace kinds.
#[cfg(target_os = "linux")]
#[must_use]
pub fn clone_flags(kinds: impl IntoIterator<Item = NamespaceType>) -> nix::sched::CloneFlags {
    kinds
        .into_iter()
        .fold(nix::sched::CloneFlags::empty(), |acc, kind| acc | clone_flag(kind))
}

/// Returns whether the kernel under `proc_root` exposes this namespace kind.
#[must_use]
pub fn is_supported(proc_root: &Path, kind: NamespaceType) -> bool {
    proc_root.join("self/ns").join(kind.proc_name()).exists()
}

/// Resolves the namespace paths of a container init.
///
/// Every configured namespace maps to its explicit path, or to
/// `/proc/<pid>/ns/<name>` when it is created fresh. Supported kinds that
/// are not configured are shared with the host and map to the init's
/// own `/proc/<pid>/ns/<name>` as well.
#[must_use]
pub fn namespace_paths(
    pid: i32,
    configured: &[Namespace],
    proc_root: &Path,
) -> BTreeMap<NamespaceType, String> {
    let mut paths: BTreeMap<NamespaceType, String> = configured
        .iter()
        .map(|ns| {
            let path = ns.path.clone().unwrap_or_else(|| ns.kind.path_for(pid));
            (ns.kind, path)
        })
        .collect();
    for kind in NamespaceType::ALL {
        if is_supported(proc_root, kind) {
            let _ = paths.entry(kind).or_insert_with(|| kind.path_for(pid));
        }
    }
    paths
}
