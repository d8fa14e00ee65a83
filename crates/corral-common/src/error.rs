//! Unified error types for the corral workspace.
//!
//! [`CorralError`] is the workspace-wide error. The cgroup layer has its own
//! domain enum, [`CgroupError`], which converts into it so callers above the
//! cgroup layer can propagate with `?` while tests below it can still match
//! on the precise variant.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A resource with the same identity already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier of the conflicting resource.
        id: String,
    },

    /// A container identifier does not match the allowed format.
    #[error("invalid container id format: {id:?}")]
    InvalidId {
        /// The rejected identifier.
        id: String,
    },

    /// A permission or capability error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// The requested operation is not valid in the container's current status.
    #[error("container {id} is {status}: {message}")]
    InvalidState {
        /// Container identifier.
        id: String,
        /// Status the container was observed in.
        status: String,
        /// What was attempted.
        message: String,
    },

    /// A kernel-provided file did not have the expected layout.
    #[error("malformed {path}: {message}")]
    Malformed {
        /// File that was parsed.
        path: PathBuf,
        /// What was wrong with it.
        message: String,
    },

    /// A cgroup operation failed.
    #[error(transparent)]
    Cgroup(#[from] CgroupError),

    /// The container init process failed before executing the user command.
    #[error("container bootstrap failed: {message}")]
    Bootstrap {
        /// Description reported by the failing side.
        message: String,
    },

    /// A system call failed.
    #[error("{call} failed: {source}")]
    Sys {
        /// Name of the failing call, with context.
        call: String,
        /// Underlying errno.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CorralError {
    /// Builds a [`CorralError::Sys`] from a call description and any errno-like error.
    pub fn sys(call: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        Self::Sys {
            call: call.into(),
            source: source.into(),
        }
    }
}

/// Errors raised by the cgroup layer.
#[derive(Debug, Error)]
pub enum CgroupError {
    /// A pid of zero or less was supplied.
    #[error("cgroups: invalid pid {pid}")]
    InvalidPid {
        /// The rejected pid.
        pid: i32,
    },

    /// The cgroup was deleted; every further operation fails with this.
    #[error("cgroups: cgroup deleted")]
    Deleted,

    /// No `cgroup` filesystem entry exists in the mount table.
    #[error("cgroups: cgroup mountpoint does not exist")]
    MountPointNotFound,

    /// No mount carries the requested controller.
    #[error("cgroups: cannot find cgroup mount destination for {subsystem}")]
    NoMountDestination {
        /// Controller that was looked up.
        subsystem: String,
    },

    /// An accounting or mount-table line could not be parsed.
    #[error("cgroups: invalid format in {path}: {line:?}")]
    InvalidStatFormat {
        /// File the line came from.
        path: PathBuf,
        /// Offending line.
        line: String,
    },

    /// Reading or writing a control file failed.
    #[error("cgroups: I/O error at {path}: {source}")]
    Io {
        /// Control file or directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// One or more controller directories could not be removed.
    #[error("cgroups: unable to remove paths {}", paths.join(", "))]
    RemoveFailed {
        /// Paths (or controller names) that survived every attempt.
        paths: Vec<String>,
    },

    /// The named controller is not active in this cgroup.
    #[error("cgroups: subsystem {name} does not exist")]
    SubsystemNotFound {
        /// Requested controller name.
        name: String,
    },
}

impl CgroupError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` when the error is a missing file or directory.
    ///
    /// Used by Stat error handlers to tolerate controllers whose accounting
    /// files do not exist on the running kernel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;
