//! Domain primitive types used across the corral workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CorralError, Result};

/// Maximum length of a container identifier.
const MAX_ID_LEN: usize = 1024;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID without validation.
    ///
    /// Use [`ContainerId::parse`] for identifiers that come from users.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parses and validates a user-supplied identifier.
    ///
    /// Accepted ids are 1 to 1024 characters drawn from ASCII letters,
    /// digits, `_`, `+`, `-` and `.`, and are never `.` or `..`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InvalidId`] if the identifier is malformed.
    pub fn parse(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid_chars = id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '.'));
        if id.is_empty() || id.len() > MAX_ID_LEN || !valid_chars || id == "." || id == ".." {
            return Err(CorralError::InvalidId { id });
        }
        Ok(Self(id))
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime status of a container.
///
/// Status is never stored; it is derived from the init process on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The container exists but its init process has not run the user command yet.
    Created,
    /// The init process is alive.
    Running,
    /// The container is being frozen.
    Pausing,
    /// All processes of the container are frozen.
    Paused,
    /// No live init process exists.
    Stopped,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Pausing => write!(f, "pausing"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Kernel namespace kinds a container can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NamespaceType {
    /// Mount namespace.
    #[serde(rename = "NEWNS")]
    Mount,
    /// UTS (hostname) namespace.
    #[serde(rename = "NEWUTS")]
    Uts,
    /// System V IPC namespace.
    #[serde(rename = "NEWIPC")]
    Ipc,
    /// Process id namespace.
    #[serde(rename = "NEWPID")]
    Pid,
    /// Network namespace.
    #[serde(rename = "NEWNET")]
    Net,
    /// User namespace.
    #[serde(rename = "NEWUSER")]
    User,
    /// Cgroup namespace.
    #[serde(rename = "NEWCGROUP")]
    Cgroup,
}

impl NamespaceType {
    /// Every namespace type, in the order they are reported.
    pub const ALL: [Self; 7] = [
        Self::Mount,
        Self::Uts,
        Self::Ipc,
        Self::Pid,
        Self::Net,
        Self::User,
        Self::Cgroup,
    ];

    /// Name of the namespace file under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::Pid => "pid",
            Self::Net => "net",
            Self::User => "user",
            Self::Cgroup => "cgroup",
        }
    }

    /// Path of this namespace for the given process.
    #[must_use]
    pub fn path_for(self, pid: i32) -> String {
        format!("/proc/{pid}/ns/{}", self.proc_name())
    }
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.proc_name())
    }
}
