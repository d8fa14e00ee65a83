//! System-wide constants and default paths.

/// Default root directory holding one state directory per container.
pub const DEFAULT_ROOT: &str = "/run/corral";

/// Environment variable overriding [`DEFAULT_ROOT`].
pub const ROOT_ENV: &str = "CORRAL_ROOT";

/// File name of the persisted container state inside its directory.
pub const STATE_FILENAME: &str = "state.json";

/// File name of the container configuration inside a bundle directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Location of the calling process's mount table.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Mount point of the proc filesystem.
pub const PROC_ROOT: &str = "/proc";

/// Path used to re-execute the running binary.
pub const SELF_EXE: &str = "/proc/self/exe";

/// Sub-command the re-executed binary runs to become a container init.
pub const INIT_COMMAND: &str = "init";

/// Search path used when the container environment carries no `PATH`.
pub const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Application name used in CLI output and log fields.
pub const APP_NAME: &str = "corral";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "corral";
