//! Child side of the container bootstrap: the hidden `init` sub-command.
//!
//! Runs on the main thread of the re-executed binary and never spawns
//! threads, so every namespace and mount change below applies to the one
//! thread that finally calls `execve`.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::os::fd::{FromRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use corral_common::constants::DEFAULT_PATH;
use corral_common::error::{CorralError, Result};
use corral_common::types::NamespaceType;
use corral_core::filesystem::{devices, mount, pivot_root};
use corral_core::namespace::uts;
use corral_core::sysctl;

use crate::bootstrap::{self, BOOTSTRAP_FD, BootstrapConfig, ERROR_FD, SYNC_FD};

/// Setup steps delegated to collaborators outside the runtime.
///
/// Every step defaults to doing nothing.
pub trait InitHooks {
    /// Brings up the configured interfaces.
    ///
    /// # Errors
    ///
    /// Aborts the bootstrap.
    fn setup_network(&self, _record: &BootstrapConfig) -> Result<()> {
        Ok(())
    }

    /// Installs the configured routes.
    ///
    /// # Errors
    ///
    /// Aborts the bootstrap.
    fn setup_routes(&self, _record: &BootstrapConfig) -> Result<()> {
        Ok(())
    }

    /// Assembles the root filesystem before the pivot.
    ///
    /// # Errors
    ///
    /// Aborts the bootstrap.
    fn prepare_rootfs(&self, _record: &BootstrapConfig) -> Result<()> {
        Ok(())
    }

    /// Cleans up staging mounts after the pivot. Only called when the
    /// container owns a mount namespace.
    ///
    /// # Errors
    ///
    /// Aborts the bootstrap.
    fn finalize_rootfs(&self, _record: &BootstrapConfig) -> Result<()> {
        Ok(())
    }
}

/// Hooks that leave networking and the rootfs as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl InitHooks for NoopHooks {
    fn setup_network(&self, record: &BootstrapConfig) -> Result<()> {
        if !record.config.networks.is_empty() {
            tracing::debug!(count = record.config.networks.len(), "no network provider, interfaces skipped");
        }
        Ok(())
    }
}

/// Runs the container init and returns an exit code if it fails.
///
/// On success the process image is replaced and this never returns. On
/// failure the error is sent to the runtime on the error descriptor.
pub fn run(hooks: &dyn InitHooks) -> i32 {
    for fd in [BOOTSTRAP_FD, SYNC_FD, ERROR_FD] {
        if let Err(e) = set_cloexec(fd) {
            tracing::error!(fd, error = %e, "bootstrap descriptor missing, not started by the runtime?");
            return 1;
        }
    }
    // SAFETY: the descriptor was checked above and nothing else owns it.
    let mut errors = unsafe { File::from_raw_fd(ERROR_FD) };
    let err = match setup(hooks) {
        Ok(never) => match never {},
        Err(err) => err,
    };
    tracing::error!(error = %err, "container init failed");
    if let Err(e) = bootstrap::report_error(&mut errors, &err.to_string()) {
        tracing::warn!(error = %e, "could not report init failure");
    }
    1
}

fn set_cloexec(fd: RawFd) -> Result<()> {
    // SAFETY: F_SETFD only changes descriptor flags.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(CorralError::sys(
            format!("fcntl({fd}, F_SETFD)"),
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}

fn clear_env() {
    for (key, _) in std::env::vars_os() {
        // SAFETY: the init is single-threaded.
        unsafe { std::env::remove_var(key) };
    }
}

fn setup(hooks: &dyn InitHooks) -> Result<Infallible> {
    clear_env();
    // SAFETY: descriptors 3 and 4 were validated in `run` and are consumed once.
    let record = bootstrap::read_config(&mut unsafe { File::from_raw_fd(BOOTSTRAP_FD) })?;
    bootstrap::wait_proceed(&mut unsafe { File::from_raw_fd(SYNC_FD) })?;
    tracing::debug!(container = %record.container_id, "bootstrap record received");
    let config = &record.config;

    hooks.setup_network(&record)?;
    hooks.setup_routes(&record)?;
    hooks.prepare_rootfs(&record)?;

    pivot_root::pivot_root(&config.rootfs)?;
    pivot_root::make_root_private()?;
    mount::mount_proc()?;
    mount::mount_dev()?;
    devices::populate(Path::new("/dev"))?;

    if config.contains_namespace(NamespaceType::Mount) {
        hooks.finalize_rootfs(&record)?;
    }
    if !config.hostname.is_empty() {
        uts::set_hostname(&config.hostname)?;
    }
    sysctl::apply(Path::new(sysctl::PROC_SYS), &config.sysctl)?;
    for path in &config.readonly_paths {
        mount::readonly_path(Path::new(path))?;
    }
    for path in &config.mask_paths {
        mount::mask_path(Path::new(path))?;
    }
    if config.readonlyfs {
        mount::readonly_root()?;
    }
    if !record.cwd.is_empty() {
        nix::unistd::chdir(record.cwd.as_str())
            .map_err(|e| CorralError::sys(format!("chdir {}", record.cwd), e))?;
    }
    exec(&record)
}

fn exec(record: &BootstrapConfig) -> Result<Infallible> {
    let command = record.args.first().ok_or_else(|| CorralError::Bootstrap {
        message: "no command to run".into(),
    })?;
    let search = record.path_var().unwrap_or(DEFAULT_PATH);
    let program = lookup_path(command, search).ok_or_else(|| CorralError::NotFound {
        kind: "executable",
        id: command.clone(),
    })?;
    let program_c = cstring(program.as_os_str().as_bytes())?;
    let args = record
        .args
        .iter()
        .map(|a| cstring(a.as_bytes()))
        .collect::<Result<Vec<_>>>()?;
    let env = record
        .env
        .iter()
        .map(|kv| cstring(kv.as_bytes()))
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!(program = %program.display(), "executing user command");
    nix::unistd::execve(&program_c, &args, &env)
        .map_err(|e| CorralError::sys(format!("execve {}", program.display()), e))
}

fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|e| CorralError::Bootstrap {
        message: format!("argument contains a NUL byte: {e}"),
    })
}

/// Resolves `command` against a `PATH`-style search list.
///
/// Commands containing a `/` are returned as given. Otherwise the first
/// regular file with an execute bit wins; an empty list entry means the
/// current directory.
#[must_use]
pub fn lookup_path(command: &str, search: &str) -> Option<PathBuf> {
    if command.contains('/') {
        return Some(PathBuf::from(command));
    }
    search
        .split(':')
        .map(|dir| Path::new(if dir.is_empty() { "." } else { dir }).join(command))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}
