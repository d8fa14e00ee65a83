//! Parent side of the container bootstrap.
//!
//! The init is created with `clone(2)` in fresh UTS, PID, mount, network
//! and IPC namespaces and immediately re-executes this binary as
//! `/proc/self/exe init`. See [`crate::bootstrap`] for the descriptor ABI.

use corral_common::error::{CorralError, Result};

use nix::sys::signal::Signal;

/// The user command to run inside the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Command and arguments.
    pub args: Vec<String>,
    /// Environment as `KEY=value` pairs.
    pub env: Vec<String>,
    /// Working directory inside the container.
    pub cwd: String,
}

/// Handle to a container init, identified by pid and start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitProcess {
    /// Host pid.
    pub pid: i32,
    /// Start time in clock ticks since boot.
    pub start_time: u64,
}

impl InitProcess {
    /// Sends a signal to the init.
    ///
    /// # Errors
    ///
    /// Returns an error if `kill(2)` fails.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(self.pid), signal)
            .map_err(|e| CorralError::sys(format!("kill({}, {signal})", self.pid), e))
    }

    /// Waits for the init to exit and returns a shell-style exit code.
    ///
    /// Only the process that started the container can wait for it.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails.
    pub fn wait(&self) -> Result<i32> {
        use nix::sys::wait::{WaitStatus, waitpid};

        let pid = nix::unistd::Pid::from_raw(self.pid);
        loop {
            match waitpid(pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
                Ok(_) | Err(nix::errno::Errno::EINTR) => {}
                Err(e) => return Err(CorralError::sys(format!("waitpid({})", self.pid), e)),
            }
        }
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::ffi::{CStr, CString};
    use std::fs::File;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
    use std::path::Path;

    use nix::fcntl::OFlag;
    use nix::sys::signal::{Signal, kill};
    use nix::sys::wait::waitpid;
    use nix::unistd::Pid;

    use corral_common::constants::{INIT_COMMAND, SELF_EXE};
    use corral_common::error::{CorralError, Result};
    use corral_core::namespace::{INIT_NAMESPACES, clone_flags};

    use super::InitProcess;
    use crate::bootstrap::{self, BOOTSTRAP_FD, BootstrapConfig, ERROR_FD, SYNC_FD};
    use crate::manager::ResourceManager;
    use crate::proc;

    const STACK_SIZE: usize = 1024 * 1024;

    /// Lowest descriptor the child ends are moved to before `clone`, so the
    /// `dup2` onto 3..=5 in the child never overwrites a source.
    const CHILD_FD_FLOOR: RawFd = 10;

    const EXEC_FAILED: &[u8] = br#"{"message":"exec /proc/self/exe init failed"}"#;

    struct Pipe {
        read: OwnedFd,
        write: OwnedFd,
    }

    impl Pipe {
        fn new() -> Result<Self> {
            let (read, write) =
                nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| CorralError::sys("pipe2", e))?;
            Ok(Self { read, write })
        }
    }

    fn dup_above(fd: &OwnedFd) -> Result<OwnedFd> {
        // SAFETY: F_DUPFD_CLOEXEC only duplicates a descriptor we own.
        let raw = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, CHILD_FD_FLOOR) };
        if raw < 0 {
            return Err(CorralError::sys(
                "fcntl(F_DUPFD_CLOEXEC)",
                std::io::Error::last_os_error(),
            ));
        }
        // SAFETY: `raw` is a fresh descriptor nobody else owns.
        Ok(unsafe { OwnedFd::from_raw_fd(raw) })
    }

    /// Runs in the cloned child. Only async-signal-safe calls are allowed
    /// here; everything it touches was allocated before the clone.
    fn exec_init(fds: [RawFd; 3], exe: &CStr, argv: &[*const libc::c_char]) -> isize {
        for (src, dst) in fds.into_iter().zip([BOOTSTRAP_FD, SYNC_FD, ERROR_FD]) {
            // SAFETY: both descriptors are valid; dup2 clears FD_CLOEXEC on `dst`.
            if unsafe { libc::dup2(src, dst) } < 0 {
                return 126;
            }
        }
        // SAFETY: `exe` and `argv` are NUL-terminated and outlive the call.
        let _ = unsafe { libc::execv(exe.as_ptr(), argv.as_ptr()) };
        // SAFETY: writing a static buffer to a descriptor we just installed.
        let _ = unsafe { libc::write(ERROR_FD, EXEC_FAILED.as_ptr().cast(), EXEC_FAILED.len()) };
        127
    }

    fn kill_and_reap(pid: Pid) {
        if let Err(e) = kill(pid, Signal::SIGKILL) {
            tracing::warn!(pid = pid.as_raw(), error = %e, "failed to kill container init");
        }
        if let Err(e) = waitpid(pid, None) {
            tracing::warn!(pid = pid.as_raw(), error = %e, "failed to reap container init");
        }
    }

    /// Starts the init, hands it the bootstrap record, places it in the
    /// container's cgroup and waits until it has executed the user command.
    pub fn start(record: &BootstrapConfig, manager: &ResourceManager, proc_root: &Path) -> Result<InitProcess> {
        let bootstrap_pipe = Pipe::new()?;
        let sync_pipe = Pipe::new()?;
        let error_pipe = Pipe::new()?;

        let child_fds = [
            dup_above(&bootstrap_pipe.read)?,
            dup_above(&sync_pipe.read)?,
            dup_above(&error_pipe.write)?,
        ];
        drop(bootstrap_pipe.read);
        drop(sync_pipe.read);
        drop(error_pipe.write);

        let exe = CString::new(SELF_EXE).map_err(|e| CorralError::sys("init path", std::io::Error::other(e)))?;
        let init = CString::new(INIT_COMMAND).map_err(|e| CorralError::sys("init argument", std::io::Error::other(e)))?;
        let argv = [exe.as_ptr(), init.as_ptr(), std::ptr::null()];
        let raw_fds = child_fds.each_ref().map(|fd| fd.as_raw_fd());

        let mut stack = vec![0u8; STACK_SIZE];
        let callback = Box::new(|| exec_init(raw_fds, &exe, &argv));
        // SAFETY: without CLONE_VM the child runs on a copy of this address
        // space and only makes async-signal-safe calls before exec.
        let pid = unsafe {
            nix::sched::clone(
                callback,
                &mut stack,
                clone_flags(INIT_NAMESPACES),
                Some(libc::SIGCHLD),
            )
        }
        .map_err(|e| CorralError::sys("clone", e))?;
        drop(child_fds);
        tracing::debug!(pid = pid.as_raw(), container = %record.container_id, "init cloned");

        let handshake = || -> Result<()> {
            let mut writer = File::from(bootstrap_pipe.write);
            bootstrap::write_config(&mut writer, record)?;
            drop(writer);
            manager.apply(pid.as_raw())?;
            let mut sync = File::from(sync_pipe.write);
            bootstrap::send_proceed(&mut sync)
        };
        let mut errors = File::from(error_pipe.read);
        if let Err(e) = handshake() {
            kill_and_reap(pid);
            // Every write end is closed once the init is reaped.
            return Err(bootstrap::reported_or(&mut errors, e));
        }

        if let Some(failure) = bootstrap::read_error(&mut errors)? {
            if let Err(e) = waitpid(pid, None) {
                tracing::warn!(pid = pid.as_raw(), error = %e, "failed to reap container init");
            }
            return Err(CorralError::Bootstrap {
                message: failure.message,
            });
        }

        let start_time = proc::stat(proc_root, pid.as_raw())?.start_time;
        tracing::info!(pid = pid.as_raw(), container = %record.container_id, "container init running");
        Ok(InitProcess {
            pid: pid.as_raw(),
            start_time,
        })
    }
}

#[cfg(target_os = "linux")]
pub use linux::start;

/// Starts the container init.
///
/// # Errors
///
/// Always fails: namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn start(
    _record: &crate::bootstrap::BootstrapConfig,
    _manager: &crate::manager::ResourceManager,
    _proc_root: &std::path::Path,
) -> Result<InitProcess> {
    Err(CorralError::Config {
        message: "Linux required for native container operations".into(),
    })
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn wait_reports_exit_codes() {
        let child = std::process::Command::new("sh")
            .args(["-c", "exit 3"])
            .spawn()
            .expect("spawn");
        let init = InitProcess {
            pid: i32::try_from(child.id()).expect("pid"),
            start_time: 0,
        };
        assert_eq!(init.wait().expect("wait"), 3);
    }

    #[test]
    fn wait_maps_signals_above_128() {
        let child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn");
        let init = InitProcess {
            pid: i32::try_from(child.id()).expect("pid"),
            start_time: 0,
        };
        init.signal(Signal::SIGKILL).expect("kill");
        assert_eq!(init.wait().expect("wait"), 128 + 9);
    }
}
