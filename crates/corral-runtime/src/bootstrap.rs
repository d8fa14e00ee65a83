//! Wire protocol between the runtime and the container init.
//!
//! The init inherits three pipe ends at fixed descriptors:
//!
//! | fd | direction       | content                                      |
//! |----|-----------------|----------------------------------------------|
//! | 3  | runtime → init  | one JSON [`BootstrapConfig`], then EOF       |
//! | 4  | runtime → init  | a single byte once the cgroup is applied     |
//! | 5  | init → runtime  | empty on success, one JSON [`InitError`] else |
//!
//! Descriptor 5 is close-on-exec in the init, so the runtime observes EOF
//! as soon as the user command replaces the init image.

use std::io::{Read, Write};
use std::os::fd::RawFd;

use serde::{Deserialize, Serialize};

use corral_common::config::Config;
use corral_common::error::{CorralError, Result};

/// Descriptor carrying the bootstrap record.
pub const BOOTSTRAP_FD: RawFd = 3;
/// Descriptor carrying the go-ahead byte.
pub const SYNC_FD: RawFd = 4;
/// Descriptor the init reports failures on.
pub const ERROR_FD: RawFd = 5;

const PROCEED: u8 = b'1';

/// Everything the init needs to set up the container and exec the user
/// command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Container identifier.
    pub container_id: String,
    /// Command and arguments; the first element is resolved through `PATH`.
    pub args: Vec<String>,
    /// Environment of the user command, as `KEY=value` pairs.
    pub env: Vec<String>,
    /// Working directory inside the container.
    pub cwd: String,
    /// Container configuration.
    pub config: Config,
}

impl BootstrapConfig {
    /// Value of `PATH` in the command environment, if set.
    #[must_use]
    pub fn path_var(&self) -> Option<&str> {
        self.env.iter().rev().find_map(|kv| kv.strip_prefix("PATH="))
    }
}

/// Failure reported by the init before it executed the user command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitError {
    /// Human-readable description.
    pub message: String,
}

/// Sends the bootstrap record. The caller closes the writer afterwards.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn write_config(writer: &mut impl Write, config: &BootstrapConfig) -> Result<()> {
    serde_json::to_writer(&mut *writer, config)?;
    writer.flush().map_err(|e| CorralError::sys("write bootstrap record", e))
}

/// Reads the bootstrap record until EOF.
///
/// # Errors
///
/// Returns an error if the read fails or the record is not valid JSON.
pub fn read_config(reader: &mut impl Read) -> Result<BootstrapConfig> {
    let mut buf = Vec::new();
    let _ = reader
        .read_to_end(&mut buf)
        .map_err(|e| CorralError::sys("read bootstrap record", e))?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Tells the init to proceed.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn send_proceed(writer: &mut impl Write) -> Result<()> {
    writer
        .write_all(&[PROCEED])
        .map_err(|e| CorralError::sys("write sync byte", e))
}

/// Blocks until the runtime says to proceed.
///
/// # Errors
///
/// Returns [`CorralError::Bootstrap`] if the pipe closes first or carries
/// an unexpected byte.
pub fn wait_proceed(reader: &mut impl Read) -> Result<()> {
    let mut byte = [0u8; 1];
    match reader.read(&mut byte) {
        Ok(1) if byte[0] == PROCEED => Ok(()),
        Ok(0) => Err(CorralError::Bootstrap {
            message: "sync pipe closed before the runtime signalled".into(),
        }),
        Ok(_) => Err(CorralError::Bootstrap {
            message: format!("unexpected sync byte {:#04x}", byte[0]),
        }),
        Err(e) => Err(CorralError::sys("read sync byte", e)),
    }
}

/// Reports a failure to the runtime.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn report_error(writer: &mut impl Write, message: &str) -> Result<()> {
    let err = InitError {
        message: message.to_owned(),
    };
    serde_json::to_writer(&mut *writer, &err)?;
    writer.flush().map_err(|e| CorralError::sys("write init error", e))
}

/// Reads the error pipe until EOF. `None` means the user command was
/// executed.
///
/// # Errors
///
/// Returns an error if the read fails. Undecodable content is reported as
/// an [`InitError`] carrying the raw text.
pub fn read_error(reader: &mut impl Read) -> Result<Option<InitError>> {
    let mut buf = Vec::new();
    let _ = reader
        .read_to_end(&mut buf)
        .map_err(|e| CorralError::sys("read init error", e))?;
    if buf.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&buf).unwrap_or_else(|_| InitError {
        message: String::from_utf8_lossy(&buf).into_owned(),
    })))
}

/// Drains the error pipe after a failed handshake. A failure the init
/// already reported replaces `fallback`, which is then only the broken
/// pipe its exit caused.
pub fn reported_or(reader: &mut impl Read, fallback: CorralError) -> CorralError {
    match read_error(reader) {
        Ok(Some(failure)) => CorralError::Bootstrap {
            message: failure.message,
        },
        Ok(None) => fallback,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read init error");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BootstrapConfig {
        BootstrapConfig {
            container_id: "web".into(),
            args: vec!["sh".into(), "-c".into(), "true".into()],
            env: vec!["HOME=/root".into(), "PATH=/bin:/usr/bin".into()],
            cwd: "/".into(),
            config: Config {
                rootfs: "/rootfs".into(),
                ..Config::default()
            },
        }
    }

    #[test]
    fn record_survives_the_pipe() {
        let mut wire = Vec::new();
        write_config(&mut wire, &record()).expect("write");
        let decoded = read_config(&mut wire.as_slice()).expect("read");
        assert_eq!(decoded, record());
    }

    #[test]
    fn truncated_record_is_rejected() {
        let mut wire = Vec::new();
        write_config(&mut wire, &record()).expect("write");
        wire.truncate(wire.len() / 2);
        assert!(matches!(
            read_config(&mut wire.as_slice()),
            Err(CorralError::Serialization { .. })
        ));
    }

    #[test]
    fn path_var_comes_from_the_command_environment() {
        assert_eq!(record().path_var(), Some("/bin:/usr/bin"));
        let mut bare = record();
        bare.env.clear();
        assert_eq!(bare.path_var(), None);
    }

    #[test]
    fn proceed_requires_the_sync_byte() {
        let mut wire = Vec::new();
        send_proceed(&mut wire).expect("send");
        wait_proceed(&mut wire.as_slice()).expect("proceed");

        let closed: &[u8] = &[];
        assert!(matches!(
            wait_proceed(&mut &*closed),
            Err(CorralError::Bootstrap { .. })
        ));
        assert!(wait_proceed(&mut &b"x"[..]).is_err());
    }

    #[test]
    fn empty_error_pipe_means_success() {
        assert_eq!(read_error(&mut &b""[..]).expect("read"), None);
    }

    #[test]
    fn reported_errors_are_decoded() {
        let mut wire = Vec::new();
        report_error(&mut wire, "pivot_root: permission denied").expect("report");
        let err = read_error(&mut wire.as_slice()).expect("read").expect("error");
        assert_eq!(err.message, "pivot_root: permission denied");
    }

    #[test]
    fn garbage_on_error_pipe_is_kept_verbatim() {
        let err = read_error(&mut &b"exec failed"[..]).expect("read").expect("error");
        assert_eq!(err.message, "exec failed");
    }

    fn broken_pipe() -> CorralError {
        CorralError::sys("write bootstrap record", std::io::Error::from(std::io::ErrorKind::BrokenPipe))
    }

    #[test]
    fn early_init_failure_replaces_pipe_error() {
        let mut wire = Vec::new();
        report_error(&mut wire, "decode bootstrap record: EOF").expect("report");
        let err = reported_or(&mut wire.as_slice(), broken_pipe());
        assert!(matches!(err, CorralError::Bootstrap { message } if message == "decode bootstrap record: EOF"));
    }

    #[test]
    fn exec_failure_text_replaces_pipe_error() {
        let err = reported_or(&mut &br#"{"message":"exec /proc/self/exe init failed"}"#[..], broken_pipe());
        assert_eq!(err.to_string(), "container bootstrap failed: exec /proc/self/exe init failed");
    }

    #[test]
    fn silent_init_keeps_handshake_error() {
        let err = reported_or(&mut &b""[..], broken_pipe());
        assert!(matches!(err, CorralError::Sys { .. }));
    }
}
