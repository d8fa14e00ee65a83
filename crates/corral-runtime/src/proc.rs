//! Reading `/proc/<pid>/stat`.
//!
//! The second field is the command name in parentheses and may itself
//! contain spaces and parentheses, so parsing splits on the *last* `)`.

use std::path::Path;

use corral_common::error::{CorralError, Result};

/// Index of `starttime` among the fields after the command name. It is
/// field 22 of the whole line; the fields after `)` start at field 3.
const START_TIME_INDEX: usize = 22 - 3;

/// Scheduler state of a process, from the third field of its stat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// `R`
    Running,
    /// `S`
    Sleeping,
    /// `D`
    DiskSleep,
    /// `T`
    Stopped,
    /// `t`
    TracingStop,
    /// `Z`
    Zombie,
    /// `X` or `x`
    Dead,
    /// `I`
    Idle,
    /// Any other state letter.
    Other(char),
}

impl ProcState {
    fn from_char(c: char) -> Self {
        match c {
            'R' => Self::Running,
            'S' => Self::Sleeping,
            'D' => Self::DiskSleep,
            'T' => Self::Stopped,
            't' => Self::TracingStop,
            'Z' => Self::Zombie,
            'X' | 'x' => Self::Dead,
            'I' => Self::Idle,
            other => Self::Other(other),
        }
    }

    /// Whether the process has exited and only its table entry remains.
    #[must_use]
    pub const fn is_gone(self) -> bool {
        matches!(self, Self::Zombie | Self::Dead)
    }
}

/// The parts of `/proc/<pid>/stat` the runtime uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStat {
    /// Process id.
    pub pid: i32,
    /// Command name without the parentheses.
    pub name: String,
    /// Scheduler state.
    pub state: ProcState,
    /// Start time in clock ticks since boot; with the pid it identifies a
    /// process across pid reuse.
    pub start_time: u64,
}

/// Parses one stat line. `path` only labels errors.
///
/// # Errors
///
/// Returns [`CorralError::Malformed`] if the line lacks the command name,
/// the state, or the start time.
pub fn parse_stat(line: &str, path: &Path) -> Result<ProcStat> {
    let malformed = |message: &str| CorralError::Malformed {
        path: path.to_path_buf(),
        message: message.to_owned(),
    };
    let open = line.find('(').ok_or_else(|| malformed("missing '('"))?;
    let close = line.rfind(')').ok_or_else(|| malformed("missing ')'"))?;
    if close < open {
        return Err(malformed("unbalanced command name"));
    }
    let pid = line[..open]
        .trim()
        .parse()
        .map_err(|_| malformed("invalid pid"))?;
    let name = line[open + 1..close].to_owned();
    let fields: Vec<&str> = line[close + 1..].split_whitespace().collect();
    let state = fields
        .first()
        .and_then(|f| f.chars().next())
        .map(ProcState::from_char)
        .ok_or_else(|| malformed("missing state"))?;
    let start_time = fields
        .get(START_TIME_INDEX)
        .ok_or_else(|| malformed("missing start time"))?
        .parse()
        .map_err(|_| malformed("invalid start time"))?;
    Ok(ProcStat {
        pid,
        name,
        state,
        start_time,
    })
}

/// Reads and parses `<proc_root>/<pid>/stat`.
///
/// # Errors
///
/// Returns [`CorralError::Io`] if the process does not exist or the file
/// cannot be read, and [`CorralError::Malformed`] if it cannot be parsed.
pub fn stat(proc_root: &Path, pid: i32) -> Result<ProcStat> {
    let path = proc_root.join(pid.to_string()).join("stat");
    let content = std::fs::read_to_string(&path).map_err(|e| CorralError::Io {
        path: path.clone(),
        source: e,
    })?;
    parse_stat(content.trim_end(), &path)
}
