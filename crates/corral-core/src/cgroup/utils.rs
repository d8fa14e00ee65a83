//! Filesystem and parsing helpers shared by the controller drivers.

use std::collections::HashMap;
use std::fs::{DirBuilder, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Component, Path, PathBuf};

use corral_common::constants::MOUNTINFO_PATH;

use super::{Backoff, CgroupError, CgroupOptions, Result};

/// Lexically normalizes a cgroup path and makes it relative.
///
/// `..` never climbs above the hierarchy root, so the result can be
/// joined onto a controller root without escaping it.
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                let _ = parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    parts.into_iter().collect()
}

/// Joins a cgroup path onto a controller root.
pub(crate) fn join(root: &Path, path: &Path) -> PathBuf {
    root.join(clean_path(path))
}

/// Finds the directory holding the v1 controller hierarchies in a
/// mountinfo-formatted reader.
///
/// The first `cgroup` mount wins and its parent directory is returned,
/// e.g. `/sys/fs/cgroup/memory` yields `/sys/fs/cgroup`.
///
/// # Errors
///
/// Returns [`CgroupError::MountPointNotFound`] if no line has filesystem
/// type `cgroup`.
pub fn parse_mount_point<R: BufRead>(reader: R) -> Result<PathBuf> {
    for line in reader.lines() {
        let line = line.map_err(|e| CgroupError::io(MOUNTINFO_PATH, e))?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(sep) = fields.iter().position(|f| *f == "-") else {
            continue;
        };
        if fields.get(sep + 1) == Some(&"cgroup") && fields.len() > 4 {
            let mount = Path::new(fields[4]);
            if let Some(parent) = mount.parent() {
                return Ok(parent.to_path_buf());
            }
        }
    }
    Err(CgroupError::MountPointNotFound)
}

/// Discovers the hierarchy root from `/proc/self/mountinfo`.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read or holds no cgroup mount.
pub fn mount_point() -> Result<PathBuf> {
    let file = std::fs::File::open(MOUNTINFO_PATH).map_err(|e| CgroupError::io(MOUNTINFO_PATH, e))?;
    let root = parse_mount_point(BufReader::new(file))?;
    tracing::debug!(root = %root.display(), "discovered cgroup hierarchy root");
    Ok(root)
}

/// Returns the root of the cgroup mount carrying `subsystem`, read from a
/// mountinfo-formatted reader. The root is the path inside the hierarchy
/// that the mount exposes, `/` outside of cgroup namespaces.
///
/// # Errors
///
/// Returns [`CgroupError::NoMountDestination`] if no mount lists the controller.
pub fn parse_cgroup_destination<R: BufRead>(reader: R, subsystem: &str) -> Result<String> {
    for line in reader.lines() {
        let line = line.map_err(|e| CgroupError::io(MOUNTINFO_PATH, e))?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (Some(root), Some(options)) = (fields.get(3), fields.last()) else {
            continue;
        };
        if options.split(',').any(|opt| opt == subsystem) {
            return Ok((*root).to_owned());
        }
    }
    Err(CgroupError::NoMountDestination {
        subsystem: subsystem.to_owned(),
    })
}

/// Looks up the mount root of `subsystem` in `/proc/self/mountinfo`.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read or lacks the controller.
pub fn cgroup_destination(subsystem: &str) -> Result<String> {
    let file = std::fs::File::open(MOUNTINFO_PATH).map_err(|e| CgroupError::io(MOUNTINFO_PATH, e))?;
    parse_cgroup_destination(BufReader::new(file), subsystem)
}

/// Parses a `/proc/<pid>/cgroup` file into a controller to path map.
///
/// Each line is `hierarchy-id:controller[,controller]:path`; co-mounted
/// controllers map to the same path.
///
/// # Errors
///
/// Returns [`CgroupError::InvalidStatFormat`] for a line without three fields.
pub fn parse_cgroup_file<R: BufRead>(reader: R) -> Result<HashMap<String, String>> {
    let source = PathBuf::from("/proc/self/cgroup");
    let mut cgroups = HashMap::new();
    for line in reader.lines() {
        let line = line.map_err(|e| CgroupError::io(&source, e))?;
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.splitn(3, ':').collect();
        let [_, controllers, path] = parts.as_slice() else {
            return Err(CgroupError::InvalidStatFormat { path: source, line });
        };
        for controller in controllers.split(',') {
            let _ = cgroups.insert(controller.to_owned(), (*path).to_owned());
        }
    }
    Ok(cgroups)
}

/// Parses an unsigned counter. Negative values, which some kernels report
/// for unset limits, clamp to zero.
pub(crate) fn parse_uint(value: &str, path: &Path) -> Result<u64> {
    if let Ok(v) = value.parse::<u64>() {
        return Ok(v);
    }
    let negative = value
        .strip_prefix('-')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()));
    if negative {
        return Ok(0);
    }
    Err(CgroupError::InvalidStatFormat {
        path: path.to_path_buf(),
        line: value.to_owned(),
    })
}

/// Parses a `key value` accounting line.
pub(crate) fn parse_kv<'a>(line: &'a str, path: &Path) -> Result<(&'a str, u64)> {
    let mut fields = line.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(key), Some(value), None) => Ok((key, parse_uint(value, path)?)),
        _ => Err(CgroupError::InvalidStatFormat {
            path: path.to_path_buf(),
            line: line.to_owned(),
        }),
    }
}

/// Reads a control file.
pub(crate) fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| CgroupError::io(path, e))
}

/// Reads a single-value control file as an unsigned counter.
pub(crate) fn read_uint(path: &Path) -> Result<u64> {
    parse_uint(read_file(path)?.trim(), path)
}

/// Writes a control file, retrying while the write is interrupted.
///
/// Control files are never created unless `options.file_mode` is set.
pub(crate) fn write_control(path: &Path, value: &str, options: &CgroupOptions) -> Result<()> {
    loop {
        match write_once(path, value, options) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CgroupError::io(path, e)),
            Ok(()) => break,
        }
    }
    tracing::trace!(path = %path.display(), value, "cgroup control file written");
    Ok(())
}

fn write_once(path: &Path, value: &str, options: &CgroupOptions) -> io::Result<()> {
    let mut open = OpenOptions::new();
    let _ = open.write(true).truncate(true);
    if let Some(mode) = options.file_mode {
        let _ = open.create(true).mode(mode);
    }
    let mut file = open.open(path)?;
    file.write_all(value.as_bytes())
}

/// Creates a controller directory and its missing parents.
pub(crate) fn create_dir(path: &Path, options: &CgroupOptions) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(options.dir_mode)
        .create(path)
        .map_err(|e| CgroupError::io(path, e))
}

/// Removes a single controller directory with `rmdir(2)`.
///
/// On cgroupfs this succeeds even though the pseudo control files are
/// present, and fails while child groups or tasks remain. A missing
/// directory counts as removed.
///
/// # Errors
///
/// Returns the `rmdir` failure for any other condition.
pub fn rmdir(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Removes a directory and everything below it.
///
/// Only meant for plain directories standing in for a hierarchy, where
/// control files are real files. A missing directory counts as removed.
///
/// # Errors
///
/// Returns the first failure of the recursive removal.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Runs `remove` on `path` up to `backoff.attempts` times, sleeping
/// `initial`, `2 * initial`, `4 * initial` and so on between attempts.
///
/// # Errors
///
/// Returns the last failure if every attempt fails.
pub fn remove_with_backoff<F>(path: &Path, backoff: Backoff, mut remove: F) -> Result<()>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut delay = backoff.initial;
    let mut last = io::Error::other("no removal attempted");
    for attempt in 0..backoff.attempts.max(1) {
        if attempt != 0 {
            std::thread::sleep(delay);
            delay *= 2;
        }
        match remove(path) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(path = %path.display(), attempt, error = %e, "cgroup removal failed");
                last = e;
            }
        }
    }
    Err(CgroupError::io(path, last))
}

/// Reads the ids listed one per line in `dir/file`.
pub(crate) fn read_ids(dir: &Path, file: &str) -> Result<Vec<i32>> {
    let path = dir.join(file);
    let content = read_file(&path)?;
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            l.parse::<i32>().map_err(|_| CgroupError::InvalidStatFormat {
                path: path.clone(),
                line: l.to_owned(),
            })
        })
        .collect()
}

/// Returns `dir` followed by every directory below it.
pub(crate) fn walk_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = vec![dir.to_path_buf()];
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| CgroupError::io(&current, e))?;
        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CgroupError::io(&current, e))?;
            let file_type = entry.file_type().map_err(|e| CgroupError::io(entry.path(), e))?;
            if file_type.is_dir() {
                children.push(entry.path());
            }
        }
        children.sort();
        out.extend(children.iter().cloned());
        pending.extend(children.into_iter().rev());
    }
    Ok(out)
}
