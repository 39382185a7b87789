//! Maps a cgroup path from `/proc/self/cgroup` onto the directory where its
//! hierarchy is mounted.

use std::path::{Path, PathBuf};

use crate::collector::traits::FileSystem;
use crate::error::Error;

/// Resolves the directory of a cgroup inside the mounted hierarchy.
///
/// `root` is the mount root from mountinfo (the part of the hierarchy that is
/// visible at `mount_point`) and `cgroup_path` is the path from
/// `/proc/self/cgroup`. Inside a container both usually name the same
/// cgroup, in which case the mount point itself is the answer.
///
/// # Errors
/// * the cgroup is not under `root`
/// * the resolved directory does not exist
pub fn resolve_cgroup_path<F: FileSystem + ?Sized>(
    fs: &F,
    mount_point: &Path,
    root: &str,
    cgroup_path: &str,
) -> Result<PathBuf, Error> {
    let root = clean_relative(root);
    let cgroup_path = clean_relative(cgroup_path);

    if root == cgroup_path {
        return Ok(mount_point.to_path_buf());
    }

    // A root of "." is the whole hierarchy.
    let remainder = if root == "." {
        Some(cgroup_path.as_str())
    } else {
        cgroup_path.strip_prefix(root.as_str())
    };

    let Some(remainder) = remainder else {
        return Err(Error::Path(format!(
            "invalid cgroup path: {} is not under root {}",
            cgroup_path, root
        )));
    };

    let remainder = remainder.trim_start_matches('/');
    if remainder.split('/').next() == Some("..") {
        return Err(Error::Path(format!(
            "invalid cgroup path: {} escapes root {}",
            cgroup_path, root
        )));
    }

    let resolved = mount_point.join(remainder);
    if !fs.exists(&resolved) {
        return Err(Error::Path(format!(
            "resolved cgroup path does not exist: {}",
            resolved.display()
        )));
    }

    Ok(resolved)
}

/// Strips one leading `/` and collapses `.` and `..` segments.
///
/// The empty path becomes `.`.
fn clean_relative(path: &str) -> String {
    let path = path.strip_prefix('/').unwrap_or(path);
    let mut parts: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}
