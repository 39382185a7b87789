//! In-memory mock filesystem for testing discovery without real `/proc`.
//!
//! This module provides `MockFs` which simulates a filesystem in memory,
//! allowing cgroup tests to run on macOS and in CI environments without Linux.

use crate::collector::traits::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// In-memory filesystem for testing.
///
/// Stores files and directories in memory, allowing tests to simulate
/// `/proc/self/*` and cgroup controller trees without needing actual Linux access.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Set of directories.
    directories: HashSet<PathBuf>,
    /// Files that exist but fail to read with `PermissionDenied`.
    unreadable: HashSet<PathBuf>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Adds a file that exists but cannot be read.
    pub fn add_unreadable(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.unreadable.insert(path);
    }

    /// Removes a file, leaving its parent directories in place.
    pub fn remove_file(&mut self, path: impl AsRef<Path>) {
        self.files.remove(path.as_ref());
    }

    /// Adds the two per-process files cgroup discovery starts from.
    ///
    /// # Arguments
    /// * `mountinfo` - Content of `/proc/self/mountinfo`
    /// * `cgroup` - Content of `/proc/self/cgroup`
    pub fn add_self_cgroup(&mut self, mountinfo: &str, cgroup: &str) {
        self.add_file("/proc/self/mountinfo", mountinfo);
        self.add_file("/proc/self/cgroup", cgroup);
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        if self.unreadable.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {:?}", path),
            ));
        }
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
            || self.directories.contains(path)
            || self.unreadable.contains(path)
    }
}
