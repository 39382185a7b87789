//! Abstractions for filesystem access to enable testing and mocking.
//!
//! The `FileSystem` trait lets cgroup discovery read the real `/proc` and
//! `/sys/fs/cgroup` trees on Linux, or an in-memory fixture in tests.

use std::io;
use std::path::Path;

/// Abstraction for read-only access to kernel pseudo files.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    ///
    /// # Arguments
    /// * `path` - Path to the file to read
    ///
    /// # Returns
    /// The file contents, or an I/O error. A missing file must be reported
    /// with [`io::ErrorKind::NotFound`] since callers special-case it.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    /// Creates a new `RealFs` instance.
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

impl<F: FileSystem + ?Sized> FileSystem for std::sync::Arc<F> {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        (**self).read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }
}
