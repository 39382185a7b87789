//! Host-wide memory facts: page size and total physical memory.

use std::io;
use std::path::PathBuf;

use crate::collector::procfs::parse_mem_total;
use crate::collector::traits::{FileSystem, RealFs};
use crate::error::Error;
use crate::provider::Provider;

const DEFAULT_PAGE_SIZE: u64 = 4096;

/// Returns the system page size in bytes.
#[cfg(unix)]
pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        DEFAULT_PAGE_SIZE
    }
}

#[cfg(not(unix))]
pub fn page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

/// Physical memory reported by `sysconf`, or 0 when unknown.
#[cfg(unix)]
fn physical_memory() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    if pages <= 0 {
        return 0;
    }
    (pages as u64).saturating_mul(page_size())
}

#[cfg(not(unix))]
fn physical_memory() -> u64 {
    0
}

/// Total memory of the host, as a limit source.
///
/// Reads `MemTotal` from `/proc/meminfo`; where that file does not exist
/// (non-Linux hosts) falls back to `sysconf`. A total of 0 means the size is
/// unknown and is reported as [`Error::NoLimit`].
pub struct SystemMemoryProvider<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
}

impl SystemMemoryProvider<RealFs> {
    /// Creates a provider that reads the real host.
    pub fn system() -> Self {
        Self::new(RealFs::new(), "/proc")
    }
}

impl<F: FileSystem> SystemMemoryProvider<F> {
    /// Creates a provider over an arbitrary filesystem.
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
        }
    }

    /// Total memory in bytes, 0 if unknown.
    pub fn total_memory(&self) -> Result<u64, Error> {
        let path = self.proc_path.join("meminfo");
        match self.fs.read_to_string(&path) {
            Ok(content) => parse_mem_total(&content)
                .map_err(|e| Error::from(e).context("failed to parse meminfo")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(physical_memory()),
            Err(e) => Err(Error::io(format!("failed to read {}", path.display()), e)),
        }
    }
}

impl<F: FileSystem> Provider for SystemMemoryProvider<F> {
    fn memory_limit(&self) -> Result<u64, Error> {
        match self.total_memory()? {
            0 => Err(Error::NoLimit),
            total => Ok(total),
        }
    }
}
