//! Cgroup memory limit discovery.
//!
//! Reads `/proc/self/mountinfo` and `/proc/self/cgroup`, decides which
//! hierarchies are mounted, and reads the memory ceiling of the process's
//! cgroup from the right controller files:
//!
//! ```text
//! mountinfo ──► detect v1/v2 ──┬─► v2: <cgroup>/memory.max
//! cgroup ─────► resolve path ──┴─► v1: min(memory.limit_in_bytes,
//!                                          memory.stat:hierarchical_memory_limit)
//! ```
//!
//! In hybrid mode the unified hierarchy is tried first and the legacy memory
//! controller is the fallback.

pub mod parser;
mod path;

pub use path::resolve_cgroup_path;

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collector::procfs::{
    CgroupMembership, MountRecord, parse_cgroup_membership, parse_mountinfo,
};
use crate::collector::system;
use crate::collector::traits::{FileSystem, RealFs};
use crate::error::Error;
use crate::provider::Provider;
use parser::{parse_hierarchical_memory_limit, parse_limit_in_bytes, parse_memory_max};

/// Filesystem type of a legacy (v1) hierarchy.
pub const CGROUP_V1_FS: &str = "cgroup";
/// Filesystem type of the unified (v2) hierarchy.
pub const CGROUP_V2_FS: &str = "cgroup2";

const MEMORY_CONTROLLER: &str = "memory";

/// Which hierarchies to read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CgroupMode {
    /// Detect from the mount table; v2 first with v1 as fallback.
    #[default]
    Auto,
    /// Legacy hierarchy only.
    V1,
    /// Unified hierarchy only.
    V2,
    /// Same as `Auto`.
    Hybrid,
}

/// Which cgroup filesystems are mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hierarchies {
    pub v1: bool,
    pub v2: bool,
}

/// Scans the mount table for legacy and unified cgroup filesystems.
pub fn detect_hierarchies(mounts: &[MountRecord]) -> Hierarchies {
    let mut found = Hierarchies::default();
    for mount in mounts {
        match mount.filesystem_type.as_str() {
            CGROUP_V1_FS => found.v1 = true,
            CGROUP_V2_FS => found.v2 = true,
            _ => {}
        }
    }
    found
}

impl CgroupMode {
    fn hierarchies(self, mounts: &[MountRecord]) -> Hierarchies {
        match self {
            CgroupMode::Auto | CgroupMode::Hybrid => detect_hierarchies(mounts),
            CgroupMode::V1 => Hierarchies {
                v1: true,
                v2: false,
            },
            CgroupMode::V2 => Hierarchies {
                v1: false,
                v2: true,
            },
        }
    }
}

/// The largest multiple of `page_size` not above `i64::MAX`.
///
/// cgroup v1 reports this value (or more) when no limit is set.
pub fn v1_unlimited_threshold(page_size: u64) -> u64 {
    let page_size = page_size.max(1);
    i64::MAX as u64 / page_size * page_size
}

/// Reads the memory limit of the current process's cgroup.
pub struct CgroupProvider<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    mode: CgroupMode,
    page_size: u64,
    supported: bool,
}

impl CgroupProvider<RealFs> {
    /// Creates a provider that reads the real `/proc` of this host.
    ///
    /// On platforms without cgroups every read fails with
    /// [`Error::CgroupsNotSupported`] without touching the filesystem.
    pub fn system(mode: CgroupMode) -> Self {
        Self {
            supported: cfg!(target_os = "linux"),
            ..Self::new(RealFs::new(), "/proc").with_mode(mode)
        }
    }
}

impl<F: FileSystem> CgroupProvider<F> {
    /// Creates a provider over an arbitrary filesystem.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    pub fn new(fs: F, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            mode: CgroupMode::Auto,
            page_size: system::page_size(),
            supported: true,
        }
    }

    /// Selects which hierarchies are read.
    pub fn with_mode(mut self, mode: CgroupMode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides the page size used for the v1 "unlimited" threshold.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Reads the memory limit in bytes.
    ///
    /// # Errors
    /// * [`Error::CgroupsNotSupported`] on platforms without cgroups
    /// * [`Error::NoCgroup`] when no cgroup filesystem is mounted
    /// * [`Error::NoLimit`] when the cgroup has no memory ceiling
    /// * parse, I/O and path errors for malformed or missing files
    pub fn read_limit(&self) -> Result<u64, Error> {
        if !self.supported {
            return Err(Error::CgroupsNotSupported);
        }

        let mountinfo_path = self.proc_path.join("self/mountinfo");
        let content = self.read_file(&mountinfo_path)?;
        let mounts = parse_mountinfo(&content)
            .map_err(|e| Error::from(e).context("failed to parse mountinfo"))?;

        let found = self.mode.hierarchies(&mounts);
        if !(found.v1 || found.v2) {
            return Err(Error::NoCgroup);
        }

        let cgroup_path = self.proc_path.join("self/cgroup");
        let content = self.read_file(&cgroup_path)?;
        let memberships = parse_cgroup_membership(&content)
            .map_err(|e| Error::from(e).context("failed to parse cgroup file"))?;

        if found.v2 {
            match self.read_v2(&memberships, &mounts) {
                Ok(limit) => return Ok(limit),
                Err(e) if !found.v1 => return Err(e),
                Err(e) => debug!(error = %e, "cgroup v2 limit unavailable, trying v1"),
            }
        }

        self.read_v1(&memberships, &mounts)
    }

    fn read_file(&self, path: &Path) -> Result<String, Error> {
        self.fs
            .read_to_string(path)
            .map_err(|e| Error::io(format!("failed to read {}", path.display()), e))
    }

    fn read_v2(&self, memberships: &[CgroupMembership], mounts: &[MountRecord]) -> Result<u64, Error> {
        let membership = memberships
            .iter()
            .find(|m| m.hierarchy_id == "0" && m.controller_list.is_empty())
            .ok_or_else(|| Error::Path("cgroup v2 path not found".to_string()))?;

        let mount = mounts
            .iter()
            .find(|m| m.filesystem_type == CGROUP_V2_FS)
            .ok_or_else(|| Error::Path("cgroup v2 mountpoint not found".to_string()))?;

        let dir = resolve_cgroup_path(
            &self.fs,
            &mount.mount_point,
            &mount.root,
            &membership.cgroup_path,
        )?;
        let memory_max = dir.join("memory.max");
        debug!(path = %memory_max.display(), "reading cgroup v2 memory limit");

        let content = match self.fs.read_to_string(&memory_max) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Error::NoLimit),
            Err(e) => return Err(Error::io("failed to read memory.max", e)),
        };

        match parse_memory_max(&content) {
            Ok(Some(limit)) => Ok(limit),
            Ok(None) => Err(Error::NoLimit),
            Err(e) => Err(Error::from(e).context("failed to parse memory.max value")),
        }
    }

    fn read_v1(&self, memberships: &[CgroupMembership], mounts: &[MountRecord]) -> Result<u64, Error> {
        let membership = memberships
            .iter()
            .find(|m| m.has_controller(MEMORY_CONTROLLER))
            .ok_or_else(|| {
                Error::Path("cgroup v1 path for memory controller not found".to_string())
            })?;

        let mount = mounts
            .iter()
            .find(|m| {
                m.filesystem_type == CGROUP_V1_FS
                    && m.super_options.split(',').any(|o| o == MEMORY_CONTROLLER)
            })
            .ok_or_else(|| {
                Error::Path("cgroup v1 mountpoint for memory controller not found".to_string())
            })?;

        let dir = resolve_cgroup_path(
            &self.fs,
            &mount.mount_point,
            &mount.root,
            &membership.cgroup_path,
        )?;
        debug!(path = %dir.display(), "reading cgroup v1 memory limit");

        let hierarchical = match self.fs.read_to_string(&dir.join("memory.stat")) {
            Ok(content) => parse_hierarchical_memory_limit(&content).map_err(|e| {
                Error::from(e).context("failed to read hierarchical_memory_limit")
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(Error::io("failed to read memory.stat", e)),
        };

        let content = self
            .fs
            .read_to_string(&dir.join("memory.limit_in_bytes"))
            .map_err(|e| Error::io("failed to read memory.limit_in_bytes", e))?;
        let direct = parse_limit_in_bytes(&content).map_err(|e| {
            Error::from(e).context("failed to parse memory.limit_in_bytes value")
        })?;

        // Zero means unset in both places.
        let unset_as_max = |v: u64| if v == 0 { u64::MAX } else { v };
        let limit = unset_as_max(direct).min(unset_as_max(hierarchical));

        if limit >= v1_unlimited_threshold(self.page_size) {
            return Err(Error::NoLimit);
        }

        Ok(limit)
    }
}

impl<F: FileSystem> Provider for CgroupProvider<F> {
    fn memory_limit(&self) -> Result<u64, Error> {
        self.read_limit()
    }
}
