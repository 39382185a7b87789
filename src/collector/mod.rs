//! Memory limit discovery for Linux.
//!
//! This module reads the kernel's per-process mount table and cgroup
//! membership to find the memory ceiling of the current process, with
//! support for mocking for testing on macOS.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       CgroupProvider                        │
//! │  ┌─────────────────────┐   ┌─────────────────────────────┐  │
//! │  │  procfs parsers     │   │  cgroup readers             │  │
//! │  │  - self/mountinfo   │   │  - v2: memory.max           │  │
//! │  │  - self/cgroup      │   │  - v1: memory.limit_in_bytes│  │
//! │  └──────────┬──────────┘   │        memory.stat          │  │
//! │             │              └──────────────┬──────────────┘  │
//! │             └──────────────┬──────────────┘                 │
//! │                     ┌──────▼──────┐                         │
//! │                     │  FileSystem │ (trait)                 │
//! │                     └──────┬──────┘                         │
//! └────────────────────────────┼────────────────────────────────┘
//!                              │
//!              ┌───────────────┼───────────────┐
//!       ┌──────▼──────┐ ┌──────▼──────┐ ┌──────▼──────┐
//!       │   RealFs    │ │   MockFs    │ │  Scenarios  │
//!       │ (Linux)     │ │ (Testing)   │ │ (Fixtures)  │
//!       └─────────────┘ └─────────────┘ └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use memlimit::collector::{CgroupProvider, MockFs};
//!
//! let fs = MockFs::cgroup_v2_container(Some(512 * 1024 * 1024));
//! let provider = CgroupProvider::new(fs, "/proc");
//! assert_eq!(provider.read_limit().unwrap(), 512 * 1024 * 1024);
//! ```

pub mod cgroup;
pub mod mock;
pub mod procfs;
pub mod system;
pub mod traits;

pub use cgroup::{CgroupMode, CgroupProvider, Hierarchies, detect_hierarchies};
pub use mock::MockFs;
pub use system::SystemMemoryProvider;
pub use traits::{FileSystem, RealFs};
