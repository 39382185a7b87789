//! memlimit - container-aware soft memory budget.
//!
//! Finds the memory ceiling of the current process from its cgroup
//! (v1, v2 or hybrid hierarchies) and applies a fraction of it to a soft
//! memory budget, optionally re-reading it on a timer.
//!
//! Provides:
//! - `collector`: mountinfo/cgroup parsing and limit discovery
//! - `provider`: composable limit sources
//! - `budget`: the soft budget limits are applied to
//! - `limiter`: the apply-with-rollback engine and refresh thread
//! - `env`: environment overrides
//! - `fmt`: byte formatting helpers
//!
//! ```no_run
//! use std::time::Duration;
//! use memlimit::{CancellationToken, Config};
//!
//! let token = CancellationToken::new();
//! let budget = Config::new()
//!     .with_ratio(0.8)
//!     .with_refresh_interval(Duration::from_secs(30), token.clone())
//!     .apply()
//!     .unwrap_or(i64::MAX);
//! println!("soft budget: {}", memlimit::fmt::format_budget(budget));
//! ```

pub mod budget;
pub mod collector;
pub mod env;
pub mod error;
pub mod fmt;
pub mod limiter;
pub mod provider;

pub use budget::{MemoryBudget, SoftLimit};
pub use error::Error;
pub use limiter::{CancellationToken, Config, apply};
pub use provider::Provider;
