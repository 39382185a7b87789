//! The soft memory budget that limits are applied to.
//!
//! [`MemoryBudget`] is the one knob the limiter turns. It follows the
//! "set and return previous" shape: a negative value only reports the current
//! budget without changing it.

use std::sync::atomic::{AtomicI64, Ordering};

/// Value a budget holds before anything is applied: unbounded.
pub const UNBOUNDED: i64 = i64::MAX;

/// A process-wide soft memory budget.
pub trait MemoryBudget: Send + Sync {
    /// Sets the budget to `limit` bytes and returns the previous budget.
    ///
    /// A negative `limit` leaves the budget unchanged and only reports it.
    fn set_memory_limit(&self, limit: i64) -> i64;

    /// Returns the current budget without changing it.
    fn memory_limit(&self) -> i64 {
        self.set_memory_limit(-1)
    }
}

/// Atomic soft budget.
///
/// Allocating subsystems (caches, buffer pools) read it with
/// [`SoftLimit::get`] to decide when to shed memory.
#[derive(Debug)]
pub struct SoftLimit {
    limit: AtomicI64,
}

impl SoftLimit {
    /// Creates an unbounded budget.
    pub const fn new() -> Self {
        Self {
            limit: AtomicI64::new(UNBOUNDED),
        }
    }

    /// Current budget in bytes.
    pub fn get(&self) -> i64 {
        self.limit.load(Ordering::Acquire)
    }
}

impl Default for SoftLimit {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBudget for SoftLimit {
    fn set_memory_limit(&self, limit: i64) -> i64 {
        if limit < 0 {
            return self.get();
        }
        self.limit.swap(limit, Ordering::AcqRel)
    }
}

static GLOBAL: SoftLimit = SoftLimit::new();

/// The process-wide budget used when no other budget is configured.
pub fn global() -> &'static SoftLimit {
    &GLOBAL
}

impl MemoryBudget for &'static SoftLimit {
    fn set_memory_limit(&self, limit: i64) -> i64 {
        (**self).set_memory_limit(limit)
    }
}
