//! Provider abstraction for memory limit sources.
//!
//! A [`Provider`] answers one question: how many bytes may this process use?
//! Cgroup discovery, total system memory and fixed values all implement it,
//! and so do the combinators in this module, so sources nest freely:
//!
//! ```
//! use memlimit::provider::{self, ProviderExt};
//! use memlimit::Provider;
//!
//! let p = provider::from_fn(|| Err(memlimit::Error::NoCgroup))
//!     .fallback(provider::limit(1024 * 1024 * 1024))
//!     .with_ratio(0.5)
//!     .capped();
//! assert_eq!(p.memory_limit().unwrap(), 512 * 1024 * 1024);
//! ```

use std::sync::Arc;

use crate::collector::cgroup::{CgroupMode, CgroupProvider};
use crate::collector::system::SystemMemoryProvider;
use crate::collector::traits::RealFs;
use crate::error::Error;

/// A source of a memory limit in bytes.
///
/// Implementations must not mutate process state; [`Error::NoLimit`] reports
/// that the source has no ceiling configured.
pub trait Provider: Send + Sync {
    /// Returns the memory limit in bytes.
    fn memory_limit(&self) -> Result<u64, Error>;
}

impl<P: Provider + ?Sized> Provider for Box<P> {
    fn memory_limit(&self) -> Result<u64, Error> {
        (**self).memory_limit()
    }
}

impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn memory_limit(&self) -> Result<u64, Error> {
        (**self).memory_limit()
    }
}

/// Provider backed by a closure. See [`from_fn`].
#[derive(Clone)]
pub struct FromFn<F>(F);

impl<F> Provider for FromFn<F>
where
    F: Fn() -> Result<u64, Error> + Send + Sync,
{
    fn memory_limit(&self) -> Result<u64, Error> {
        (self.0)()
    }
}

/// Wraps a closure as a provider.
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: Fn() -> Result<u64, Error> + Send + Sync,
{
    FromFn(f)
}

/// Always returns the same value. See [`limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Static(pub u64);

impl Provider for Static {
    fn memory_limit(&self) -> Result<u64, Error> {
        Ok(self.0)
    }
}

/// A provider that always returns `bytes`.
pub fn limit(bytes: u64) -> Static {
    Static(bytes)
}

/// Tries `primary`, and `secondary` on any error from it.
#[derive(Debug, Clone)]
pub struct Fallback<A, B> {
    primary: A,
    secondary: B,
}

impl<A: Provider, B: Provider> Provider for Fallback<A, B> {
    fn memory_limit(&self) -> Result<u64, Error> {
        match self.primary.memory_limit() {
            Ok(limit) => Ok(limit),
            Err(_) => self.secondary.memory_limit(),
        }
    }
}

/// Combines two providers: errors from `primary` are replaced by the result
/// of `secondary`.
pub fn fallback<A: Provider, B: Provider>(primary: A, secondary: B) -> Fallback<A, B> {
    Fallback { primary, secondary }
}

/// Scales the inner limit by a ratio. See [`apply_ratio`].
#[derive(Debug, Clone)]
pub struct Ratio<P> {
    inner: P,
    ratio: f64,
}

impl<P: Provider> Provider for Ratio<P> {
    fn memory_limit(&self) -> Result<u64, Error> {
        let limit = self.inner.memory_limit()?;
        if self.ratio == 1.0 {
            return Ok(limit);
        }

        // Float to int casts saturate.
        let scaled = (limit as f64 * self.ratio) as u64;
        if self.ratio < 1.0 {
            // u64 -> f64 may round up.
            Ok(scaled.min(limit))
        } else {
            Ok(scaled)
        }
    }
}

/// Multiplies the limit of `inner` by `ratio`, truncating to whole bytes.
///
/// [`Error::NoLimit`] and every other error pass through unscaled.
pub fn apply_ratio<P: Provider>(inner: P, ratio: f64) -> Ratio<P> {
    Ratio { inner, ratio }
}

/// Clamps the inner limit to `i64::MAX`. See [`cap_to_i64`].
#[derive(Debug, Clone)]
pub struct Capped<P>(P);

impl<P: Provider> Provider for Capped<P> {
    fn memory_limit(&self) -> Result<u64, Error> {
        Ok(self.0.memory_limit()?.min(i64::MAX as u64))
    }
}

/// Clamps values above `i64::MAX`, the largest budget the runtime accepts.
pub fn cap_to_i64<P: Provider>(inner: P) -> Capped<P> {
    Capped(inner)
}

/// Reports [`Error::NoLimit`] as `i64::MAX`. See [`no_limit_as_max`].
#[derive(Debug, Clone)]
pub struct NoLimitAsMax<P>(P);

impl<P: Provider> Provider for NoLimitAsMax<P> {
    fn memory_limit(&self) -> Result<u64, Error> {
        match self.0.memory_limit() {
            Err(e) if e.is_no_limit() => Ok(i64::MAX as u64),
            other => other,
        }
    }
}

/// Rewrites "no limit", including wrapped occurrences, into `i64::MAX` so
/// that it compares equal to an unbounded budget.
pub fn no_limit_as_max<P: Provider>(inner: P) -> NoLimitAsMax<P> {
    NoLimitAsMax(inner)
}

/// Method-chaining form of the combinators.
pub trait ProviderExt: Provider + Sized {
    /// See [`fallback`].
    fn fallback<B: Provider>(self, secondary: B) -> Fallback<Self, B> {
        fallback(self, secondary)
    }

    /// See [`apply_ratio`].
    fn with_ratio(self, ratio: f64) -> Ratio<Self> {
        apply_ratio(self, ratio)
    }

    /// See [`cap_to_i64`].
    fn capped(self) -> Capped<Self> {
        cap_to_i64(self)
    }

    /// See [`no_limit_as_max`].
    fn no_limit_as_max(self) -> NoLimitAsMax<Self> {
        no_limit_as_max(self)
    }
}

impl<P: Provider> ProviderExt for P {}

/// Cgroup limit of this process, detecting v1, v2 or hybrid hierarchies.
pub fn cgroup() -> CgroupProvider<RealFs> {
    CgroupProvider::system(CgroupMode::Auto)
}

/// Cgroup limit read from the legacy (v1) hierarchy only.
pub fn cgroup_v1() -> CgroupProvider<RealFs> {
    CgroupProvider::system(CgroupMode::V1)
}

/// Cgroup limit read from the unified (v2) hierarchy only.
pub fn cgroup_v2() -> CgroupProvider<RealFs> {
    CgroupProvider::system(CgroupMode::V2)
}

/// Cgroup limit from v2 with v1 as fallback; same as [`cgroup`].
pub fn cgroup_hybrid() -> CgroupProvider<RealFs> {
    CgroupProvider::system(CgroupMode::Hybrid)
}

/// Total memory of the host.
pub fn system() -> SystemMemoryProvider<RealFs> {
    SystemMemoryProvider::system()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn failing() -> FromFn<impl Fn() -> Result<u64, Error> + Send + Sync> {
        from_fn(|| Err(Error::Provider("unavailable".into())))
    }

    #[test]
    fn test_static_limit() {
        assert_eq!(limit(0).memory_limit().unwrap(), 0);
        assert_eq!(limit(GIB).memory_limit().unwrap(), GIB);
    }

    #[test]
    fn test_fallback_uses_primary_on_success() {
        let p = fallback(limit(1), limit(2));
        assert_eq!(p.memory_limit().unwrap(), 1);
    }

    #[test]
    fn test_fallback_law() {
        for value in [0, 1, GIB, u64::MAX] {
            let p = fallback(failing(), limit(value));
            assert_eq!(p.memory_limit().unwrap(), limit(value).memory_limit().unwrap());
        }

        let p = fallback(failing(), from_fn(|| Err(Error::NoCgroup)));
        assert!(matches!(p.memory_limit(), Err(Error::NoCgroup)));
    }

    #[test]
    fn test_fallback_on_no_limit() {
        let p = fallback(from_fn(|| Err(Error::NoLimit)), limit(GIB));
        assert_eq!(p.memory_limit().unwrap(), GIB);
    }

    #[test]
    fn test_apply_ratio() {
        assert_eq!(apply_ratio(limit(GIB), 0.5).memory_limit().unwrap(), 536870912);
        assert_eq!(apply_ratio(limit(GIB), 0.9).memory_limit().unwrap(), 966367641);
        assert_eq!(apply_ratio(limit(GIB), 1.0).memory_limit().unwrap(), GIB);
        assert_eq!(
            apply_ratio(limit(u64::MAX), 0.45).memory_limit().unwrap(),
            8301034833169298432
        );
    }

    #[test]
    fn test_apply_ratio_is_monotonic() {
        for value in [1, 4097, GIB + 7, (1 << 53) + 3, u64::MAX] {
            let mut previous = 0;
            for step in 1..=100 {
                let ratio = step as f64 / 100.0;
                let scaled = apply_ratio(limit(value), ratio).memory_limit().unwrap();
                assert!(scaled >= previous, "value {value} ratio {ratio}");
                assert!(scaled <= value);
                previous = scaled;
            }
        }
    }

    #[test]
    fn test_apply_ratio_passes_no_limit_through() {
        let p = apply_ratio(from_fn(|| Err(Error::NoLimit)), 0.5);
        assert!(matches!(p.memory_limit(), Err(Error::NoLimit)));
    }

    #[test]
    fn test_ratio_then_cap_saturates() {
        let p = cap_to_i64(apply_ratio(limit(u64::MAX), 0.9));
        assert_eq!(p.memory_limit().unwrap(), i64::MAX as u64);
    }

    #[test]
    fn test_cap_leaves_small_values() {
        assert_eq!(cap_to_i64(limit(GIB)).memory_limit().unwrap(), GIB);
        assert_eq!(
            cap_to_i64(limit(i64::MAX as u64)).memory_limit().unwrap(),
            i64::MAX as u64
        );
    }

    #[test]
    fn test_no_limit_as_max() {
        let p = no_limit_as_max(from_fn(|| Err(Error::NoLimit.context("wrapped"))));
        assert_eq!(p.memory_limit().unwrap(), i64::MAX as u64);

        let p = no_limit_as_max(from_fn(|| Err(Error::NoCgroup)));
        assert!(matches!(p.memory_limit(), Err(Error::NoCgroup)));

        assert_eq!(no_limit_as_max(limit(5)).memory_limit().unwrap(), 5);
    }

    #[test]
    fn test_chained_combinators() {
        let p = failing().fallback(limit(GIB)).with_ratio(0.5).capped();
        assert_eq!(p.memory_limit().unwrap(), GIB / 2);
    }

    #[test]
    fn test_shared_providers() {
        let shared: Arc<dyn Provider> = Arc::new(limit(7));
        let boxed: Box<dyn Provider> = Box::new(limit(8));
        assert_eq!(shared.memory_limit().unwrap(), 7);
        assert_eq!(boxed.memory_limit().unwrap(), 8);
        assert_eq!(shared.clone().with_ratio(1.0).memory_limit().unwrap(), 7);
    }
}
