//! Applies a discovered memory limit to the soft budget.
//!
//! One call to [`apply`] runs the whole pipeline once:
//!
//! 1. snapshot the current budget
//! 2. guard everything below with a rollback to the snapshot on panic
//! 3. skip if [`ENV_MEMLIMIT`] is set or [`ENV_MEMLIMIT_RATIO`] is `off`
//! 4. compose `provider -> ratio -> cap at i64::MAX`
//! 5. set the budget if the value changed
//!
//! and optionally leaves a refresh thread behind that repeats step 5 on a
//! timer until its [`CancellationToken`] is cancelled.

mod refresh;

pub use refresh::CancellationToken;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::budget::{self, MemoryBudget};
use crate::env::{
    DEFAULT_RATIO, ENV_MEMLIMIT, ENV_MEMLIMIT_RATIO, Env, Experiments, ProcessEnv,
    RatioOverride, parse_ratio_override, validate_ratio,
};
use crate::error::Error;
use crate::provider::{self, Provider, apply_ratio, cap_to_i64};

/// Configuration for [`apply`].
pub struct Config {
    ratio: f64,
    provider: Option<Arc<dyn Provider>>,
    budget: Arc<dyn MemoryBudget>,
    env: Arc<dyn Env>,
    refresh: Option<(Duration, CancellationToken)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ratio: DEFAULT_RATIO,
            provider: None,
            budget: Arc::new(budget::global()),
            env: Arc::new(ProcessEnv),
            refresh: None,
        }
    }
}

impl Config {
    /// Ratio 0.9, cgroup discovery, the global budget and the process
    /// environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of the discovered limit to use as the budget, in (0, 1].
    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.ratio = ratio;
        self
    }

    /// Replaces cgroup discovery with another limit source.
    pub fn with_provider(mut self, provider: impl Provider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Budget to apply the limit to.
    pub fn with_budget(mut self, budget: Arc<dyn MemoryBudget>) -> Self {
        self.budget = budget;
        self
    }

    /// Environment to read overrides from.
    pub fn with_env(mut self, env: impl Env + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Re-reads the provider every `interval` until `token` is cancelled.
    ///
    /// A zero interval disables refreshing. While refreshing, "no limit" is
    /// treated as `i64::MAX`.
    pub fn with_refresh_interval(mut self, interval: Duration, token: CancellationToken) -> Self {
        self.refresh = Some((interval, token));
        self
    }

    /// Shorthand for [`apply`].
    pub fn apply(self) -> Result<i64, Error> {
        apply(self)
    }
}

/// Applies the configured limit to the budget.
///
/// Returns the budget now in effect: the new limit when one was applied, or
/// the unchanged previous budget when the limiter was skipped or the source
/// reported no limit. Every error is also logged.
pub fn apply(config: Config) -> Result<i64, Error> {
    let result = run(config);
    if let Err(e) = &result {
        error!(error = %e, "failed to set memory limit");
    }
    result
}

fn run(config: Config) -> Result<i64, Error> {
    let Config {
        ratio,
        provider,
        budget,
        env,
        refresh,
    } = config;

    let snapshot = budget.memory_limit();

    with_rollback(budget.as_ref(), snapshot, || {
        if let Some(value) = env.var(ENV_MEMLIMIT) {
            info!(MEMLIMIT = %value, "memory limit is already set, skipping");
            return Ok(snapshot);
        }

        let ratio = match env.var(ENV_MEMLIMIT_RATIO) {
            Some(value) => match parse_ratio_override(&value)? {
                RatioOverride::Off => {
                    info!("{} is set to off, skipping", ENV_MEMLIMIT_RATIO);
                    return Ok(snapshot);
                }
                RatioOverride::Ratio(r) => r,
                RatioOverride::Unset => ratio,
            },
            None => ratio,
        };
        let ratio = validate_ratio(ratio)?;

        let source = match provider {
            Some(p) => p,
            None => default_provider(env.as_ref())?,
        };
        let composed: Arc<dyn Provider> = Arc::new(cap_to_i64(apply_ratio(source, ratio)));

        let result = update(budget.as_ref(), snapshot, composed.as_ref());

        // Started even when the first update failed, so a source that only
        // later produces a limit is still picked up.
        if let Some((interval, token)) = refresh
            && !interval.is_zero()
        {
            refresh::spawn(composed, budget.clone(), interval, token);
        }

        match result {
            Ok(limit) => Ok(limit),
            Err(e) if e.is_no_limit() => {
                info!("memory is not limited, skipping");
                Ok(snapshot)
            }
            Err(e) => Err(e.context("failed to set memory limit")),
        }
    })
}

fn default_provider(env: &dyn Env) -> Result<Arc<dyn Provider>, Error> {
    let experiments = Experiments::from_env(env)?;
    if experiments.system {
        debug!("system memory experiment enabled");
        Ok(Arc::new(provider::fallback(
            provider::cgroup(),
            provider::system(),
        )))
    } else {
        Ok(Arc::new(provider::cgroup()))
    }
}

/// Reads `provider` and sets the budget if the value differs from `current`.
fn update(
    budget: &dyn MemoryBudget,
    current: i64,
    provider: &dyn Provider,
) -> Result<i64, Error> {
    let limit = i64::try_from(provider.memory_limit()?).unwrap_or(i64::MAX);

    if limit == current {
        debug!(limit, "memory limit is not changed, skipping");
        return Ok(limit);
    }

    budget.set_memory_limit(limit);
    info!(limit, previous = current, "memory limit is updated");

    Ok(limit)
}

/// Runs `f`, restoring the budget to `snapshot` if it panics.
fn with_rollback<T>(
    budget: &dyn MemoryBudget,
    snapshot: i64,
    f: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            budget.set_memory_limit(snapshot);
            let message = panic_message(payload.as_ref());
            error!(snapshot, panic = %message, "panic while setting memory limit, rolled back");
            Err(Error::PanicRecovered { snapshot, message })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{SoftLimit, UNBOUNDED};
    use crate::env::MapEnv;
    use crate::provider::{from_fn, limit};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GIB: u64 = 1024 * 1024 * 1024;

    /// Budget that counts real mutations.
    #[derive(Default)]
    struct CountingBudget {
        inner: SoftLimit,
        sets: AtomicUsize,
    }

    impl MemoryBudget for CountingBudget {
        fn set_memory_limit(&self, limit: i64) -> i64 {
            if limit >= 0 {
                self.sets.fetch_add(1, Ordering::SeqCst);
            }
            self.inner.set_memory_limit(limit)
        }
    }

    fn config(budget: Arc<dyn MemoryBudget>) -> Config {
        Config::new().with_budget(budget).with_env(MapEnv::new())
    }

    #[test]
    fn test_apply_ratio_to_static_limit() {
        let budget = Arc::new(SoftLimit::new());
        let got = config(budget.clone())
            .with_provider(limit(GIB))
            .with_ratio(0.5)
            .apply()
            .unwrap();
        assert_eq!(got, 536870912);
        assert_eq!(budget.get(), 536870912);
    }

    #[test]
    fn test_default_ratio() {
        let budget = Arc::new(SoftLimit::new());
        let got = config(budget.clone()).with_provider(limit(GIB)).apply().unwrap();
        assert_eq!(got, 966367641);
    }

    #[test]
    fn test_huge_limit_saturates() {
        let budget = Arc::new(SoftLimit::new());
        budget.set_memory_limit(GIB as i64);
        let got = config(budget.clone())
            .with_provider(limit(u64::MAX))
            .apply()
            .unwrap();
        assert_eq!(got, i64::MAX);
        assert_eq!(budget.get(), i64::MAX);
    }

    #[test]
    fn test_idempotent_application() {
        let budget = Arc::new(CountingBudget::default());
        for _ in 0..2 {
            let got = config(budget.clone())
                .with_provider(limit(GIB))
                .with_ratio(1.0)
                .apply()
                .unwrap();
            assert_eq!(got, GIB as i64);
        }
        assert_eq!(budget.sets.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_limit_returns_snapshot() {
        let budget = Arc::new(SoftLimit::new());
        budget.set_memory_limit(1234);
        let got = config(budget.clone())
            .with_provider(from_fn(|| Err(Error::NoLimit.context("wrapped"))))
            .apply()
            .unwrap();
        assert_eq!(got, 1234);
        assert_eq!(budget.get(), 1234);
    }

    #[test]
    fn test_provider_error_is_reported() {
        let budget = Arc::new(SoftLimit::new());
        let err = config(budget.clone())
            .with_provider(from_fn(|| Err(Error::Provider("unknown error".into()))))
            .apply()
            .unwrap_err();
        assert_eq!(err.to_string(), "failed to set memory limit: unknown error");
        assert_eq!(budget.get(), UNBOUNDED);
    }

    #[test]
    fn test_memlimit_env_skips() {
        let budget = Arc::new(CountingBudget::default());
        let got = config(budget.clone())
            .with_env(MapEnv::new().with(ENV_MEMLIMIT, "1GiB"))
            .with_provider(limit(GIB))
            .apply()
            .unwrap();
        assert_eq!(got, UNBOUNDED);
        assert_eq!(budget.sets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ratio_env_off_skips() {
        let budget = Arc::new(CountingBudget::default());
        let got = config(budget.clone())
            .with_env(MapEnv::new().with(ENV_MEMLIMIT_RATIO, "off"))
            .with_provider(limit(GIB))
            .apply()
            .unwrap();
        assert_eq!(got, UNBOUNDED);
        assert_eq!(budget.sets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ratio_env_overrides_configured_ratio() {
        let budget = Arc::new(SoftLimit::new());
        let got = config(budget)
            .with_env(MapEnv::new().with(ENV_MEMLIMIT_RATIO, "0.5"))
            .with_ratio(0.9)
            .with_provider(limit(GIB))
            .apply()
            .unwrap();
        assert_eq!(got, 536870912);
    }

    #[test]
    fn test_unparseable_ratio_env_is_config_error() {
        let budget = Arc::new(SoftLimit::new());
        let err = config(budget)
            .with_env(MapEnv::new().with(ENV_MEMLIMIT_RATIO, "lots"))
            .with_provider(limit(GIB))
            .apply()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_out_of_range_ratio_is_config_error() {
        for ratio in [0.0, -1.0, 1.5] {
            let budget = Arc::new(CountingBudget::default());
            let err = config(budget.clone())
                .with_provider(limit(GIB))
                .with_ratio(ratio)
                .apply()
                .unwrap_err();
            assert!(matches!(err, Error::Config(_)));
            assert_eq!(budget.sets.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_unknown_experiment_is_config_error() {
        let budget = Arc::new(SoftLimit::new());
        let err = config(budget)
            .with_env(MapEnv::new().with("MEMLIMIT_EXPERIMENT", "turbo"))
            .apply()
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_panic_rolls_back() {
        let budget = Arc::new(SoftLimit::new());
        budget.set_memory_limit(GIB as i64);

        let inside = budget.clone();
        let err = config(budget.clone())
            .with_provider(from_fn(move || {
                inside.set_memory_limit(42);
                panic!("provider exploded");
            }))
            .apply()
            .unwrap_err();

        match err {
            Error::PanicRecovered { snapshot, message } => {
                assert_eq!(snapshot, GIB as i64);
                assert_eq!(message, "provider exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(budget.get(), GIB as i64);
    }

    #[test]
    fn test_panic_message_formats() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
