//! Environment lookups read by the limiter.
//!
//! Only three names are consulted, and only through the [`Env`] trait so
//! tests can supply their own values without touching the process
//! environment.

use std::collections::HashMap;

use crate::error::Error;

/// Set when an explicit budget is configured; the limiter then does nothing.
pub const ENV_MEMLIMIT: &str = "MEMLIMIT";
/// Ratio override, or [`RATIO_OFF`] to disable the limiter.
pub const ENV_MEMLIMIT_RATIO: &str = "MEMLIMIT_RATIO";
/// Comma-separated experiment flags.
pub const ENV_MEMLIMIT_EXPERIMENT: &str = "MEMLIMIT_EXPERIMENT";

/// Ratio override value that disables the limiter.
pub const RATIO_OFF: &str = "off";

/// Ratio used when none is configured.
pub const DEFAULT_RATIO: f64 = 0.9;

/// Read access to environment variables.
pub trait Env: Send + Sync {
    /// Returns the value of `name`, or `None` when unset.
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables.
#[derive(Debug, Default, Clone)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Result of reading the ratio override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatioOverride {
    /// Not set.
    Unset,
    /// Set to [`RATIO_OFF`].
    Off,
    /// Set to a number.
    Ratio(f64),
}

/// Parses a ratio override value.
pub fn parse_ratio_override(value: &str) -> Result<RatioOverride, Error> {
    let value = value.trim();
    if value == RATIO_OFF {
        return Ok(RatioOverride::Off);
    }
    value
        .parse::<f64>()
        .map(RatioOverride::Ratio)
        .map_err(|_| Error::Config(format!("cannot parse {}: {}", ENV_MEMLIMIT_RATIO, value)))
}

/// Checks that a ratio lies in (0, 1].
pub fn validate_ratio(ratio: f64) -> Result<f64, Error> {
    if ratio > 0.0 && ratio <= 1.0 {
        Ok(ratio)
    } else {
        Err(Error::Config(format!(
            "ratio must be in (0, 1], got {}",
            ratio
        )))
    }
}

/// Experiment flags from [`ENV_MEMLIMIT_EXPERIMENT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Experiments {
    /// Fall back to total system memory when no cgroup limit is found.
    pub system: bool,
}

impl Experiments {
    /// Reads the experiment flags from `env`.
    pub fn from_env(env: &dyn Env) -> Result<Self, Error> {
        match env.var(ENV_MEMLIMIT_EXPERIMENT) {
            Some(value) => Self::parse(&value),
            None => Ok(Self::default()),
        }
    }

    /// Parses a comma-separated flag list. `none` clears every flag.
    pub fn parse(value: &str) -> Result<Self, Error> {
        let mut experiments = Self::default();
        for flag in value.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match flag {
                "none" => return Ok(Self::default()),
                "system" => experiments.system = true,
                other => {
                    return Err(Error::Config(format!(
                        "unknown {} {}",
                        ENV_MEMLIMIT_EXPERIMENT, other
                    )));
                }
            }
        }
        Ok(experiments)
    }
}
