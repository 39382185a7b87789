//! Mock filesystem implementations for testing.
//!
//! This module provides `MockFs` and pre-built scenarios for testing
//! cgroup discovery without requiring actual Linux `/proc` access.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
