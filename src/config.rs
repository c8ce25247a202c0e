// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runner configuration knobs.
//!
//! These mirror the "Configuration knobs" table in the design document
//! (`maxTestsPerBatch`, `perTestTimeoutSeconds`, `workers`, `initialFilter`).
//! This crate never reads a config file itself; an embedding CLI is expected
//! to deserialize a [`RunnerConfig`] from whatever format it prefers (TOML,
//! JSON, environment) and hand it to the scheduler.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The default planner ceiling: the maximum number of tests a top-level
/// batch may contain.
pub const DEFAULT_MAX_TESTS_PER_BATCH: usize = 5_000;

/// The default per-test soft timeout, forwarded to the worker.
pub const DEFAULT_PER_TEST_TIMEOUT_SECS: u64 = 30;

/// The default concurrency degree (number of batches in flight at once).
pub const DEFAULT_WORKERS: usize = 1;

/// The minimum wall-clock guard floor, regardless of `perTestTimeoutSeconds`.
pub const MIN_WALL_GUARD: Duration = Duration::from_secs(120);

/// The minimum idle-output guard floor.
pub const MIN_IDLE_GUARD: Duration = Duration::from_secs(90);

/// The grace period given to a worker between a termination request and a
/// force-kill.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Top-level configuration for a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerConfig {
    /// Planner ceiling: maximum tests in one top-level batch.
    #[serde(default = "default_max_tests_per_batch")]
    pub max_tests_per_batch: usize,

    /// Per-test soft timeout in seconds. `0` disables the timeout.
    #[serde(default = "default_per_test_timeout_seconds")]
    pub per_test_timeout_seconds: u64,

    /// Concurrency degree: number of batches that may run at once.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Optional substring filter applied before tree construction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_filter: Option<String>,
}

fn default_max_tests_per_batch() -> usize {
    DEFAULT_MAX_TESTS_PER_BATCH
}

fn default_per_test_timeout_seconds() -> u64 {
    DEFAULT_PER_TEST_TIMEOUT_SECS
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_tests_per_batch: DEFAULT_MAX_TESTS_PER_BATCH,
            per_test_timeout_seconds: DEFAULT_PER_TEST_TIMEOUT_SECS,
            workers: DEFAULT_WORKERS,
            initial_filter: None,
        }
    }
}

impl RunnerConfig {
    /// The per-test timeout as a [`Duration`], or `None` if disabled.
    pub fn per_test_timeout(&self) -> Option<Duration> {
        (self.per_test_timeout_seconds != 0)
            .then(|| Duration::from_secs(self.per_test_timeout_seconds))
    }

    /// Computes the wall-clock guard for a batch executor, per §4.E:
    /// `max(perTestTimeout * 2, 120s)`.
    pub fn wall_guard(&self) -> Duration {
        let doubled = self
            .per_test_timeout()
            .map(|d| d * 2)
            .unwrap_or(MIN_WALL_GUARD);
        doubled.max(MIN_WALL_GUARD)
    }

    /// Computes the idle-output guard for a batch executor, per §4.E:
    /// `max(wall/2, 90s)`.
    pub fn idle_guard(&self) -> Duration {
        (self.wall_guard() / 2).max(MIN_IDLE_GUARD)
    }
}
