// SPDX-License-Identifier: MIT OR Apache-2.0

//! The outcome aggregator (design document §4.G).
//!
//! Merges per-batch outcomes into a single [`RunResult`]. The merge itself
//! (passed overrides failed overrides skipped; counts recomputed from final
//! sets, never summed) is commutative and associative by construction: each
//! identifier's final classification depends only on whether it was *ever*
//! observed passed, *ever* observed failed, and so on — not on the order
//! batches happened to complete in. This pins down the design document's
//! §9 open question in favor of `duration = max`, never `sum`.

use crate::executor::BatchOutcome;
use crate::idset::IdSet;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// An in-progress merge of zero or more batch outcomes.
#[derive(Clone, Debug, Default)]
pub struct Aggregate {
    passed: IdSet,
    failed: IdSet,
    skipped: IdSet,
    duration: Duration,
    earliest_start: Option<DateTime<Utc>>,
}

impl Aggregate {
    /// The identity element for [`Aggregate::merge`]: merging it with
    /// anything returns that thing unchanged (up to the duration/timestamp
    /// accounting, which are no-ops against `Duration::ZERO`/`None`).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Folds one batch's passed/failed/skipped identifiers in. `started_at`
    /// and `duration` describe the batch as a whole, used to compute the
    /// run result's overall duration (max across batches) and the
    /// timestamp its run id is derived from (earliest start across
    /// batches).
    pub fn from_batch(outcome: &BatchOutcome, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            passed: outcome.passed.clone(),
            failed: outcome.failed.clone(),
            skipped: outcome.skipped.clone(),
            duration,
            earliest_start: Some(started_at),
        }
    }

    /// Merges `other` into `self`, applying the override rules and
    /// recomputing derived duration/timestamp fields. Idempotent and
    /// order-independent up to set equality: `a.merge(b).merge(c) ==
    /// a.merge(b.merge(c))` for the resulting identifier sets.
    pub fn merge(mut self, other: Self) -> Self {
        for id in other.passed.iter() {
            self.passed.insert(id);
        }
        for id in other.failed.iter() {
            self.failed.insert(id);
        }
        for id in other.skipped.iter() {
            self.skipped.insert(id);
        }
        resolve_classification(&mut self.passed, &mut self.failed, &mut self.skipped);

        self.duration = self.duration.max(other.duration);
        self.earliest_start = match (self.earliest_start, other.earliest_start) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        };
        self
    }

    pub(crate) fn passed(&self) -> &IdSet {
        &self.passed
    }

    pub(crate) fn failed(&self) -> &IdSet {
        &self.failed
    }

    pub(crate) fn skipped(&self) -> &IdSet {
        &self.skipped
    }

    pub(crate) fn duration(&self) -> Duration {
        self.duration
    }

    pub(crate) fn earliest_start(&self) -> Option<DateTime<Utc>> {
        self.earliest_start
    }
}

/// Applies priority passed > failed > skipped so the three sets end up
/// pairwise disjoint, the same way [`crate::idset::resolve_precedence`]
/// does for passed/failed/timed-out within one batch.
fn resolve_classification(passed: &mut IdSet, failed: &mut IdSet, skipped: &mut IdSet) {
    for id in passed.iter().map(str::to_string).collect::<Vec<_>>() {
        failed.remove(&id);
        skipped.remove(&id);
    }
    for id in failed.iter().map(str::to_string).collect::<Vec<_>>() {
        skipped.remove(&id);
    }
}

/// The final, aggregated result of a run (design document §3, "Run
/// Result").
#[derive(Debug, Clone)]
pub struct RunResult {
    /// A timestamp-based run id, monotonic within a second.
    pub run_id: String,
    /// Tests that ended up passed.
    pub passed: IdSet,
    /// Tests that ended up failed.
    pub failed: IdSet,
    /// Tests the worker reported as skipped.
    pub skipped: IdSet,
    /// Tests still classified timed-out at the end of the run — only
    /// non-empty if the run was cancelled before every hang could be
    /// isolated; a completed run resolves every hang into either `passed`,
    /// `failed`, or `isolated_hanging`.
    pub timed_out: IdSet,
    /// Tests the isolation scheduler narrowed down to a single hanging
    /// culprit.
    pub isolated_hanging: IdSet,
    /// Labels of batches that ended up classified `failed` (not hung, not
    /// succeeded) — recorded for the operator to investigate, never
    /// retried automatically.
    pub failed_batches: Vec<String>,
    /// Overall run duration: the maximum single-batch duration observed,
    /// per §9's pinned-down merge semantics.
    pub duration: Duration,
}

impl RunResult {
    /// Total passed + failed + skipped + timed_out + isolated_hanging.
    pub fn total_classified(&self) -> usize {
        self.passed.len()
            + self.failed.len()
            + self.skipped.len()
            + self.timed_out.len()
            + self.isolated_hanging.len()
    }
}

/// Finalizes an [`Aggregate`] into a [`RunResult`], given the scheduler's
/// separately-tracked `timed_out` and `isolated_hanging` sets (which aren't
/// folded through [`Aggregate::merge`] because they depend on drill-down
/// state the aggregator itself doesn't see) and the labels of batches that
/// failed outright.
///
/// A batch-level hang signal (a guard fire, a worker-reported timeout, or an
/// out-of-band hang artefact) always wins over whatever per-test event
/// happened to arrive for that same identifier before the hang was detected
/// — a test isolated as hanging or left timed-out is stripped out of
/// `passed`/`failed`/`skipped` here so the final sets stay pairwise disjoint
/// (design document §8 property 4) no matter what the worker reported.
pub fn finalize(
    aggregate: Aggregate,
    timed_out: IdSet,
    isolated_hanging: IdSet,
    failed_batches: Vec<String>,
) -> RunResult {
    let seed = aggregate.earliest_start().unwrap_or_else(Utc::now);
    let mut passed = aggregate.passed().clone();
    let mut failed = aggregate.failed().clone();
    let mut skipped = aggregate.skipped().clone();
    for id in isolated_hanging.iter().chain(timed_out.iter()) {
        passed.remove(id);
        failed.remove(id);
        skipped.remove(id);
    }
    RunResult {
        run_id: run_id_from(seed),
        passed,
        failed,
        skipped,
        timed_out,
        isolated_hanging,
        failed_batches,
        duration: aggregate.duration(),
    }
}

/// Builds a run id from a timestamp, at microsecond precision so that two
/// runs started within the same wall-clock second still sort and compare
/// distinctly.
fn run_id_from(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%S%.6f").to_string()
}
