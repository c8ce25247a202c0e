// SPDX-License-Identifier: MIT OR Apache-2.0

//! The isolation scheduler (design document §4.F).
//!
//! This is the centerpiece: it owns the work queue and the semaphore
//! limiting in-flight batches to `P`, runs batches concurrently through the
//! [`BatchRunner`] seam, and, when a batch comes back hung, drills down by
//! re-planning its unresolved tests against a tighter ceiling until every
//! hang is isolated to a singleton. It's a queue- and semaphore-owning
//! controller that merges results from concurrently running units of work
//! behind a single-writer step, with dispatch bounded by a
//! [`tokio::sync::Semaphore`].
//!
//! The scheduler never talks to a worker process directly — that's
//! [`crate::executor::execute_batch`]'s job. Instead it's generic over a
//! small [`BatchRunner`] trait: production code uses [`WorkerBatchRunner`]
//! to spawn a real worker per batch; tests substitute an in-process fake
//! that scripts pass/fail/hang outcomes without spawning anything, since no
//! real worker binary exists in this crate's scope.

use crate::aggregate::{self, Aggregate, RunResult};
use crate::config::RunnerConfig;
use crate::errors::TreeBuildError;
use crate::executor::{execute_batch, BatchOutcome, WorkerSpawnSpec};
use crate::idset::IdSet;
use crate::plan::{plan_batches, Batch};
use crate::signal::CancellationToken;
use crate::time::Stopwatch;
use crate::tree::{rebuild_from, Tree};
use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Executes one batch and hands it back alongside its outcome.
///
/// This is the scheduler's only seam onto the outside world: it doesn't
/// know or care whether a batch was actually run against a child process,
/// a pooled worker, or (in tests) a scripted fake. Implementations must be
/// `Send + Sync` because the scheduler calls them from inside spawned
/// tasks that may run on any worker thread of a multi-threaded runtime.
pub trait BatchRunner: Send + Sync {
    /// Runs `batch`, returning it together with its outcome once the batch
    /// has finished (successfully, unsuccessfully, or because `cancel` was
    /// observed). Implementations are expected to honor `cancel` the way
    /// [`execute_batch`] does, but the scheduler doesn't otherwise assume
    /// anything about how quickly they respond to it.
    fn run_batch(&self, batch: Batch, cancel: CancellationToken) -> BoxFuture<'static, (Batch, BatchOutcome)>;
}

/// The production [`BatchRunner`]: spawns a fresh worker process for every
/// batch via [`execute_batch`], per the design document's "each batch
/// executor exclusively owns one worker handle for the duration of a
/// batch".
#[derive(Clone, Debug)]
pub struct WorkerBatchRunner {
    spawn: WorkerSpawnSpec,
    cfg: RunnerConfig,
}

impl WorkerBatchRunner {
    /// Creates a runner that spawns `spawn.program` for every batch, using
    /// `cfg` to derive the per-test timeout and wall/idle guards.
    pub fn new(spawn: WorkerSpawnSpec, cfg: RunnerConfig) -> Self {
        Self { spawn, cfg }
    }
}

impl BatchRunner for WorkerBatchRunner {
    fn run_batch(&self, batch: Batch, cancel: CancellationToken) -> BoxFuture<'static, (Batch, BatchOutcome)> {
        let spawn = self.spawn.clone();
        let cfg = self.cfg.clone();
        Box::pin(async move {
            let outcome = execute_batch(&batch, &spawn, &cfg, &cancel).await;
            (batch, outcome)
        })
    }
}

/// Runs every test named in `identifiers` to completion, isolating any
/// hangs along the way, via a real worker process per batch.
///
/// This is the convenience entry point for production use; it's a thin
/// wrapper over [`run`] with a [`WorkerBatchRunner`]. Embedders that want a
/// different execution strategy (a pooled worker, an in-process adapter for
/// testing) can call [`run`] directly with their own [`BatchRunner`].
pub async fn run_with_worker<I, S>(
    identifiers: I,
    spawn: WorkerSpawnSpec,
    cfg: RunnerConfig,
    cancel: CancellationToken,
) -> Result<RunResult, TreeBuildError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let runner = Arc::new(WorkerBatchRunner::new(spawn, cfg.clone()));
    run(identifiers, cfg, cancel, runner).await
}

/// Builds the initial prefix tree and top-level batch plan from `identifiers`
/// and drives them to completion through `runner`, concurrently up to
/// `cfg.workers` at a time, recursively isolating any batch that hangs.
///
/// Returns [`TreeBuildError::EmptyIdentifierList`] if `identifiers` (after
/// `cfg.initial_filter` is applied) is empty — the one catastrophic failure
/// this function can raise to its caller; every per-batch problem is folded
/// into the returned [`RunResult`] instead, per the design document §7
/// propagation policy.
pub async fn run<I, S>(
    identifiers: I,
    cfg: RunnerConfig,
    cancel: CancellationToken,
    runner: Arc<dyn BatchRunner>,
) -> Result<RunResult, TreeBuildError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let ids = apply_initial_filter(identifiers, cfg.initial_filter.as_deref());
    if ids.is_empty() {
        return Err(TreeBuildError::EmptyIdentifierList);
    }
    let tree = Tree::build(&ids);
    let initial_batches = plan_batches(&tree, cfg.max_tests_per_batch.max(1), 0);
    Ok(run_batches(initial_batches, cfg, cancel, runner).await)
}

fn apply_initial_filter<I, S>(identifiers: I, filter: Option<&str>) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    match filter {
        None => identifiers.into_iter().map(|id| id.as_ref().to_string()).collect(),
        Some(needle) => {
            let needle = needle.to_ascii_lowercase();
            identifiers
                .into_iter()
                .map(|id| id.as_ref().to_string())
                .filter(|id| id.to_ascii_lowercase().contains(&needle))
                .collect()
        }
    }
}

type JoinedBatch = (Batch, BatchOutcome, chrono::DateTime<Utc>, std::time::Duration);

/// Drives `initial_batches` to completion, including every drill-down batch
/// they spawn along the way. This is the work cycle of design document
/// §4.F: pop a batch, run it behind the concurrency semaphore, merge its
/// outcome into the single-writer aggregate, and — when it's hung — either
/// isolate it directly (singleton) or re-plan its unresolved tests at half
/// the ceiling and push the result back onto the queue.
async fn run_batches(
    initial_batches: Vec<Batch>,
    cfg: RunnerConfig,
    cancel: CancellationToken,
    runner: Arc<dyn BatchRunner>,
) -> RunResult {
    let semaphore = Arc::new(Semaphore::new(cfg.workers.max(1)));
    let mut queue: VecDeque<Batch> = initial_batches.into();
    let mut in_flight: JoinSet<JoinedBatch> = JoinSet::new();

    let mut aggregate = Aggregate::empty();
    let mut isolated_hanging = IdSet::new();
    let mut failed_batches = Vec::new();

    loop {
        // Refuse to start new batches once cancellation has been requested
        // (design document §4.F, "Cancellation"); batches already in flight
        // keep running until they observe `cancel` themselves.
        while !cancel.is_cancelled() {
            let Some(batch) = queue.pop_front() else {
                break;
            };
            let permit = Arc::clone(&semaphore);
            let runner = Arc::clone(&runner);
            let cancel_for_task = cancel.clone();
            in_flight.spawn(async move {
                let _permit = permit
                    .acquire_owned()
                    .await
                    .expect("scheduler semaphore is never closed");
                let started_at = Utc::now();
                let stopwatch = Stopwatch::start();
                let (batch, outcome) = runner.run_batch(batch, cancel_for_task).await;
                (batch, outcome, started_at, stopwatch.elapsed())
            });
        }

        if in_flight.is_empty() {
            break;
        }

        let Some(joined) = in_flight.join_next().await else {
            break;
        };
        let (batch, outcome, started_at, duration) =
            joined.expect("batch task panicked rather than returning an outcome");

        tracing::info!(
            batch = %outcome.label,
            hung = outcome.hung,
            passed = outcome.passed.len(),
            failed = outcome.failed.len(),
            "scheduler processed batch outcome"
        );

        aggregate = aggregate.merge(Aggregate::from_batch(&outcome, started_at, duration));

        if outcome.hung {
            drill_down(&batch, &outcome, &mut queue, &mut isolated_hanging);
        } else if !outcome.succeeded() {
            failed_batches.push(outcome.label.clone());
        }
    }

    // Batches left in the queue were never started because cancellation was
    // requested first; their tests stay `timed_out` rather than being
    // silently dropped, since the run ended before isolation could finish
    // with them.
    let mut timed_out = IdSet::new();
    for batch in queue.drain(..) {
        for id in batch.tests {
            timed_out.insert(id);
        }
    }

    aggregate::finalize(aggregate, timed_out, isolated_hanging, failed_batches)
}

/// Implements the drill-down rule of design document §4.F for one hung
/// batch: a singleton batch is isolated directly — unambiguously, since
/// there's only one test it could be — regardless of whether that test also
/// has a terminal event; a larger batch has its unresolved tests (`U = tests
/// − passed − failed − skipped`) re-planned against half the ceiling and
/// pushed back onto `queue` one recursion level deeper. `aggregate::finalize`
/// is what actually keeps the final sets disjoint when a singleton's
/// terminal event and its hung classification disagree.
fn drill_down(batch: &Batch, outcome: &BatchOutcome, queue: &mut VecDeque<Batch>, isolated_hanging: &mut IdSet) {
    if batch.tests.len() <= 1 {
        if let Some(only) = batch.tests.first() {
            isolated_hanging.insert(only.clone());
        }
        return;
    }

    let unresolved = outcome.unresolved(&batch.tests);
    match unresolved.len() {
        0 => {
            tracing::warn!(
                batch = %batch.label,
                "batch's guard fired but every test already resolved; nothing left to isolate"
            );
        }
        1 => {
            isolated_hanging.insert(unresolved.into_iter().next().expect("length checked above"));
        }
        n => {
            let sub_max = n.div_ceil(2).max(1);
            let sub_tree = rebuild_from(&unresolved);
            let sub_batches = plan_batches(&sub_tree, sub_max, batch.depth + 1);
            queue.extend(sub_batches);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idset::IdSet;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// A [`BatchRunner`] that scripts outcomes purely in memory: any batch
    /// containing one of `hanging`'s identifiers hangs in its entirety (no
    /// results at all, as a real worker stuck on one test would produce);
    /// every other batch passes outright. This exercises the scheduler's
    /// own queueing, drill-down, and aggregation logic without spawning any
    /// process, standing in for "an in-process fake worker" at the
    /// granularity the scheduler actually interacts with.
    struct ScriptedRunner {
        hanging: HashSet<String>,
        batches_run: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new<I: IntoIterator<Item = &'static str>>(hanging: I) -> Self {
            Self {
                hanging: hanging.into_iter().map(|s| s.to_ascii_lowercase()).collect(),
                batches_run: Mutex::new(Vec::new()),
            }
        }

        fn run_count(&self) -> usize {
            self.batches_run.lock().unwrap().len()
        }
    }

    impl BatchRunner for ScriptedRunner {
        fn run_batch(&self, batch: Batch, _cancel: CancellationToken) -> BoxFuture<'static, (Batch, BatchOutcome)> {
            self.batches_run.lock().unwrap().push(batch.label.clone());
            let contains_hang = batch
                .tests
                .iter()
                .any(|t| self.hanging.contains(&t.to_ascii_lowercase()));

            let outcome = if contains_hang {
                BatchOutcome {
                    label: batch.label.clone(),
                    total: batch.tests.len(),
                    passed: IdSet::new(),
                    failed: IdSet::new(),
                    skipped: IdSet::new(),
                    timed_out: IdSet::new(),
                    exit_code: None,
                    hung: true,
                    had_results: false,
                    reason: Some("guard fired: wall exceeded".to_string()),
                }
            } else {
                BatchOutcome {
                    label: batch.label.clone(),
                    total: batch.tests.len(),
                    passed: IdSet::from_iter_ids(batch.tests.clone()),
                    failed: IdSet::new(),
                    skipped: IdSet::new(),
                    timed_out: IdSet::new(),
                    exit_code: Some(0),
                    hung: false,
                    had_results: true,
                    reason: None,
                }
            };
            Box::pin(async move { (batch, outcome) })
        }
    }

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{prefix}{i}")).collect()
    }

    #[tokio::test]
    async fn s1_all_pass_in_one_batch() {
        let tests = vec!["A.B.T1".to_string(), "A.B.T2".to_string(), "A.C.T3".to_string()];
        let runner = Arc::new(ScriptedRunner::new([]));
        let result = run(tests, RunnerConfig::default(), CancellationToken::new(), runner.clone())
            .await
            .unwrap();
        assert_eq!(result.passed.len(), 3);
        assert!(result.failed.is_empty());
        assert!(result.isolated_hanging.is_empty());
        assert_eq!(runner.run_count(), 1);
    }

    #[tokio::test]
    async fn s2_single_hang_in_large_batch_is_isolated() {
        let tests = ids("N.M", 100);
        let runner = Arc::new(ScriptedRunner::new(["N.M42"]));
        let mut cfg = RunnerConfig::default();
        cfg.max_tests_per_batch = 5_000;
        let result = run(tests, cfg, CancellationToken::new(), runner.clone())
            .await
            .unwrap();

        assert_eq!(result.isolated_hanging.iter().collect::<Vec<_>>(), vec!["N.M42"]);
        assert_eq!(result.passed.len(), 99);
        assert!(!result.passed.contains("N.M42"));
        // Drill-down must actually have recursed: more than the one
        // top-level batch ran.
        assert!(runner.run_count() > 1, "expected recursive drill-down batches");
    }

    #[tokio::test]
    async fn s3_two_hangs_in_same_batch_isolated_independently() {
        let mut tests = ids("X.", 20);
        tests[0] = "X.A".to_string();
        tests[1] = "X.B".to_string();
        let runner = Arc::new(ScriptedRunner::new(["X.A", "X.B"]));
        let result = run(tests, RunnerConfig::default(), CancellationToken::new(), runner)
            .await
            .unwrap();

        let mut hung: Vec<&str> = result.isolated_hanging.iter().collect();
        hung.sort();
        assert_eq!(hung, vec!["X.A", "X.B"]);
        assert_eq!(result.passed.len(), 18);
    }

    #[tokio::test]
    async fn s4_later_pass_overrides_earlier_failure() {
        // Direct exercise of the aggregation rule the scheduler relies on
        // (design document scenario S4): a test reported failed in one
        // batch and passed in another ends up `passed`, never `failed`.
        let t0 = Utc::now();
        let failing = BatchOutcome {
            label: "batch-1".into(),
            total: 1,
            passed: IdSet::new(),
            failed: IdSet::from_iter_ids(["T"]),
            skipped: IdSet::new(),
            timed_out: IdSet::new(),
            exit_code: Some(1),
            hung: false,
            had_results: true,
            reason: None,
        };
        let passing = BatchOutcome {
            label: "batch-3".into(),
            total: 1,
            passed: IdSet::from_iter_ids(["T"]),
            failed: IdSet::new(),
            skipped: IdSet::new(),
            timed_out: IdSet::new(),
            exit_code: Some(0),
            hung: false,
            had_results: true,
            reason: None,
        };
        let merged = Aggregate::from_batch(&failing, t0, std::time::Duration::ZERO)
            .merge(Aggregate::from_batch(&passing, t0, std::time::Duration::ZERO));
        let result = aggregate::finalize(merged, IdSet::new(), IdSet::new(), vec![]);
        assert!(result.passed.contains("T"));
        assert!(!result.failed.contains("T"));
    }

    #[tokio::test]
    async fn s6_cancellation_stops_new_batches_but_keeps_partial_results() {
        let runner = Arc::new(SlowThenHangRunner);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let tests = ids("B.T", 6);
        let mut cfg = RunnerConfig::default();
        cfg.workers = 3;
        cfg.max_tests_per_batch = 2;

        let handle = tokio::spawn(run(tests, cfg, cancel.clone(), runner));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel_clone.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("scheduler should finish promptly once cancelled")
            .expect("task should not panic")
            .expect("tree was non-empty");

        // Nothing had a chance to report passed/failed; cancellation is
        // still observed and the call returns instead of hanging forever.
        assert!(result.passed.is_empty());
        assert!(result.failed.is_empty());
    }

    struct SlowThenHangRunner;
    impl BatchRunner for SlowThenHangRunner {
        fn run_batch(&self, batch: Batch, cancel: CancellationToken) -> BoxFuture<'static, (Batch, BatchOutcome)> {
            Box::pin(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {}
                }
                let outcome = BatchOutcome {
                    label: batch.label.clone(),
                    total: batch.tests.len(),
                    passed: IdSet::new(),
                    failed: IdSet::new(),
                    skipped: IdSet::new(),
                    timed_out: IdSet::new(),
                    exit_code: None,
                    hung: false,
                    had_results: false,
                    reason: Some("cancelled".to_string()),
                };
                (batch, outcome)
            })
        }
    }

    #[tokio::test]
    async fn empty_identifier_list_is_a_catastrophic_error() {
        let runner = Arc::new(ScriptedRunner::new([]));
        let result = run(
            Vec::<String>::new(),
            RunnerConfig::default(),
            CancellationToken::new(),
            runner,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn initial_filter_narrows_the_tree_before_planning() {
        let tests = vec!["A.B.T1".to_string(), "A.C.T2".to_string()];
        let mut cfg = RunnerConfig::default();
        cfg.initial_filter = Some("A.B".to_string());
        let runner = Arc::new(ScriptedRunner::new([]));
        let result = run(tests, cfg, CancellationToken::new(), runner).await.unwrap();
        assert_eq!(result.passed.len(), 1);
        assert!(result.passed.contains("A.B.T1"));
    }
}
