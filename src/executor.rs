// SPDX-License-Identifier: MIT OR Apache-2.0

//! The batch executor (design document §4.E).
//!
//! Runs one [`Batch`] through a worker, enforcing the wall-clock and
//! idle-output guards simultaneously, and classifies the result per the
//! decision table in the design document: one executor instance owns exactly
//! one worker for the duration of one unit of work, and tears it down with a
//! timed grace period before a hard kill.

use crate::config::RunnerConfig;
use crate::idset::IdSet;
use crate::plan::Batch;
use crate::protocol::Message;
use crate::results;
use crate::signal::CancellationToken;
use crate::time::{IdleTracker, Stopwatch};
use crate::worker::{WorkerHandle, WorkerLine};
use camino::Utf8PathBuf;
use std::time::Duration;

/// Everything the executor needs to launch a worker for one batch.
#[derive(Clone, Debug)]
pub struct WorkerSpawnSpec {
    /// The worker binary to launch.
    pub program: String,
    /// Extra arguments to pass it, before the protocol takes over on stdio.
    pub args: Vec<String>,
    /// The test assembly this batch's tests belong to.
    pub assembly: String,
    /// Base directory under which a fresh per-batch result-file directory is
    /// created and handed to the worker's underlying test engine via a
    /// well-known `--results-directory` argument (design document §6). `None`
    /// skips result-directory handling entirely: no directory is created,
    /// no extra argument is appended, and hang-artefact scanning is skipped.
    pub result_dir_root: Option<Utf8PathBuf>,
}

/// The outcome of running one batch (design document §3, "Batch Outcome").
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// The batch's label, carried through for reporting.
    pub label: String,
    /// Total tests the batch attempted.
    pub total: usize,
    /// Tests that passed.
    pub passed: IdSet,
    /// Tests that failed.
    pub failed: IdSet,
    /// Tests that the worker itself reported as skipped. Not part of the
    /// design document's pairwise-disjoint invariant (which covers only
    /// passed/failed/timed-out), but needed to populate the run result's
    /// skipped count.
    pub skipped: IdSet,
    /// Tests that timed out or were caught by a guard.
    pub timed_out: IdSet,
    /// The worker process's raw exit code, if known.
    pub exit_code: Option<i32>,
    /// Whether this batch is classified as hung.
    pub hung: bool,
    /// Whether any event at all was received from the worker.
    pub had_results: bool,
    /// Set when no results were produced, the exit code didn't match the
    /// observed results, or a guard fired.
    pub reason: Option<String>,
}

impl BatchOutcome {
    /// `succeeded = !hung && failed=∅ && timed_out=∅ && (had_results ||
    /// exit=0) && (passed≠∅ || had_results)`.
    pub fn succeeded(&self) -> bool {
        !self.hung
            && self.failed.is_empty()
            && self.timed_out.is_empty()
            && (self.had_results || self.exit_code == Some(0))
            && (!self.passed.is_empty() || self.had_results)
    }

    /// The tests still unresolved after this batch: neither passed, failed,
    /// nor skipped. Used by the isolation scheduler's drill-down rule (design
    /// document §4.F: `U = tests − passed − failed`, extended here to also
    /// exclude `skipped` so a statically-skipped test is never mistaken for
    /// a hang candidate).
    pub fn unresolved(&self, batch_tests: &[String]) -> Vec<String> {
        batch_tests
            .iter()
            .filter(|t| !self.passed.contains(t) && !self.failed.contains(t) && !self.skipped.contains(t))
            .cloned()
            .collect()
    }
}

enum StopReason {
    Completed,
    WorkerError(String),
    WorkerExited,
    GuardFired(&'static str),
    Cancelled,
}

/// Runs `batch` to completion against a freshly spawned worker.
pub async fn execute_batch(
    batch: &Batch,
    spawn: &WorkerSpawnSpec,
    cfg: &RunnerConfig,
    cancel: &CancellationToken,
) -> BatchOutcome {
    // Scoped resource: the result directory (if any) is removed when
    // `result_dir` drops at the end of this function, on every exit path —
    // success, failure, or cancellation — per the design document's
    // guarantee that temp directories are cleaned up best-effort.
    let result_dir = match &spawn.result_dir_root {
        Some(root) => match camino_tempfile::Builder::new()
            .prefix("hangwarden-")
            .tempdir_in(root)
        {
            Ok(dir) => Some(dir),
            Err(error) => {
                tracing::warn!(batch = %batch.label, %error, "failed to create result directory for batch");
                None
            }
        },
        None => None,
    };
    let args = match &result_dir {
        Some(dir) => {
            let mut args = spawn.args.clone();
            args.push("--results-directory".to_string());
            args.push(dir.path().to_string());
            args
        }
        None => spawn.args.clone(),
    };

    let mut handle = match WorkerHandle::spawn(&spawn.program, &args) {
        Ok(h) => h,
        Err(error) => {
            tracing::warn!(batch = %batch.label, %error, "failed to spawn worker for batch");
            return BatchOutcome {
                label: batch.label.clone(),
                total: batch.tests.len(),
                passed: IdSet::new(),
                failed: IdSet::new(),
                skipped: IdSet::new(),
                timed_out: IdSet::new(),
                exit_code: None,
                hung: false,
                had_results: false,
                reason: Some(format!("failed to spawn worker: {error}")),
            };
        }
    };

    if handle
        .start_run(
            spawn.assembly.clone(),
            Some(batch.tests.clone()),
            cfg.per_test_timeout().map(|d| d.as_secs()),
        )
        .await
        .is_err()
    {
        let termination = handle.terminate(cfg_grace(cfg)).await;
        return BatchOutcome {
            label: batch.label.clone(),
            total: batch.tests.len(),
            passed: IdSet::new(),
            failed: IdSet::new(),
            skipped: IdSet::new(),
            timed_out: IdSet::new(),
            exit_code: termination.exit_code,
            hung: false,
            had_results: false,
            reason: Some("worker exited before accepting the run request".to_string()),
        };
    }

    let wall_guard = cfg.wall_guard();
    let idle_guard = cfg.idle_guard();

    let mut passed = IdSet::new();
    let mut failed = IdSet::new();
    let mut skipped = IdSet::new();
    let mut timed_out = IdSet::new();
    // Tests that have a `Started` event but no terminal event yet. If a
    // guard fires, whatever remains here is in-flight and gets classified
    // as timed out (guard-detected hang); the protocol has no explicit
    // per-test timeout event of its own (see design document §9).
    let mut in_flight = IdSet::new();
    let mut had_results = false;
    let mut error_reason: Option<String> = None;

    let mut idle = IdleTracker::new();
    let mut wall: Option<Stopwatch> = None;

    let stop_reason = loop {
        let armed = wall.is_some();
        let idle_remaining = idle_guard.saturating_sub(idle.idle_for());
        let wall_remaining = wall.map(|sw| wall_guard.saturating_sub(sw.elapsed()));

        tokio::select! {
            biased;

            _ = cancel.cancelled() => break StopReason::Cancelled,

            _ = tokio::time::sleep(idle_remaining), if armed => break StopReason::GuardFired("idle"),

            _ = tokio::time::sleep(wall_remaining.unwrap_or(Duration::MAX)), if armed => {
                break StopReason::GuardFired("wall");
            }

            line = handle.recv() => {
                match line {
                    None => break StopReason::WorkerExited,
                    Some(WorkerLine::Noise(_)) => {
                        idle.touch();
                        wall.get_or_insert_with(Stopwatch::start);
                    }
                    Some(WorkerLine::Message(msg)) => {
                        idle.touch();
                        wall.get_or_insert_with(Stopwatch::start);
                        match msg {
                            Message::Started { fully_qualified_name, .. } => {
                                had_results = true;
                                in_flight.insert(fully_qualified_name);
                            }
                            Message::Passed { fully_qualified_name, .. } => {
                                had_results = true;
                                in_flight.remove(&fully_qualified_name);
                                passed.insert(fully_qualified_name);
                            }
                            Message::Failed { fully_qualified_name, .. } => {
                                had_results = true;
                                in_flight.remove(&fully_qualified_name);
                                failed.insert(fully_qualified_name);
                            }
                            Message::Skipped { fully_qualified_name, .. } => {
                                had_results = true;
                                in_flight.remove(&fully_qualified_name);
                                skipped.insert(fully_qualified_name);
                            }
                            Message::Output { .. } => {}
                            Message::Completed { .. } => break StopReason::Completed,
                            Message::Error { message, .. } => break StopReason::WorkerError(message),
                            // C→W messages looped back by a non-conformant
                            // worker (or a fake in tests): ignore.
                            Message::Discover { .. }
                            | Message::Run { .. }
                            | Message::Cancel
                            | Message::Discovered { .. } => {}
                        }
                    }
                }
            }
        }
    };

    let guard_fired = matches!(stop_reason, StopReason::GuardFired(_));
    if let StopReason::WorkerError(ref message) = stop_reason {
        error_reason = Some(message.clone());
    }
    if guard_fired {
        for id in in_flight.iter().map(str::to_string).collect::<Vec<_>>() {
            timed_out.insert(id);
        }
    }
    crate::idset::resolve_precedence(&mut passed, &mut failed, &mut timed_out);

    let termination = if matches!(stop_reason, StopReason::WorkerExited) {
        let exit_code = handle.try_exit_code();
        let _ = handle.terminate(cfg_grace(cfg)).await;
        crate::worker::Termination {
            forced: false,
            exit_code,
        }
    } else {
        handle.terminate(cfg_grace(cfg)).await
    };

    // A hang can be observed out-of-band even when the guards never fired
    // and the worker reported no timed-out tests: the worker's underlying
    // engine may have written its own hang artefacts to the result
    // directory before the coordinator's guards would have caught it
    // (design document §4.E step 6, §6).
    let hang_artefacts = match &result_dir {
        Some(dir) => results::hang_artefacts_present(dir.path()).unwrap_or_else(|error| {
            tracing::warn!(batch = %batch.label, %error, "failed to scan result directory for hang artefacts");
            false
        }),
        None => false,
    };

    let hung = guard_fired || !timed_out.is_empty() || hang_artefacts;

    let reason = if guard_fired {
        Some(format!(
            "guard fired: {} exceeded",
            match stop_reason {
                StopReason::GuardFired(which) => which,
                _ => unreachable!(),
            }
        ))
    } else if hang_artefacts {
        Some("hang artefacts present in result directory".to_string())
    } else if let Some(message) = error_reason {
        Some(message)
    } else if !had_results {
        Some("no-results".to_string())
    } else if failed.is_empty()
        && timed_out.is_empty()
        && termination.exit_code.is_some_and(|c| c != 0)
    {
        Some("exit-mismatch".to_string())
    } else {
        None
    };

    tracing::info!(
        batch = %batch.label,
        passed = passed.len(),
        failed = failed.len(),
        timed_out = timed_out.len(),
        hung,
        "batch finished"
    );

    BatchOutcome {
        label: batch.label.clone(),
        total: batch.tests.len(),
        passed,
        failed,
        skipped,
        timed_out,
        exit_code: termination.exit_code,
        hung,
        had_results,
        reason,
    }
}

fn cfg_grace(_cfg: &RunnerConfig) -> Duration {
    crate::config::DEFAULT_GRACE_PERIOD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(tests: &[&str]) -> Batch {
        Batch {
            label: "batch-1".to_string(),
            tests: tests.iter().map(|s| s.to_string()).collect(),
            filter_prefixes: vec![],
            depth: 0,
        }
    }

    #[test]
    fn succeeded_requires_had_results_or_clean_exit() {
        let outcome = BatchOutcome {
            label: "b".into(),
            total: 1,
            passed: IdSet::from_iter_ids(["A"]),
            failed: IdSet::new(),
            skipped: IdSet::new(),
            timed_out: IdSet::new(),
            exit_code: Some(0),
            hung: false,
            had_results: true,
            reason: None,
        };
        assert!(outcome.succeeded());
    }

    #[test]
    fn failed_set_blocks_success() {
        let mut outcome = BatchOutcome {
            label: "b".into(),
            total: 2,
            passed: IdSet::from_iter_ids(["A"]),
            failed: IdSet::from_iter_ids(["B"]),
            skipped: IdSet::new(),
            timed_out: IdSet::new(),
            exit_code: Some(1),
            hung: false,
            had_results: true,
            reason: None,
        };
        assert!(!outcome.succeeded());
        outcome.failed = IdSet::new();
        assert!(outcome.succeeded() || outcome.exit_code != Some(0));
    }

    #[test]
    fn unresolved_excludes_passed_and_failed() {
        let b = batch(&["A", "B", "C"]);
        let outcome = BatchOutcome {
            label: "b".into(),
            total: 3,
            passed: IdSet::from_iter_ids(["A"]),
            failed: IdSet::from_iter_ids(["B"]),
            skipped: IdSet::new(),
            timed_out: IdSet::new(),
            exit_code: None,
            hung: true,
            had_results: true,
            reason: None,
        };
        assert_eq!(outcome.unresolved(&b.tests), vec!["C".to_string()]);
    }

    #[tokio::test]
    async fn spawn_failure_is_classified_not_panicked() {
        let batch = batch(&["A"]);
        let spawn = WorkerSpawnSpec {
            program: "/no/such/hangwarden-worker".to_string(),
            args: vec![],
            assembly: "x".to_string(),
            result_dir_root: None,
        };
        let cfg = RunnerConfig::default();
        let cancel = CancellationToken::new();
        let outcome = execute_batch(&batch, &spawn, &cfg, &cancel).await;
        assert!(!outcome.succeeded());
        assert!(outcome.reason.is_some());
    }
}
