// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! `hangwarden` is a supervising test orchestrator core: it wraps an
//! underlying per-assembly unit-test execution engine and turns it into a
//! reliable, hang-tolerant, history-aware runner.
//!
//! Large test suites sometimes contain a test that hangs forever. Run naively,
//! one such test stalls the whole suite indefinitely. `hangwarden` bounds wall
//! clock time by grouping tests into batches, running batches concurrently
//! behind per-batch wall-clock and idle-output guards, and — when a batch
//! hangs — recursively subdividing it until every hanging test is isolated to
//! a batch of one. Everything else in the batch still gets a real result.
//!
//! # Overview
//!
//! - [`protocol`] is the line-framed JSON message set a worker process and
//!   the coordinator speak to each other.
//! - [`worker`] owns one worker process's lifetime: spawning it, writing
//!   protocol messages, and surfacing the lines it emits.
//! - [`tree`] builds a prefix tree out of a flat list of test identifiers and
//!   selects "maximal under-the-limit" subtrees.
//! - [`plan`] packs those subtrees into [`plan::Batch`]es bounded by a
//!   per-batch test count.
//! - [`executor`] runs one batch through a worker with wall-clock and
//!   idle-output guards and classifies the result.
//! - [`scheduler`] is the isolation scheduler: it owns the queue and
//!   concurrency semaphore, dispatches batches to the executor, and recurses
//!   into a hung batch until every hanging test is isolated.
//! - [`aggregate`] merges per-batch outcomes into one [`aggregate::RunResult`].
//! - [`results`] defines the result-file directory seam: a per-batch hang
//!   artefact scan this crate performs itself, plus the [`results::ResultFileReader`]
//!   and [`results::HistorySink`] traits an embedder implements.
//!
//! This crate does not ship a command-line interface, a history store,
//! terminal rendering, a result-file (XML) parser, or a framework-specific
//! discovery/execution adapter — those are external collaborators that
//! consume the types and traits defined here. It also doesn't install a
//! `tracing` subscriber; the embedding binary does that.
//!
//! # Example
//!
//! ```no_run
//! use hangwarden::config::RunnerConfig;
//! use hangwarden::executor::WorkerSpawnSpec;
//! use hangwarden::scheduler;
//! use hangwarden::signal::CancellationToken;
//!
//! # async fn run() {
//! let spawn = WorkerSpawnSpec {
//!     program: "hangwarden-worker".to_string(),
//!     args: vec![],
//!     assembly: "MyTests.dll".to_string(),
//!     result_dir_root: None,
//! };
//! let result = scheduler::run_with_worker(
//!     ["MyNamespace.MyClass.MyTest"],
//!     spawn,
//!     RunnerConfig::default(),
//!     CancellationToken::new(),
//! )
//! .await
//! .expect("identifier list was non-empty");
//! println!("{} passed, {} isolated as hanging", result.passed.len(), result.isolated_hanging.len());
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod errors;
pub mod executor;
pub mod filter;
pub mod idset;
pub mod plan;
pub mod protocol;
pub mod results;
pub mod scheduler;
pub mod signal;
pub mod time;
pub mod tree;
pub mod worker;
