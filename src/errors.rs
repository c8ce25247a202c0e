// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by hangwarden.
//!
//! Following the propagation policy: most failures are local to a single
//! batch and are folded into a [`crate::aggregate::BatchOutcome`] rather than
//! returned as an `Err`. The error types here are reserved for catastrophic
//! failures the scheduler cannot recover from on its own.

use std::io;
use thiserror::Error;

/// Error returned when the worker binary cannot be launched at all.
#[derive(Debug, Error)]
#[error("failed to spawn worker process `{program}`")]
#[non_exhaustive]
pub struct WorkerSpawnError {
    pub(crate) program: String,
    #[source]
    pub(crate) source: io::Error,
}

impl WorkerSpawnError {
    pub(crate) fn new(program: impl Into<String>, source: io::Error) -> Self {
        Self {
            program: program.into(),
            source,
        }
    }
}

/// Error surfaced by the worker adapter's `discover` operation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The worker reported that it couldn't find a test framework adapter
    /// for the assembly.
    #[error("no test framework detected for assembly `{assembly}`")]
    NoFrameworkDetected {
        /// Path to the assembly that was probed.
        assembly: String,
    },
    /// The worker reported a generic discovery failure.
    #[error("discovery failed for assembly `{assembly}`: {message}")]
    DiscoveryFailed {
        /// Path to the assembly that was probed.
        assembly: String,
        /// Message from the worker's `error` event.
        message: String,
    },
    /// The worker process exited before completing discovery.
    #[error("worker exited during discovery of `{assembly}` without reporting results")]
    WorkerExited {
        /// Path to the assembly that was probed.
        assembly: String,
    },
}

/// Error returned when the scheduler cannot even build the initial prefix
/// tree, e.g. because the identifier list is empty.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TreeBuildError {
    /// No identifiers were supplied to build a tree from.
    #[error("cannot build a test tree from an empty identifier list")]
    EmptyIdentifierList,
}

/// Error returned by the filter language builder when a pattern cannot be
/// represented (the empty string, which would match everything and defeat
/// the purpose of a filter).
#[derive(Debug, Error)]
#[error("filter prefix must not be empty")]
#[non_exhaustive]
pub struct EmptyFilterPrefixError;
