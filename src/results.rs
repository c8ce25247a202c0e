// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result-file directory: the one piece of design document §6's
//! "external interfaces" this crate partially owns.
//!
//! A fresh temporary directory is created per batch and handed to the
//! worker's underlying test engine via a well-known configuration knob (an
//! extra argument on [`crate::executor::WorkerSpawnSpec`]); after the batch
//! finishes, the coordinator scans it for hang artefacts itself (that part
//! is *not* delegated — §6 is explicit that `Sequence_*.xml` and
//! `*_hangdump*` files "indicate a hang was observed out-of-band"). Turning
//! the directory's result files into passed/failed/timed-out identifier
//! sets, by contrast, is delegated entirely to a [`ResultFileReader`]
//! implementation the crate doesn't ship (XML parsing is out of scope per
//! §1).

use crate::aggregate::RunResult;
use crate::idset::IdSet;
use aho_corasick::AhoCorasick;
use camino::Utf8Path;
use std::io;
use std::sync::OnceLock;

/// The three identifier sets an external result-file parser resolves a
/// batch's temporary directory into.
#[derive(Debug, Clone, Default)]
pub struct ResultSets {
    /// Tests the result file(s) reported as passed.
    pub passed: IdSet,
    /// Tests the result file(s) reported as failed.
    pub failed: IdSet,
    /// Tests the result file(s) reported as timed out.
    pub timed_out: IdSet,
}

/// An external collaborator that turns one batch's result-file directory
/// into identifier sets. The coordinator relies only on the sets this
/// returns; it does not define or validate the result-file format itself
/// (design document §6).
///
/// No implementation ships in this crate: the worker's underlying engine
/// (xUnit, NUnit, VSTest, ...) each has its own result-file dialect, and
/// parsing it is explicitly out of scope (design document §1).
pub trait ResultFileReader: Send + Sync {
    /// Reads every result file under `dir` and returns the identifiers it
    /// found, partitioned by outcome.
    fn read(&self, dir: &Utf8Path) -> io::Result<ResultSets>;
}

/// An external collaborator that persists a finished [`RunResult`] to the
/// history store (design document §1, "Deliberately out of scope"). This
/// crate never mutates a `RunResult` after [`crate::aggregate::finalize`]
/// produces it; a `HistorySink` is the seam an embedder hangs its own
/// storage off of.
///
/// No implementation ships in this crate.
pub trait HistorySink: Send + Sync {
    /// Records `result`, however the embedder's history store sees fit.
    fn record(&self, result: &RunResult);
}

fn hang_artefact_matcher() -> &'static AhoCorasick {
    static MATCHER: OnceLock<AhoCorasick> = OnceLock::new();
    MATCHER.get_or_init(|| {
        AhoCorasick::new(["Sequence_", "_hangdump"]).expect("static pattern list always builds")
    })
}

/// Scans `dir` for the hang-artefact filenames design document §6 names
/// explicitly: a `Sequence_*.xml` file (VSTest's execution-sequence trace,
/// written whether or not a hang was formally detected) or any file whose
/// name contains `_hangdump` (a process-dump artefact left behind by a
/// blame-hang collector). Either one's presence means "a hang was observed
/// out-of-band", independent of whatever the worker itself reported.
///
/// Returns `Ok(false)` if `dir` doesn't exist — a batch whose worker never
/// got far enough to create its result directory didn't leave hang
/// artefacts behind either.
pub fn hang_artefacts_present(dir: &Utf8Path) -> io::Result<bool> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(error) => return Err(error),
    };
    let matcher = hang_artefact_matcher();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        for mat in matcher.find_iter(name) {
            let pattern = mat.pattern().as_usize();
            // Pattern 0 is "Sequence_"; only count it if the file also ends
            // in `.xml`, matching the literal `Sequence_*.xml` glob from the
            // design document rather than any file merely containing the
            // word.
            if pattern == 0 {
                if name.ends_with(".xml") {
                    return Ok(true);
                }
            } else {
                return Ok(true);
            }
        }
    }
    Ok(false)
}
