// SPDX-License-Identifier: MIT OR Apache-2.0

//! The batch planner (design document §4.D).
//!
//! Packs the tree's maximal-under-limit nodes into batches bounded by
//! `max_tests_per_batch`, in child-name order, combining small sibling
//! subtrees to keep the number of worker launches down without ever letting
//! a batch exceed the ceiling (outside the depth>0 singleton exception,
//! which a batch of exactly 1 test trivially satisfies anyway).

use crate::tree::{select_maximal_under_limit, Tree};
use std::fmt::Write as _;

/// A scheduler-addressable unit of work: a list of tests passed to one
/// worker invocation behind a single filter.
#[derive(Debug, Clone)]
pub struct Batch {
    /// A human-readable label, e.g. `"batch-1 (A, B)"`.
    pub label: String,
    /// The test identifiers in this batch, in tree insertion order.
    pub tests: Vec<String>,
    /// The ancestor full-paths used to build an OR filter against the
    /// worker, de-duplicated.
    pub filter_prefixes: Vec<String>,
    /// Recursion depth: 0 for the initial plan, N+1 for a drill-down
    /// re-plan of a hung batch's unresolved tests.
    pub depth: usize,
}

impl Batch {
    /// `0 < tests.len() <= max_tests_per_batch`, unless `depth > 0`, in
    /// which case a singleton batch is also allowed (trivially satisfied,
    /// since a singleton's length is 1).
    pub fn respects_ceiling(&self, max_tests_per_batch: usize) -> bool {
        !self.tests.is_empty()
            && (self.tests.len() <= max_tests_per_batch || (self.depth > 0 && self.tests.len() == 1))
    }
}

/// Plans an ordered list of batches from `tree`, bounded by
/// `max_tests_per_batch`, tagged with the given recursion `depth`.
pub fn plan_batches(tree: &Tree, max_tests_per_batch: usize, depth: usize) -> Vec<Batch> {
    let max = max_tests_per_batch.max(1);
    let selections = select_maximal_under_limit(tree, max);

    let mut batches = Vec::new();
    let mut current_paths: Vec<&str> = Vec::new();
    let mut current_tests: Vec<String> = Vec::new();

    for selection in &selections {
        let would_be = current_tests.len() + selection.len();
        if !current_tests.is_empty() && would_be > max {
            batches.push(finish_batch(
                std::mem::take(&mut current_paths),
                std::mem::take(&mut current_tests),
                depth,
                batches.len(),
            ));
        }
        current_paths.push(selection.full_path);
        current_tests.extend(selection.tests());
    }
    if !current_tests.is_empty() {
        batches.push(finish_batch(current_paths, current_tests, depth, batches.len()));
    }
    batches
}

fn finish_batch(paths: Vec<&str>, tests: Vec<String>, depth: usize, index: usize) -> Batch {
    let mut filter_prefixes: Vec<String> = Vec::new();
    for path in paths {
        let owned = path.to_string();
        if !filter_prefixes.iter().any(|p: &String| p.eq_ignore_ascii_case(&owned)) {
            filter_prefixes.push(owned);
        }
    }

    let mut label = format!("batch-{}", index + 1);
    if depth > 0 {
        let _ = write!(label, "@d{depth}");
    }
    if !filter_prefixes.is_empty() {
        let shown: Vec<&str> = filter_prefixes
            .iter()
            .take(3)
            .map(|s| if s.is_empty() { "<root>" } else { s.as_str() })
            .collect();
        let _ = write!(label, " ({})", shown.join(", "));
        if filter_prefixes.len() > 3 {
            let _ = write!(label, ", +{}", filter_prefixes.len() - 3);
        }
    }

    Batch {
        label,
        tests,
        filter_prefixes,
        depth,
    }
}
