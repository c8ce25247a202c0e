// SPDX-License-Identifier: MIT OR Apache-2.0

//! The filter language consumed by the downstream test runner inside a
//! worker (design document §6): a substring match against the
//! fully-qualified name, clauses joined with `OR`, with parentheses in a
//! value escaped with `\`.
//!
//! This crate does not send the filter string over the coordinator↔worker
//! protocol itself (the `run` message carries an explicit `tests` list
//! instead); `build_filter` exists for embedders whose worker-side engine
//! expects a filter expression rather than, or in addition to, an explicit
//! identifier list — e.g. to pass through the same well-known configuration
//! knob the worker's underlying engine already understands.

use crate::errors::EmptyFilterPrefixError;

/// Escapes parentheses in a filter value with a backslash.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '(' || ch == ')' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Builds an `OR` filter expression from a set of name-contains prefixes,
/// e.g. `["A.B", "A.C"]` -> `"Name~A.B|Name~A.C"`.
///
/// Returns an error if `prefixes` is empty, or contains an empty string:
/// either would match every test, silently defeating the point of scoping a
/// batch.
pub fn build_filter<I, S>(prefixes: I) -> Result<String, EmptyFilterPrefixError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let clauses: Vec<String> = prefixes
        .into_iter()
        .map(|p| {
            let p = p.as_ref();
            if p.is_empty() {
                Err(EmptyFilterPrefixError)
            } else {
                Ok(format!("Name~{}", escape(p)))
            }
        })
        .collect::<Result<_, _>>()?;
    if clauses.is_empty() {
        return Err(EmptyFilterPrefixError);
    }
    Ok(clauses.join("|"))
}
