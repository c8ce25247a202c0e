// SPDX-License-Identifier: MIT OR Apache-2.0

//! A small case-insensitive, insertion-ordered identifier set.
//!
//! Test identifiers are compared case-insensitively throughout the design
//! document (tree placement, aggregation dedup) but original casing is
//! always preserved for reporting. This is the one reusable primitive that
//! need, so it lives in its own module rather than being reimplemented in
//! `executor` and `aggregate`.

use indexmap::IndexMap;

/// A set of test identifiers, keyed case-insensitively, preserving the
/// first-seen casing and insertion order for iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet {
    by_key: IndexMap<String, String>,
}

impl IdSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `id`, keeping the first-seen casing if it was already
    /// present. Returns `true` if this was a new entry.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        let key = id.to_ascii_lowercase();
        if self.by_key.contains_key(&key) {
            false
        } else {
            self.by_key.insert(key, id);
            true
        }
    }

    /// Removes `id`, if present, case-insensitively.
    pub fn remove(&mut self, id: &str) -> bool {
        self.by_key.shift_remove(&id.to_ascii_lowercase()).is_some()
    }

    /// Whether `id` is a member, case-insensitively.
    pub fn contains(&self, id: &str) -> bool {
        self.by_key.contains_key(&id.to_ascii_lowercase())
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Iterates members in insertion order, in their first-seen casing.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.by_key.values().map(String::as_str)
    }

    /// Builds a set from an iterator of identifiers.
    pub fn from_iter_ids<I: IntoIterator<Item = S>, S: Into<String>>(ids: I) -> Self {
        let mut set = Self::new();
        for id in ids {
            set.insert(id);
        }
        set
    }

    /// Returns whether this set and `other` share no members.
    pub fn is_disjoint(&self, other: &IdSet) -> bool {
        self.iter().all(|id| !other.contains(id))
    }
}

/// Applies the design document's precedence rule (§4.G) so the three
/// classification sets end up pairwise disjoint: `passed` overrides
/// `failed` and `timed_out`; `failed` overrides `timed_out`.
///
/// Shared between the batch executor (which must resolve overlaps within
/// one batch) and the aggregator (which resolves them across batches).
pub fn resolve_precedence(passed: &mut IdSet, failed: &mut IdSet, timed_out: &mut IdSet) {
    for id in passed.iter().map(str::to_string).collect::<Vec<_>>() {
        failed.remove(&id);
        timed_out.remove(&id);
    }
    for id in failed.iter().map(str::to_string).collect::<Vec<_>>() {
        timed_out.remove(&id);
    }
}

impl FromIterator<String> for IdSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self::from_iter_ids(iter)
    }
}

impl<'a> IntoIterator for &'a IdSet {
    type Item = &'a str;
    type IntoIter = Box<dyn Iterator<Item = &'a str> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_dedupes_case_insensitively() {
        let mut set = IdSet::new();
        assert!(set.insert("A.B.T1"));
        assert!(!set.insert("a.b.t1"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["A.B.T1"]);
    }

    #[test]
    fn disjointness() {
        let a = IdSet::from_iter_ids(["X", "Y"]);
        let b = IdSet::from_iter_ids(["Z"]);
        assert!(a.is_disjoint(&b));
        let c = IdSet::from_iter_ids(["y"]);
        assert!(!a.is_disjoint(&c));
    }
}
