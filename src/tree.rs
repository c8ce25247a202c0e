// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test prefix tree (design document §4.C).
//!
//! Built once per scheduling phase from a flat list of fully-qualified test
//! identifiers, never mutated afterwards: a plain, serde-free in-memory
//! structure with deterministic, case-insensitive, lexicographically
//! ordered children.

use std::collections::BTreeMap;

/// Strips a trailing parenthesized parameter suffix from a raw identifier,
/// e.g. `A.B.Method(42, "x")` -> `A.B.Method`. Returns the input unchanged
/// if there is no such suffix.
fn strip_parametric_suffix(raw: &str) -> &str {
    if raw.ends_with(')') {
        if let Some(idx) = raw.find('(') {
            return &raw[..idx];
        }
    }
    raw
}

/// Splits a stripped identifier into the path segments used to place it in
/// the tree: dotted segments, with the final segment further split on `_`.
fn path_segments(stripped: &str) -> Vec<&str> {
    let mut dotted: Vec<&str> = stripped.split('.').filter(|s| !s.is_empty()).collect();
    if let Some(last) = dotted.pop() {
        let mut underscored: Vec<&str> = last.split('_').filter(|s| !s.is_empty()).collect();
        dotted.append(&mut underscored);
    }
    dotted
}

/// A single node in the prefix tree.
#[derive(Debug)]
pub struct Node {
    /// This node's own name segment, in its first-seen casing.
    pub name: String,
    /// The dotted path from the root to this node. Empty at the root.
    pub full_path: String,
    /// Children keyed by lowercased segment, iterated lexicographically.
    children: BTreeMap<String, Node>,
    /// Raw identifiers (with any parametric suffix preserved) that
    /// terminate exactly at this node, in insertion order.
    direct: Vec<String>,
    /// `direct.len() + sum(child.total for child in children)`.
    total: usize,
}

impl Node {
    fn new(name: String, full_path: String) -> Self {
        Self {
            name,
            full_path,
            children: BTreeMap::new(),
            direct: Vec::new(),
            total: 0,
        }
    }

    /// Number of leaf tests in this node's subtree.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Identifiers that terminate exactly at this node (not descendants).
    pub fn direct(&self) -> &[String] {
        &self.direct
    }

    /// Children of this node, in lexicographic (case-insensitive) order.
    pub fn children(&self) -> impl Iterator<Item = &Node> {
        self.children.values()
    }

    /// Enumerates every identifier in this node's subtree. Direct tests of
    /// a node come before its children's tests; within that, insertion
    /// order is preserved for direct tests and lexicographic child order is
    /// used to walk the rest of the subtree.
    pub fn all_tests(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.total);
        self.collect_tests(&mut out);
        out
    }

    fn collect_tests(&self, out: &mut Vec<String>) {
        out.extend(self.direct.iter().cloned());
        for child in self.children.values() {
            child.collect_tests(out);
        }
    }

    fn child(&self, key: &str) -> Option<&Node> {
        self.children.get(&key.to_ascii_lowercase())
    }
}

/// The test prefix tree: a hierarchy built from a flat identifier list,
/// immutable once constructed.
#[derive(Debug)]
pub struct Tree {
    root: Node,
}

impl Tree {
    /// Builds a tree from a flat list of raw (possibly parametric) test
    /// identifiers. Order of `identifiers` determines each node's insertion
    /// order for [`Node::all_tests`].
    ///
    /// Identifiers are deliberately accepted even if the list is empty: an
    /// empty tree has `root.total() == 0` and no eligible batches, which the
    /// planner treats as "nothing to run" rather than an error. Catastrophic
    /// validation (e.g. refusing an empty run entirely) is the scheduler's
    /// caller's decision, not this constructor's.
    pub fn build<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut root = Node::new(String::new(), String::new());
        for raw in identifiers {
            let raw = raw.as_ref();
            let stripped = strip_parametric_suffix(raw);
            let segments = path_segments(stripped);
            insert(&mut root, &segments, raw);
        }
        Self { root }
    }

    /// The root node. Its `full_path` is always empty.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Looks up a node by its dotted full path, case-insensitively. An
    /// empty path resolves to the root.
    pub fn find(&self, path: &str) -> Option<&Node> {
        if path.is_empty() {
            return Some(&self.root);
        }
        let mut current = &self.root;
        for segment in path.split('.') {
            current = current.child(segment)?;
        }
        Some(current)
    }
}

fn insert<'a>(node: &mut Node, segments: &[&'a str], raw: &str) {
    node.total += 1;
    match segments.split_first() {
        None => node.direct.push(raw.to_string()),
        Some((head, rest)) => {
            let key = head.to_ascii_lowercase();
            let full_path = if node.full_path.is_empty() {
                (*head).to_string()
            } else {
                format!("{}.{}", node.full_path, head)
            };
            let child = node
                .children
                .entry(key)
                .or_insert_with(|| Node::new((*head).to_string(), full_path));
            insert(child, rest, raw);
        }
    }
}

/// Selects the "maximal under-the-limit" nodes used by the batch planner
/// (design document §4.C): starting at the root, descend, selecting a node
/// when its total fits under `max_tests_per_batch` and its parent did not
/// (the root counts as having an over-limit parent, so a tree that fits in
/// one batch selects the root itself).
///
/// If no node qualifies — only possible when a single leaf's test count
/// already exceeds the limit, e.g. one parametrized method producing more
/// cases than the ceiling — falls back to chunking that leaf's direct tests
/// into groups of at most `max_tests_per_batch`, returned as synthetic
/// selections sharing the leaf's path.
pub fn select_maximal_under_limit<'a>(tree: &'a Tree, max_tests_per_batch: usize) -> Vec<Selection<'a>> {
    let mut out = Vec::new();
    select(tree.root(), true, max_tests_per_batch, &mut out);
    if out.is_empty() && tree.root().total() > 0 {
        collect_oversized_leaf_chunks(tree.root(), max_tests_per_batch, &mut out);
    }
    out
}

/// One selected node (or, in the fallback case, a chunk of one
/// over-the-limit leaf's tests).
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    /// The full dotted path used to build the filter prefix for this
    /// selection.
    pub full_path: &'a str,
    /// The identifiers belonging to this selection.
    pub tests: SelectionTests<'a>,
}

/// Either "every test in this node's subtree" (the common case) or an
/// explicit chunk of a single oversized leaf's tests (the fallback case).
#[derive(Debug, Clone)]
pub enum SelectionTests<'a> {
    /// All tests under the selected node.
    Subtree(&'a Node),
    /// An explicit, already-bounded chunk of tests.
    Chunk(Vec<String>),
}

impl<'a> Selection<'a> {
    /// Number of tests in this selection.
    pub fn len(&self) -> usize {
        match &self.tests {
            SelectionTests::Subtree(node) => node.total(),
            SelectionTests::Chunk(tests) => tests.len(),
        }
    }

    /// Whether this selection is empty. Selections are never empty in
    /// practice (a node is only produced by [`select`] when it has at least
    /// one test), but this satisfies the common `is_empty` convention.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materializes the identifiers in this selection.
    pub fn tests(&self) -> Vec<String> {
        match &self.tests {
            SelectionTests::Subtree(node) => node.all_tests(),
            SelectionTests::Chunk(tests) => tests.clone(),
        }
    }
}

fn select<'a>(node: &'a Node, parent_over_limit: bool, max: usize, out: &mut Vec<Selection<'a>>) {
    if node.total() == 0 {
        return;
    }
    if parent_over_limit && node.total() <= max {
        out.push(Selection {
            full_path: &node.full_path,
            tests: SelectionTests::Subtree(node),
        });
        return;
    }
    let over = node.total() > max;
    for child in node.children() {
        select(child, over, max, out);
    }
}

fn collect_oversized_leaf_chunks<'a>(node: &'a Node, max: usize, out: &mut Vec<Selection<'a>>) {
    if node.children().next().is_none() {
        // A leaf whose own total still exceeds the limit: split its direct
        // tests into bounded chunks.
        for chunk in node.direct().chunks(max.max(1)) {
            out.push(Selection {
                full_path: &node.full_path,
                tests: SelectionTests::Chunk(chunk.to_vec()),
            });
        }
        return;
    }
    for child in node.children() {
        collect_oversized_leaf_chunks(child, max, out);
    }
}

/// Builds a fresh sub-tree from an explicit set of identifiers, used by the
/// drill-down step of the isolation scheduler to re-plan a hung batch's
/// unresolved tests. Reuses the same construction rules as [`Tree::build`].
pub fn rebuild_from<I, S>(identifiers: I) -> Tree
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Tree::build(identifiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn strips_parametric_suffix() {
        assert_eq!(strip_parametric_suffix("A.B.Method(1, 2)"), "A.B.Method");
        assert_eq!(strip_parametric_suffix("A.B.Method"), "A.B.Method");
    }

    #[test]
    fn splits_dotted_and_underscored() {
        assert_eq!(
            path_segments("A.B.C.Method_WhenX_ThenY"),
            vec!["A", "B", "C", "Method", "WhenX", "ThenY"]
        );
    }

    #[test]
    fn total_equals_direct_plus_children() {
        let tree = Tree::build(["A.B.T1", "A.B.T2", "A.C.T3"]);
        let root = tree.root();
        assert_eq!(root.total(), 3);
        let a = tree.find("A").unwrap();
        assert_eq!(a.total(), 3);
        let b = tree.find("A.B").unwrap();
        assert_eq!(b.total(), 2);
        let c = tree.find("A.C").unwrap();
        assert_eq!(c.total(), 1);
        fn check_invariant(node: &Node) {
            let children_total: usize = node.children().map(Node::total).sum();
            assert_eq!(node.total(), node.direct().len() + children_total);
            for child in node.children() {
                check_invariant(child);
            }
        }
        check_invariant(root);
    }

    #[test]
    fn find_is_case_insensitive() {
        let tree = Tree::build(["Foo.Bar.Baz"]);
        assert!(tree.find("foo.BAR.baz").is_some());
        assert_eq!(tree.find("foo.bar.baz").unwrap().full_path, "Foo.Bar.Baz");
    }

    #[test]
    fn find_empty_path_is_root() {
        let tree = Tree::build(["A.B"]);
        assert_eq!(tree.find("").unwrap().total(), 1);
    }

    #[test]
    fn all_tests_covers_every_identifier() {
        let ids = ["A.B.T1", "A.B.T2", "A.C.T3", "D.T4"];
        let tree = Tree::build(ids);
        let mut got = tree.root().all_tests();
        got.sort();
        let mut want: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        want.sort();
        assert_eq!(got, want);
    }

    #[test]
    fn selection_picks_root_when_whole_tree_fits() {
        let tree = Tree::build(["A.T1", "A.T2"]);
        let sel = select_maximal_under_limit(&tree, 100);
        assert_eq!(sel.len(), 1);
        assert_eq!(sel[0].full_path, "");
        assert_eq!(sel[0].len(), 2);
    }

    #[test]
    fn selection_descends_when_root_is_over_limit() {
        let ids: Vec<String> = (0..10).map(|i| format!("A.T{i}")).collect();
        let tree = Tree::build(ids.iter().map(String::as_str));
        let sel = select_maximal_under_limit(&tree, 5);
        // Root has 10 > 5, so we must descend; "A" also has 10 > 5, so we
        // descend further to each individual test node.
        let total: usize = sel.iter().map(Selection::len).sum();
        assert_eq!(total, 10);
        assert!(sel.iter().all(|s| s.len() <= 5));
    }

    #[test]
    fn selection_falls_back_to_chunking_oversized_leaf() {
        let ids: Vec<String> = (0..7).map(|i| format!("A.Method({i})")).collect();
        let tree = Tree::build(ids.iter().map(String::as_str));
        // All 7 parametric cases collapse to a single leaf node "A.Method".
        let sel = select_maximal_under_limit(&tree, 3);
        let total: usize = sel.iter().map(Selection::len).sum();
        assert_eq!(total, 7);
        assert!(sel.iter().all(|s| s.len() <= 3));
        assert!(sel.len() >= 3);
    }
}
