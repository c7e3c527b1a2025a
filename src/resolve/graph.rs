// src/resolve/graph.rs

//! Dependency graph construction
//!
//! [`DependencyGraphBuilder`] computes the closure of a set of root formulas
//! breadth-first, resolving each newly discovered name exactly once with a
//! single global option selection. One name therefore always maps to one
//! [`ResolvedNode`].
//!
//! Edges point from a dependent to its dependency:
//!
//! ```text
//! openssh --> openssl --> zlib
//!        \--> ldns
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::formula::FormulaLookup;
use crate::resolve::options::{OptionResolver, OptionSelection, ResolveIntent, ResolvedNode};

/// Placeholder used as `required_by` for a missing root
pub const ROOT_REQUESTER: &str = "<root>";

/// Resolved nodes and the edges between them
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    nodes: BTreeMap<String, ResolvedNode>,
    /// Key: node name, Value: names it depends on
    edges: BTreeMap<String, BTreeSet<String>>,
    /// Key: node name, Value: names that depend on it
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
    roots: Vec<String>,
}

impl BuildGraph {
    pub(crate) fn insert(&mut self, node: ResolvedNode) {
        let name = node.name().to_string();

        self.edges.entry(name.clone()).or_default();
        self.reverse_edges.entry(name.clone()).or_default();

        for dep in node.dependencies().keys() {
            self.edges
                .entry(name.clone())
                .or_default()
                .insert(dep.clone());
            self.reverse_edges
                .entry(dep.clone())
                .or_default()
                .insert(name.clone());
        }

        self.nodes.insert(name, node);
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn node(&self, name: &str) -> Option<&ResolvedNode> {
        self.nodes.get(name)
    }

    /// All nodes in lexicographic order
    pub fn nodes(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.nodes.values()
    }

    /// Requested roots, in request order
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Direct dependencies of `name`
    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(name)
    }

    /// Nodes that directly depend on `name`
    pub fn dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.reverse_edges.get(name)
    }

    /// Everything `name` depends on, directly or not
    pub fn transitive_dependencies(&self, name: &str) -> BTreeSet<String> {
        Self::walk(&self.edges, name)
    }

    /// Everything that depends on `name`, directly or not
    pub fn transitive_dependents(&self, name: &str) -> BTreeSet<String> {
        Self::walk(&self.reverse_edges, name)
    }

    fn walk(adjacency: &BTreeMap<String, BTreeSet<String>>, start: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();

        if let Some(direct) = adjacency.get(start) {
            queue.extend(direct.iter().map(String::as_str));
        }

        while let Some(next) = queue.pop_front() {
            if seen.insert(next.to_string())
                && let Some(more) = adjacency.get(next)
            {
                queue.extend(more.iter().filter(|n| !seen.contains(*n)).map(String::as_str));
            }
        }

        seen
    }
}

/// Builds the dependency closure of a set of roots
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyGraphBuilder {
    resolver: OptionResolver,
}

impl DependencyGraphBuilder {
    pub fn new(intent: ResolveIntent) -> Self {
        Self {
            resolver: OptionResolver::new(intent),
        }
    }

    /// Resolve `roots` and everything they reach
    ///
    /// Fails with `MissingFormula` when a referenced name is absent from
    /// `lookup`, naming the formula that required it.
    pub fn build<L>(
        &self,
        roots: &[&str],
        selected_options: &OptionSelection,
        lookup: &L,
    ) -> Result<BuildGraph>
    where
        L: FormulaLookup + ?Sized,
    {
        info!("Resolving dependency graph for {} root(s)", roots.len());

        let mut graph = BuildGraph::default();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<(String, String)> = VecDeque::new();

        for root in roots {
            if seen.insert(root.to_string()) {
                graph.roots.push(root.to_string());
                queue.push_back((root.to_string(), ROOT_REQUESTER.to_string()));
            }
        }

        while let Some((name, required_by)) = queue.pop_front() {
            let formula = lookup.get(&name).ok_or_else(|| Error::MissingFormula {
                name: name.clone(),
                required_by: required_by.clone(),
            })?;

            if formula.name() != name {
                return Err(Error::invalid_formula(
                    &name,
                    format!("lookup returned formula '{}'", formula.name()),
                ));
            }

            let node = self.resolver.resolve(&formula, selected_options);
            for target in node.dependencies().keys() {
                if seen.insert(target.clone()) {
                    debug!("Discovered {} (required by {})", target, name);
                    queue.push_back((target.clone(), name.clone()));
                }
            }

            graph.insert(node);
        }

        info!("Resolved {} formulas", graph.len());
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::formula::{DependencyKind, Formula, MemoryRegistry};
    use std::sync::Arc;

    const CHECKSUM: &str =
        "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

    fn formula(name: &str, deps: &[&str]) -> Formula {
        deps.iter()
            .fold(
                Formula::builder(name, "1.0").source(format!("{name}.tar.gz"), CHECKSUM),
                |b, dep| b.depends_on(*dep, DependencyKind::Required),
            )
            .build()
            .unwrap()
    }

    fn no_options() -> OptionSelection {
        OptionSelection::new()
    }

    #[test]
    fn test_closure_from_root() {
        let registry: MemoryRegistry = [
            formula("a", &[]),
            formula("b", &["a"]),
            formula("c", &["b", "a"]),
            formula("unrelated", &[]),
        ]
        .into_iter()
        .collect();

        let graph = DependencyGraphBuilder::default()
            .build(&["c"], &no_options(), &registry)
            .unwrap();

        assert_eq!(graph.len(), 3);
        assert!(!graph.contains("unrelated"));
        assert_eq!(graph.roots(), ["c".to_string()]);
        assert!(graph.dependencies("c").unwrap().contains("b"));
        assert!(graph.dependents("a").unwrap().contains("b"));
    }

    #[test]
    fn test_transitive_queries() {
        let registry: MemoryRegistry = [
            formula("zlib", &[]),
            formula("openssl", &["zlib"]),
            formula("openssh", &["openssl"]),
        ]
        .into_iter()
        .collect();

        let graph = DependencyGraphBuilder::default()
            .build(&["openssh"], &no_options(), &registry)
            .unwrap();

        let deps = graph.transitive_dependencies("openssh");
        assert!(deps.contains("openssl"));
        assert!(deps.contains("zlib"));

        let dependents = graph.transitive_dependents("zlib");
        assert_eq!(dependents.len(), 2);
    }

    #[test]
    fn test_missing_dependency_names_requester() {
        let registry: MemoryRegistry = [formula("b", &["a"])].into_iter().collect();

        let err = DependencyGraphBuilder::default()
            .build(&["b"], &no_options(), &registry)
            .unwrap_err();

        match err {
            Error::MissingFormula { name, required_by } => {
                assert_eq!(name, "a");
                assert_eq!(required_by, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_root() {
        let err = DependencyGraphBuilder::default()
            .build(&["nope"], &no_options(), &MemoryRegistry::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingFormula);
        assert!(err.to_string().contains(ROOT_REQUESTER));
    }

    #[test]
    fn test_cycle_is_built_not_rejected() {
        let registry: MemoryRegistry = [formula("a", &["b"]), formula("b", &["a"])]
            .into_iter()
            .collect();

        let graph = DependencyGraphBuilder::default()
            .build(&["a"], &no_options(), &registry)
            .unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.transitive_dependencies("a").contains("a"));
    }

    #[test]
    fn test_duplicate_roots_collapse() {
        let registry: MemoryRegistry = [formula("a", &[])].into_iter().collect();
        let graph = DependencyGraphBuilder::default()
            .build(&["a", "a"], &no_options(), &registry)
            .unwrap();
        assert_eq!(graph.roots().len(), 1);
    }

    struct Mislabeled(Arc<Formula>);

    impl FormulaLookup for Mislabeled {
        fn get(&self, _name: &str) -> Option<Arc<Formula>> {
            Some(Arc::clone(&self.0))
        }
    }

    #[test]
    fn test_lookup_name_mismatch() {
        let lookup = Mislabeled(Arc::new(formula("other", &[])));
        let err = DependencyGraphBuilder::default()
            .build(&["wanted"], &no_options(), &lookup)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFormula);
    }
}
