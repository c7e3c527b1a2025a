// src/resolve/schedule.rs

//! Build ordering
//!
//! Kahn's algorithm, grouped into batches: batch 0 holds every node with no
//! dependencies, batch *k* holds the nodes whose last dependency was
//! scheduled in batch *k - 1*. Nodes within a batch are independent and are
//! sorted by name, so the plan is fully deterministic.
//!
//! When nodes remain after Kahn's algorithm stalls, the graph has a cycle.
//! The error carries the shortest one, e.g. `[a, b, a]`.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::resolve::graph::BuildGraph;
use crate::resolve::options::ResolvedNode;

/// Ordered batches of nodes ready for installation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
    batches: Vec<Vec<ResolvedNode>>,
}

impl BuildPlan {
    /// Wrap pre-computed batches without checking them; see [`BuildPlan::validate`]
    pub fn from_batches(batches: Vec<Vec<ResolvedNode>>) -> Self {
        Self { batches }
    }

    pub fn batches(&self) -> &[Vec<ResolvedNode>] {
        &self.batches
    }

    /// Total number of nodes
    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Nodes in execution order
    pub fn nodes(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.batches.iter().flatten()
    }

    /// Index of the batch containing `name`
    pub fn batch_index(&self, name: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.iter().any(|n| n.name() == name))
    }

    /// Names per batch, handy for logging and assertions
    pub fn names(&self) -> Vec<Vec<&str>> {
        self.batches
            .iter()
            .map(|batch| batch.iter().map(ResolvedNode::name).collect())
            .collect()
    }

    /// Check that every dependency sits in an earlier batch
    pub fn validate(&self) -> Result<()> {
        let mut placed: HashMap<&str, usize> = HashMap::new();
        for (index, batch) in self.batches.iter().enumerate() {
            for node in batch {
                if placed.insert(node.name(), index).is_some() {
                    return Err(Error::InvalidPlan(format!(
                        "'{}' appears more than once",
                        node.name()
                    )));
                }
            }
        }

        for (index, batch) in self.batches.iter().enumerate() {
            for node in batch {
                for dep in node.dependencies().keys() {
                    match placed.get(dep.as_str()) {
                        Some(&dep_index) if dep_index < index => {}
                        Some(&dep_index) => {
                            return Err(Error::InvalidPlan(format!(
                                "'{}' in batch {} depends on '{}' in batch {}",
                                node.name(),
                                index,
                                dep,
                                dep_index
                            )));
                        }
                        None => {
                            return Err(Error::InvalidPlan(format!(
                                "'{}' depends on '{}' which is not in the plan",
                                node.name(),
                                dep
                            )));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Orders a [`BuildGraph`] into a [`BuildPlan`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TopologicalScheduler;

impl TopologicalScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Group the graph into dependency-ordered batches
    pub fn schedule(&self, graph: &BuildGraph) -> Result<BuildPlan> {
        let mut in_degrees: BTreeMap<&str, usize> = graph
            .nodes()
            .map(|node| {
                let count = graph.dependencies(node.name()).map_or(0, BTreeSet::len);
                (node.name(), count)
            })
            .collect();

        let mut ready: BTreeSet<&str> = in_degrees
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut order: Vec<Vec<&str>> = Vec::new();

        while !ready.is_empty() {
            let batch: Vec<&str> = ready.iter().copied().collect();
            let mut next = BTreeSet::new();

            for name in &batch {
                in_degrees.remove(name);
                let Some(dependents) = graph.dependents(name) else {
                    continue;
                };
                for dependent in dependents {
                    if let Some(deg) = in_degrees.get_mut(dependent.as_str()) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            next.insert(dependent.as_str());
                        }
                    }
                }
            }

            debug!("Batch {}: {}", order.len(), batch.join(", "));
            order.push(batch);
            ready = next;
        }

        if !in_degrees.is_empty() {
            let remaining: BTreeSet<&str> = in_degrees.keys().copied().collect();
            let cycle = shortest_cycle(graph, &remaining);
            return Err(Error::CyclicDependency { cycle });
        }

        let batches = order
            .into_iter()
            .map(|names| {
                names
                    .into_iter()
                    .filter_map(|name| graph.node(name).cloned())
                    .collect()
            })
            .collect();

        let plan = BuildPlan { batches };
        info!(
            "Scheduled {} formulas in {} batches",
            plan.len(),
            plan.batch_count()
        );
        Ok(plan)
    }
}

/// Shortest closed walk among `remaining`, starting from the smallest name
/// that achieves the minimum length
fn shortest_cycle(graph: &BuildGraph, remaining: &BTreeSet<&str>) -> Vec<String> {
    let mut best: Option<Vec<String>> = None;

    for &start in remaining {
        let Some(path) = cycle_through(graph, remaining, start) else {
            continue;
        };
        if best.as_ref().is_none_or(|b| path.len() < b.len()) {
            best = Some(path);
        }
    }

    best.unwrap_or_else(|| remaining.iter().map(|s| s.to_string()).collect())
}

/// Breadth-first search from `start` back to itself
fn cycle_through(graph: &BuildGraph, remaining: &BTreeSet<&str>, start: &str) -> Option<Vec<String>> {
    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(start);

    while let Some(current) = queue.pop_front() {
        let Some(deps) = graph.dependencies(current) else {
            continue;
        };
        for dep in deps {
            let dep = dep.as_str();
            if !remaining.contains(dep) {
                continue;
            }
            if dep == start {
                let mut chain = Vec::new();
                let mut cursor = current;
                while cursor != start {
                    chain.push(cursor.to_string());
                    cursor = parent.get(cursor).copied().unwrap_or(start);
                }
                chain.reverse();

                let mut path = Vec::with_capacity(chain.len() + 2);
                path.push(start.to_string());
                path.extend(chain);
                path.push(start.to_string());
                return Some(path);
            }
            if !parent.contains_key(dep) {
                parent.insert(dep, current);
                queue.push_back(dep);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{DependencyKind, Formula};
    use crate::resolve::options::{OptionResolver, OptionSelection};
    use proptest::prelude::*;
    use std::sync::Arc;

    const CHECKSUM: &str =
        "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";

    fn graph_of(layout: &[(&str, &[&str])]) -> BuildGraph {
        let mut graph = BuildGraph::default();
        for (name, deps) in layout {
            let formula = deps
                .iter()
                .fold(
                    Formula::builder(*name, "1.0").source(format!("{name}.tar"), CHECKSUM),
                    |b, dep| b.depends_on(*dep, DependencyKind::Required),
                )
                .build()
                .unwrap();
            graph.insert(OptionResolver::default().resolve(&Arc::new(formula), &OptionSelection::new()));
        }
        graph
    }

    fn cycle_of(graph: &BuildGraph) -> Vec<String> {
        match TopologicalScheduler::new().schedule(graph) {
            Err(Error::CyclicDependency { cycle }) => cycle,
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_simple_chain() {
        let graph = graph_of(&[("a", &[]), ("b", &["a"])]);
        let plan = TopologicalScheduler::new().schedule(&graph).unwrap();
        assert_eq!(plan.names(), vec![vec!["a"], vec!["b"]]);
        plan.validate().unwrap();
    }

    #[test]
    fn test_batches_sorted_lexicographically() {
        let graph = graph_of(&[
            ("zlib", &[]),
            ("libedit", &[]),
            ("openssl", &["zlib"]),
            ("ldns", &["openssl"]),
            ("openssh", &["openssl", "ldns", "libedit"]),
        ]);
        let plan = TopologicalScheduler::new().schedule(&graph).unwrap();
        assert_eq!(
            plan.names(),
            vec![
                vec!["libedit", "zlib"],
                vec!["openssl"],
                vec!["ldns"],
                vec!["openssh"],
            ]
        );
        assert_eq!(plan.batch_index("ldns"), Some(2));
        assert_eq!(plan.len(), 5);
    }

    #[test]
    fn test_empty_graph() {
        let plan = TopologicalScheduler::new().schedule(&BuildGraph::default()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.batch_count(), 0);
    }

    #[test]
    fn test_two_node_cycle() {
        let graph = graph_of(&[("a", &["b"]), ("b", &["a"])]);
        assert_eq!(cycle_of(&graph), vec!["a", "b", "a"]);
    }

    #[test]
    fn test_shortest_cycle_chosen() {
        // a -> b -> c -> a and d -> e -> d, plus f depending on the long cycle
        let graph = graph_of(&[
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &["a"]),
            ("d", &["e"]),
            ("e", &["d"]),
            ("f", &["a"]),
        ]);
        assert_eq!(cycle_of(&graph), vec!["d", "e", "d"]);
    }

    #[test]
    fn test_three_node_cycle_order() {
        let graph = graph_of(&[("c", &["a"]), ("a", &["b"]), ("b", &["c"]), ("root", &["c"])]);
        assert_eq!(cycle_of(&graph), vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_validate_rejects_misordered_plan() {
        let graph = graph_of(&[("a", &[]), ("b", &["a"])]);
        let a = graph.node("a").unwrap().clone();
        let b = graph.node("b").unwrap().clone();

        let same_batch = BuildPlan::from_batches(vec![vec![a.clone(), b.clone()]]);
        assert!(matches!(same_batch.validate(), Err(Error::InvalidPlan(_))));

        let missing = BuildPlan::from_batches(vec![vec![b.clone()]]);
        assert!(missing.validate().is_err());

        let duplicated = BuildPlan::from_batches(vec![vec![a.clone()], vec![a, b]]);
        assert!(duplicated.validate().is_err());
    }

    // ============================================
    // Property-Based Tests
    // ============================================

    /// Random graphs over up to 10 nodes; `acyclic` restricts edges to
    /// lower-numbered nodes
    fn graph_strategy(acyclic: bool) -> impl Strategy<Value = BuildGraph> {
        (1usize..10)
            .prop_flat_map(|n| {
                (
                    Just(n),
                    proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n),
                )
            })
            .prop_map(move |(n, matrix)| {
                let names: Vec<String> = (0..n).map(|i| format!("n{i:02}")).collect();
                let layout: Vec<(String, Vec<String>)> = (0..n)
                    .map(|i| {
                        let deps = (0..n)
                            .filter(|&j| j != i && matrix[i][j] && (!acyclic || j < i))
                            .map(|j| names[j].clone())
                            .collect();
                        (names[i].clone(), deps)
                    })
                    .collect();

                let mut graph = BuildGraph::default();
                for (name, deps) in &layout {
                    let formula = deps
                        .iter()
                        .fold(
                            Formula::builder(name.clone(), "1").source("x.tar", CHECKSUM),
                            |b, dep| b.depends_on(dep.clone(), DependencyKind::Required),
                        )
                        .build()
                        .unwrap();
                    graph.insert(
                        OptionResolver::default()
                            .resolve(&Arc::new(formula), &OptionSelection::new()),
                    );
                }
                graph
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every node lands in exactly one batch, after all its dependencies
        #[test]
        fn prop_acyclic_graphs_schedule(graph in graph_strategy(true)) {
            let plan = TopologicalScheduler::new().schedule(&graph).unwrap();
            prop_assert_eq!(plan.len(), graph.len());
            prop_assert!(plan.validate().is_ok());

            for node in graph.nodes() {
                let index = plan.batch_index(node.name()).unwrap();
                for dep in node.dependencies().keys() {
                    prop_assert!(plan.batch_index(dep).unwrap() < index);
                }
            }

            for batch in plan.names() {
                let mut sorted = batch.clone();
                sorted.sort();
                prop_assert_eq!(batch, sorted);
            }
        }

        /// A failed schedule reports a real closed walk along graph edges
        #[test]
        fn prop_cycles_are_real(graph in graph_strategy(false)) {
            match TopologicalScheduler::new().schedule(&graph) {
                Ok(plan) => prop_assert!(plan.validate().is_ok()),
                Err(Error::CyclicDependency { cycle }) => {
                    prop_assert!(cycle.len() >= 3);
                    prop_assert_eq!(cycle.first(), cycle.last());
                    for pair in cycle.windows(2) {
                        prop_assert!(graph.dependencies(&pair[0]).unwrap().contains(&pair[1]));
                    }
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}
