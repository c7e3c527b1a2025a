// src/resolve/mod.rs

//! Dependency resolution and build ordering
//!
//! Resolution runs in three stages, all before any install starts:
//!
//! 1. [`OptionResolver`] evaluates a formula's guards against the selected
//!    options, producing a [`ResolvedNode`].
//! 2. [`DependencyGraphBuilder`] walks the active edges breadth-first from
//!    the requested roots, producing a [`BuildGraph`].
//! 3. [`TopologicalScheduler`] orders the graph into a [`BuildPlan`] of
//!    parallel batches, or reports the shortest dependency cycle.
//!
//! [`resolve_plan`] runs all three.

mod graph;
mod options;
mod schedule;

pub use graph::{BuildGraph, DependencyGraphBuilder, ROOT_REQUESTER};
pub use options::{OptionResolver, OptionSelection, ResolveIntent, ResolvedNode};
pub use schedule::{BuildPlan, TopologicalScheduler};

use crate::error::Result;
use crate::formula::FormulaLookup;

/// Resolve `roots` against `lookup` and schedule the result
pub fn resolve_plan<L>(
    roots: &[&str],
    selected_options: &OptionSelection,
    intent: ResolveIntent,
    lookup: &L,
) -> Result<BuildPlan>
where
    L: FormulaLookup + ?Sized,
{
    let graph = DependencyGraphBuilder::new(intent).build(roots, selected_options, lookup)?;
    TopologicalScheduler::new().schedule(&graph)
}
