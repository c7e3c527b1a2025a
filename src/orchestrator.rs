// src/orchestrator.rs

//! Build orchestration
//!
//! [`BuildOrchestrator`] walks a [`BuildPlan`] batch by batch. Nodes within a
//! batch run on a bounded rayon pool; the next batch starts only after every
//! node of the current one has reported.
//!
//! Before a node starts, all of its dependencies must have succeeded.
//! Otherwise it is skipped, citing the first failing ancestor. With
//! `stop_on_first_failure`, the first failure also halts dispatch: nodes
//! that have not started yet are skipped, while nodes already running are
//! left to finish. A fired cancel token skips every node not yet started and
//! makes running installs kill their subprocess and discard their staging.

use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::install::{BuildEnvironment, CancelToken, NodeInstaller};
use crate::progress::{ProgressTracker, SilentProgress};
use crate::report::{BuildOutcome, BuildReport, BuildResult, SkipCause};
use crate::resolve::{BuildPlan, ResolvedNode};

/// Options for a single run
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Halt dispatch after the first failure
    pub stop_on_first_failure: bool,
    /// Upper bound on concurrently running installs (at least 1)
    pub max_parallelism: usize,
    pub cancel_token: CancelToken,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            stop_on_first_failure: false,
            max_parallelism: 1,
            cancel_token: CancelToken::new(),
        }
    }
}

impl OrchestratorOptions {
    /// Options taken from the engine configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            stop_on_first_failure: config.stop_on_first_failure,
            max_parallelism: config.max_parallelism,
            ..Self::default()
        }
    }

    pub fn stop_on_first_failure(mut self, enabled: bool) -> Self {
        self.stop_on_first_failure = enabled;
        self
    }

    pub fn max_parallelism(mut self, count: usize) -> Self {
        self.max_parallelism = count;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel_token = token;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Runs build plans against a [`NodeInstaller`]
pub struct BuildOrchestrator {
    installer: Arc<dyn NodeInstaller>,
    config: EngineConfig,
    progress: Arc<dyn ProgressTracker>,
}

impl BuildOrchestrator {
    pub fn new(installer: Arc<dyn NodeInstaller>, config: EngineConfig) -> Self {
        Self {
            installer,
            config,
            progress: Arc::new(SilentProgress::new()),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// Execute `plan` and report one result per node, in plan order
    ///
    /// Fails only if the plan itself is invalid or the worker pool cannot be
    /// created; node failures are part of the report.
    pub fn run(&self, plan: &BuildPlan, options: &OrchestratorOptions) -> Result<BuildReport> {
        plan.validate()?;

        let workers = options.max_parallelism.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("formulary-worker-{i}"))
            .build()
            .map_err(|e| Error::IoError(format!("Failed to create worker pool: {}", e)))?;

        info!(
            "Building {} formulas in {} batches ({} workers)",
            plan.len(),
            plan.batch_count(),
            workers
        );
        self.progress.set_length(plan.len() as u64);

        let started = Instant::now();
        let mut states: HashMap<String, BuildOutcome> = HashMap::new();
        let mut results = Vec::with_capacity(plan.len());
        let first_failure: OnceLock<String> = OnceLock::new();

        for (index, batch) in plan.batches().iter().enumerate() {
            debug!("Dispatching batch {} ({} nodes)", index, batch.len());

            let batch_results: Vec<BuildResult> = pool.install(|| {
                batch
                    .par_iter()
                    .map(|node| self.run_node(node, &states, &first_failure, options))
                    .collect()
            });

            for result in batch_results {
                self.progress.node_finished(&result);
                states.insert(result.name.clone(), result.outcome.clone());
                results.push(result);
            }
        }

        let report = BuildReport::new(results, started.elapsed());
        info!(
            "Build finished: {} succeeded, {} failed, {} skipped",
            report.succeeded(),
            report.failed(),
            report.skipped()
        );
        self.progress.finish(&report);
        Ok(report)
    }

    fn run_node(
        &self,
        node: &ResolvedNode,
        states: &HashMap<String, BuildOutcome>,
        first_failure: &OnceLock<String>,
        options: &OrchestratorOptions,
    ) -> BuildResult {
        if options.is_cancelled() {
            return BuildResult::skipped(node, SkipCause::Cancelled);
        }
        if let Some(cause) = blocking_cause(node, states) {
            debug!("Skipping {}: {}", node.name(), cause);
            return BuildResult::skipped(node, cause);
        }
        if options.stop_on_first_failure
            && let Some(failed) = first_failure.get()
        {
            return BuildResult::skipped(
                node,
                SkipCause::Aborted {
                    after: failed.clone(),
                },
            );
        }

        self.progress.node_started(node.name());
        let environment = BuildEnvironment::assemble(node, &self.config);
        let result = self
            .installer
            .install(node, environment, &options.cancel_token);

        if result.is_failed()
            && first_failure.set(node.name().to_string()).is_ok()
            && options.stop_on_first_failure
        {
            warn!("{} failed, halting further dispatch", node.name());
        }
        result
    }
}

/// Why `node` cannot start, judged from its dependencies' outcomes
///
/// A failed ancestor takes precedence over an abort or a cancellation.
fn blocking_cause(node: &ResolvedNode, states: &HashMap<String, BuildOutcome>) -> Option<SkipCause> {
    let mut fallback = None;

    for dep in node.dependencies().keys() {
        match states.get(dep) {
            Some(BuildOutcome::Succeeded { .. }) => {}
            Some(BuildOutcome::Failed {
                kind: ErrorKind::Cancelled,
                ..
            }) => {
                fallback.get_or_insert(SkipCause::Cancelled);
            }
            Some(BuildOutcome::Failed { .. }) => {
                return Some(SkipCause::UpstreamFailure {
                    ancestor: dep.clone(),
                });
            }
            Some(BuildOutcome::Skipped(SkipCause::UpstreamFailure { ancestor })) => {
                return Some(SkipCause::UpstreamFailure {
                    ancestor: ancestor.clone(),
                });
            }
            Some(BuildOutcome::Skipped(cause)) => {
                fallback.get_or_insert_with(|| cause.clone());
            }
            // A validated plan always has the dependency's result by now
            None => {
                fallback.get_or_insert(SkipCause::UpstreamFailure {
                    ancestor: dep.clone(),
                });
            }
        }
    }

    fallback
}
