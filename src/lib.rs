// src/lib.rs

//! Formulary
//!
//! Formula resolution and build orchestration for source-built packages.
//!
//! # Architecture
//!
//! - Formulas: immutable, validated package definitions loaded from TOML
//! - Resolution: option guards, breadth-first dependency closure and
//!   Kahn batching, all finished before anything is built
//! - Installation: per-node staging, verified sources, patches and opaque
//!   build steps, promoted into the Cellar by rename
//! - Orchestration: batches on a bounded worker pool with failure
//!   propagation and cooperative cancellation
//!
//! ```no_run
//! use formulary::{
//!     BuildOrchestrator, DirectoryRegistry, EngineConfig, InstallExecutor, OptionSelection,
//!     OrchestratorOptions, ResolveIntent, resolve_plan,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> formulary::Result<()> {
//! let config = EngineConfig::load("formulary.toml".as_ref())?;
//! let (registry, _report) = DirectoryRegistry::load("formulas".as_ref())?;
//! let options: OptionSelection = ["with-ldns".to_string()].into_iter().collect();
//!
//! let plan = resolve_plan(&["openssh"], &options, ResolveIntent::Build, &registry)?;
//! let executor = Arc::new(InstallExecutor::new(config.clone()));
//! let report = BuildOrchestrator::new(executor, config.clone())
//!     .run(&plan, &OrchestratorOptions::from_config(&config))?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod formula;
pub mod hash;
pub mod install;
pub mod orchestrator;
pub mod progress;
pub mod report;
pub mod resolve;

pub use config::EngineConfig;
pub use error::{Error, ErrorKind, Result};
pub use formula::{
    DependencyKind, DirectoryRegistry, Formula, FormulaLookup, MemoryRegistry, parse_formula,
    parse_formula_file,
};
pub use hash::{Checksum, HashAlgorithm};
pub use install::{CancelToken, InstallExecutor, NodeInstaller};
pub use orchestrator::{BuildOrchestrator, OrchestratorOptions};
pub use progress::{CallbackProgress, LogProgress, ProgressEvent, ProgressTracker, SilentProgress};
pub use report::{BuildOutcome, BuildReport, BuildResult, SkipCause};
pub use resolve::{
    BuildGraph, BuildPlan, DependencyGraphBuilder, OptionResolver, OptionSelection, ResolveIntent,
    ResolvedNode, TopologicalScheduler, resolve_plan,
};
