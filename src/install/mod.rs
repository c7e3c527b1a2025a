// src/install/mod.rs

//! Installing a single resolved node
//!
//! [`InstallExecutor`] takes one [`ResolvedNode`] from source to a promoted
//! keg:
//!
//! 1. **Fetch**: obtain the source through the [`SourceFetcher`]; an
//!    unverified artifact is an `IntegrityFailure`
//! 2. **Unpack**: extract it into the staging source tree
//! 3. **Patch**: apply active patches in order (`PatchFailure`)
//! 4. **Build**: run active install steps with the node's environment
//!    snapshot (`BuildFailure`)
//! 5. **Receipt**: write `INSTALL_RECEIPT.json` into the staged keg (the
//!    `DESTDIR` tree if the build used one, the staged prefix otherwise)
//! 6. **Promote**: rename the staged keg to `Cellar/<name>/<version>` and
//!    repoint `opt/<name>`; if the link cannot be made the promotion is
//!    rolled back
//!
//! Steps 1-5 only touch the node's staging area, which is removed on any
//! failure or cancellation. Failures from step 5 on are `BuildFailure`s.

mod archive;
mod env;
mod fetch;
mod receipt;
mod runner;
mod staging;

pub use archive::{ArchiveFormat, unpack_source};
pub use env::BuildEnvironment;
pub use fetch::{CachingFetcher, FetchedSource, SourceFetcher};
pub use receipt::{InstallReceipt, RECEIPT_FILE, ReceiptDependency};
pub use runner::{CancelToken, CommandDescriptor, CommandRunner, POLL_INTERVAL, ProcessRunner, StepOutput};
pub use staging::{Promotion, StagingArea, link_opt, promote};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::report::{BuildOutcome, BuildResult};
use crate::resolve::ResolvedNode;

/// Installs one node; consumed by the orchestrator
pub trait NodeInstaller: Send + Sync {
    /// Install `node` with the given environment snapshot
    ///
    /// Never panics on node-level problems; they are reported as a failed
    /// [`BuildResult`].
    fn install(&self, node: &ResolvedNode, environment: BuildEnvironment, cancel: &CancelToken) -> BuildResult;
}

/// Installs nodes from source into the engine root
pub struct InstallExecutor {
    config: EngineConfig,
    fetcher: Arc<dyn SourceFetcher>,
    runner: Arc<dyn CommandRunner>,
}

impl InstallExecutor {
    /// Executor with a caching fetcher and real subprocesses
    pub fn new(config: EngineConfig) -> Self {
        let fetcher = Arc::new(CachingFetcher::new(config.source_cache_dir()));
        Self {
            config,
            fetcher,
            runner: Arc::new(ProcessRunner::new()),
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether a keg with a receipt exists for `name` `version`
    pub fn is_installed(&self, name: &str, version: &str) -> bool {
        self.config
            .keg_path(name, version)
            .join(RECEIPT_FILE)
            .is_file()
    }

    fn run_node(
        &self,
        node: &ResolvedNode,
        environment: &BuildEnvironment,
        staging: &StagingArea,
        cancel: &CancelToken,
        log: &mut BuildLog,
    ) -> Result<PathBuf> {
        let formula = node.formula();

        // Fetch
        let source = formula.source();
        let fetched = self
            .fetcher
            .fetch(&source.url, Some(&source.checksum), &staging.downloads_dir())
            .map_err(|e| Error::IntegrityFailure(format!("{}: {}", source.url, e)))?;
        if !fetched.verified {
            return Err(Error::IntegrityFailure(format!(
                "{} does not match {}",
                source.url, source.checksum
            )));
        }
        log.line(&format!("Fetched source: {}", source.url));
        check_cancelled(cancel)?;

        // Unpack
        let source_root = unpack_source(&fetched.path, &staging.source_dir())
            .map_err(|e| Error::BuildFailure(format!("unpacking {}: {}", source.url, e)))?;
        log.line(&format!("Extracted source to {}", source_root.display()));

        let env = environment.bind(&staging.prefix(), &staging.destdir(), &source_root);

        // Patch
        let mut applied = Vec::new();
        for patch in node.active_patches() {
            check_cancelled(cancel)?;
            let fetched = self
                .fetcher
                .fetch(&patch.source, patch.checksum.as_ref(), &staging.patches_dir())
                .map_err(|e| Error::PatchFailure(format!("{}: {}", patch.source, e)))?;
            if !fetched.verified {
                return Err(Error::PatchFailure(format!(
                    "{} does not match its checksum",
                    patch.source
                )));
            }

            info!("Applying patch: {}", patch.source);
            let command = CommandDescriptor {
                program: "patch".to_string(),
                args: vec![
                    format!("-p{}", patch.strip),
                    "-i".to_string(),
                    fetched.path.display().to_string(),
                ],
                workdir: source_root.clone(),
                env: env.vars().clone(),
                timeout: env.step_timeout(),
            };
            let output = self.run_command(&command, cancel, log).map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::PatchFailure(format!("{}: {}", patch.source, other)),
            })?;
            if !output.success() {
                return Err(Error::PatchFailure(format!(
                    "{} {}",
                    patch.source,
                    describe_exit(&output, &command)
                )));
            }
            applied.push(patch.source.clone());
        }

        // Build
        for step in node.active_steps() {
            check_cancelled(cancel)?;
            let workdir = match &step.workdir {
                Some(dir) => source_root.join(env.substitute(dir)),
                None => source_root.clone(),
            };
            let command = CommandDescriptor {
                program: env.substitute(&step.program),
                args: step
                    .active_args(node.selected())
                    .into_iter()
                    .map(|arg| env.substitute(arg))
                    .collect(),
                workdir,
                env: env.vars().clone(),
                timeout: env.step_timeout(),
            };

            info!("Running: {}", command);
            let output = self.run_command(&command, cancel, log).map_err(|e| match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::BuildFailure(format!("`{}`: {}", command, other)),
            })?;
            if !output.success() {
                return Err(Error::BuildFailure(format!(
                    "`{}` {}",
                    command,
                    describe_exit(&output, &command)
                )));
            }
        }

        check_cancelled(cancel)?;

        // Receipt
        let keg = self.config.keg_path(node.name(), node.version());
        let staged = staging.staged_keg(&keg);
        InstallReceipt::for_node(node, applied)
            .write(&staged)
            .map_err(|e| Error::BuildFailure(format!("writing receipt: {}", e)))?;

        // Promote
        let promotion = promote(&staged, &keg)
            .map_err(|e| Error::BuildFailure(e.to_string()))?;
        if let Err(e) = link_opt(&keg, &self.config.opt_path(node.name())) {
            if let Err(rollback) = promotion.rollback() {
                warn!("Failed to roll back {}: {}", keg.display(), rollback);
            }
            return Err(Error::BuildFailure(e.to_string()));
        }
        promotion.commit();
        log.line(&format!("Installed to {}", keg.display()));

        Ok(keg)
    }

    fn run_command(
        &self,
        command: &CommandDescriptor,
        cancel: &CancelToken,
        log: &mut BuildLog,
    ) -> Result<StepOutput> {
        log.line(&format!("=== {} ===", command));
        let output = self.runner.run(command, cancel)?;
        log.push(&output.log);
        Ok(output)
    }
}

impl NodeInstaller for InstallExecutor {
    fn install(&self, node: &ResolvedNode, environment: BuildEnvironment, cancel: &CancelToken) -> BuildResult {
        let started = Instant::now();
        let mut log = BuildLog::default();

        info!("Installing {} {}", node.name(), node.version());

        let outcome = match check_cancelled(cancel).and_then(|()| {
            StagingArea::create(&self.config.staging_dir(), &node.formula().full_name())
        }) {
            Err(e) => Err(e),
            Ok(staging) => {
                let result = self.run_node(node, &environment, &staging, cancel, &mut log);
                if result.is_err() && environment.keep_failed_staging() {
                    let kept = staging.keep();
                    warn!("Keeping failed staging area {}", kept.display());
                    log.line(&format!("Staging kept at {}", kept.display()));
                }
                result
            }
        };

        let (outcome, caveats) = match outcome {
            Ok(prefix) => {
                info!("Installed {} {}", node.name(), node.version());
                let caveats = node
                    .active_caveats()
                    .map(|c| environment.substitute(&c.text));
                (BuildOutcome::Succeeded { prefix }, caveats)
            }
            Err(e) => {
                warn!("Failed to install {}: {}", node.name(), e);
                log.line(&format!("Error: {}", e));
                (
                    BuildOutcome::Failed {
                        kind: e.kind(),
                        message: e.to_string(),
                    },
                    None,
                )
            }
        };

        BuildResult {
            name: node.name().to_string(),
            version: node.version().to_string(),
            outcome,
            duration: started.elapsed(),
            log: log.into_string(),
            caveats,
        }
    }
}

fn check_cancelled(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        debug!("Cancellation requested");
        return Err(Error::Cancelled);
    }
    Ok(())
}

fn describe_exit(output: &StepOutput, command: &CommandDescriptor) -> String {
    if output.timed_out {
        return format!("timed out after {} seconds", command.timeout.as_secs());
    }
    match output.exit_code {
        Some(code) => format!("exited with status {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

/// Accumulated per-node log
#[derive(Debug, Default)]
struct BuildLog(String);

impl BuildLog {
    fn line(&mut self, line: &str) {
        self.0.push_str(line);
        self.0.push('\n');
    }

    fn push(&mut self, text: &str) {
        if !text.is_empty() {
            self.0.push_str(text);
            if !text.ends_with('\n') {
                self.0.push('\n');
            }
        }
    }

    fn into_string(self) -> String {
        self.0
    }
}
