// src/install/runner.rs

//! Subprocess execution for patches and install steps
//!
//! Commands are structured descriptors (program, argument vector, working
//! directory, environment), never shell text. [`ProcessRunner`] starts the
//! process with a cleared environment so only the per-node snapshot is
//! visible, sends stdout and stderr to a log file, and polls the child so
//! that cancellation and the step timeout can kill it.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::error::{Error, Result};

/// How often a running child is checked for cancellation
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared cancellation flag
///
/// Cloning shares the flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl From<Arc<AtomicBool>> for CancelToken {
    fn from(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }
}

/// One command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    /// Complete environment of the child
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl fmt::Display for CommandDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What a finished command left behind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    /// `None` when the process was killed by a signal or the timeout
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Combined stdout and stderr
    pub log: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out
    }
}

/// Runs command descriptors
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion
    ///
    /// Returns `Error::Cancelled` if `cancel` fires first, after the child has
    /// been killed. A spawn failure is an error; a non-zero exit is not.
    fn run(&self, command: &CommandDescriptor, cancel: &CancelToken) -> Result<StepOutput>;
}

/// Runs commands as real subprocesses
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ProcessRunner {
    fn run(&self, command: &CommandDescriptor, cancel: &CancelToken) -> Result<StepOutput> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        debug!("Running: {} (in {})", command, command.workdir.display());

        let mut log_file = tempfile::tempfile()
            .map_err(|e| Error::IoError(format!("Failed to create log file: {}", e)))?;
        let stdout = log_file.try_clone()?;
        let stderr = log_file.try_clone()?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.workdir)
            .env_clear()
            .envs(&command.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| Error::IoError(format!("Failed to spawn {}: {}", command.program, e)))?;

        let started = Instant::now();
        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.wait_timeout(POLL_INTERVAL)? {
                break Some(status);
            }
            if cancel.is_cancelled() {
                warn!("Cancelling {}", command.program);
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Cancelled);
            }
            if started.elapsed() >= command.timeout {
                warn!(
                    "{} timed out after {} seconds",
                    command.program,
                    command.timeout.as_secs()
                );
                let _ = child.kill();
                let _ = child.wait();
                timed_out = true;
                break None;
            }
        };

        let mut raw = Vec::new();
        log_file.seek(SeekFrom::Start(0))?;
        log_file.read_to_end(&mut raw)?;

        Ok(StepOutput {
            exit_code: status.and_then(|s| s.code()),
            timed_out,
            log: String::from_utf8_lossy(&raw).into_owned(),
        })
    }
}
