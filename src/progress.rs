// src/progress.rs

//! Build progress reporting
//!
//! The orchestrator reports each node once when it starts and once when its
//! result is recorded. Implementations:
//! - `LogProgress`: logs to tracing
//! - `SilentProgress`: counts only, for scripted or quiet use
//! - `CallbackProgress`: forwards [`ProgressEvent`]s to a closure
//!
//! All implementations are `Send + Sync`; nodes start from worker threads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

use crate::report::{BuildOutcome, BuildReport, BuildResult};

/// Receives progress updates from a build run
pub trait ProgressTracker: Send + Sync {
    /// Total number of nodes in the plan
    fn set_length(&self, length: u64);

    /// A node is about to be installed
    fn node_started(&self, name: &str);

    /// A node's result was recorded (including skips)
    fn node_finished(&self, result: &BuildResult);

    /// The run completed
    fn finish(&self, report: &BuildReport);

    /// Number of recorded results so far
    fn position(&self) -> u64;

    fn length(&self) -> u64;

    fn is_finished(&self) -> bool;
}

/// Silent progress tracker (no-op apart from counters)
#[derive(Debug, Default)]
pub struct SilentProgress {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn node_started(&self, _name: &str) {}

    fn node_finished(&self, _result: &BuildResult) {
        self.position.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self, _report: &BuildReport) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Logging progress tracker
///
/// Logs each finished node at info level as `[3/7] openssl: installed`.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: AtomicU64::new(0),
            length: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }
}

impl ProgressTracker for LogProgress {
    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn node_started(&self, name: &str) {
        info!("{}: starting {}", self.name, name);
    }

    fn node_finished(&self, result: &BuildResult) {
        let position = self.position.fetch_add(1, Ordering::Relaxed) + 1;
        let length = self.length.load(Ordering::Relaxed);
        let status = match &result.outcome {
            BuildOutcome::Succeeded { .. } => "installed".to_string(),
            BuildOutcome::Failed { kind, .. } => format!("failed ({kind})"),
            BuildOutcome::Skipped(cause) => format!("skipped ({cause})"),
        };
        info!("{}: [{}/{}] {}: {}", self.name, position, length, result.name, status);
    }

    fn finish(&self, report: &BuildReport) {
        self.finished.store(true, Ordering::Relaxed);
        info!(
            "{}: {} succeeded, {} failed, {} skipped",
            self.name,
            report.succeeded(),
            report.failed(),
            report.skipped()
        );
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Progress event for callback-based tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Length(u64),
    Started(String),
    Finished { name: String, success: bool },
    Done { exit_code: i32 },
}

/// Callback-based progress tracker
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            position: AtomicU64::new(0),
            length: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }
}

impl<F> ProgressTracker for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Length(length));
    }

    fn node_started(&self, name: &str) {
        (self.callback)(ProgressEvent::Started(name.to_string()));
    }

    fn node_finished(&self, result: &BuildResult) {
        self.position.fetch_add(1, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Finished {
            name: result.name.clone(),
            success: result.is_success(),
        });
    }

    fn finish(&self, report: &BuildReport) {
        self.finished.store(true, Ordering::Relaxed);
        (self.callback)(ProgressEvent::Done {
            exit_code: report.exit_code(),
        });
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}
