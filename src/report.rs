// src/report.rs

//! Per-node results and the final build report

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::resolve::ResolvedNode;

/// Exit code when every node succeeded
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when a node failed or was skipped because of a failure
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when cancellation interrupted a running install
pub const EXIT_CANCELLED: i32 = 130;

/// Why a node was never attempted
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SkipCause {
    /// A dependency, direct or not, failed
    UpstreamFailure { ancestor: String },
    /// Stop-on-first-failure halted dispatch after `after` failed
    Aborted { after: String },
    /// The cancel token fired before the node started
    Cancelled,
}

impl fmt::Display for SkipCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamFailure { ancestor } => write!(f, "dependency {ancestor} failed"),
            Self::Aborted { after } => write!(f, "aborted after {after} failed"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// How a node ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Succeeded { prefix: PathBuf },
    Failed { kind: ErrorKind, message: String },
    Skipped(SkipCause),
}

/// Result of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub name: String,
    pub version: String,
    pub outcome: BuildOutcome,
    pub duration: Duration,
    /// Captured output of every command run for this node
    pub log: String,
    /// Active caveats of a successful install
    pub caveats: Option<String>,
}

impl BuildResult {
    pub fn skipped(node: &ResolvedNode, cause: SkipCause) -> Self {
        Self {
            name: node.name().to_string(),
            version: node.version().to_string(),
            outcome: BuildOutcome::Skipped(cause),
            duration: Duration::ZERO,
            log: String::new(),
            caveats: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, BuildOutcome::Skipped(_))
    }

    /// Error kind of a failed node
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            BuildOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn skip_cause(&self) -> Option<&SkipCause> {
        match &self.outcome {
            BuildOutcome::Skipped(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Ordered results of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    results: Vec<BuildResult>,
    duration: Duration,
}

impl BuildReport {
    pub(crate) fn new(results: Vec<BuildResult>, duration: Duration) -> Self {
        Self { results, duration }
    }

    /// Results in plan order
    pub fn results(&self) -> &[BuildResult] {
        &self.results
    }

    pub fn get(&self, name: &str) -> Option<&BuildResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.results.iter().filter(|r| r.is_skipped()).count()
    }

    /// Whether every node succeeded
    pub fn is_success(&self) -> bool {
        self.results.iter().all(BuildResult::is_success)
    }

    /// Process exit code for a front end
    ///
    /// 0 when every attempted node succeeded and nothing was skipped because
    /// of a failure. 130 when the only failures are installs interrupted by
    /// cancellation, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        let mut interrupted = false;
        for result in &self.results {
            match &result.outcome {
                BuildOutcome::Succeeded { .. } => {}
                BuildOutcome::Failed {
                    kind: ErrorKind::Cancelled,
                    ..
                } => interrupted = true,
                BuildOutcome::Failed { .. } => return EXIT_FAILURE,
                BuildOutcome::Skipped(SkipCause::Cancelled) => {}
                BuildOutcome::Skipped(_) => return EXIT_FAILURE,
            }
        }

        if interrupted { EXIT_CANCELLED } else { EXIT_SUCCESS }
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            match &result.outcome {
                BuildOutcome::Succeeded { prefix } => writeln!(
                    f,
                    "  {} {}: installed in {}",
                    result.name,
                    result.version,
                    prefix.display()
                )?,
                BuildOutcome::Failed { kind, message } => {
                    writeln!(f, "  {} {}: {} ({})", result.name, result.version, message, kind)?
                }
                BuildOutcome::Skipped(cause) => {
                    writeln!(f, "  {} {}: skipped, {}", result.name, result.version, cause)?
                }
            }
        }
        write!(
            f,
            "{} succeeded, {} failed, {} skipped in {:.1}s",
            self.succeeded(),
            self.failed(),
            self.skipped(),
            self.duration.as_secs_f64()
        )
    }
}
