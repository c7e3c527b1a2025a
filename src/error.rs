// src/error.rs

//! Error types for formula resolution and build orchestration
//!
//! Errors fall into two groups:
//! - **Resolution errors** (`InvalidFormula`, `MissingFormula`,
//!   `CyclicDependency`) abort a build before any install begins.
//! - **Node errors** (`IntegrityFailure`, `PatchFailure`, `BuildFailure`)
//!   are fatal to a single formula and surface as a failed `BuildResult`.

use std::fmt;
use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the engine
#[derive(Error, Debug)]
pub enum Error {
    /// A formula failed load-time validation
    #[error("invalid formula '{name}': {reason}")]
    InvalidFormula { name: String, reason: String },

    /// A referenced formula is absent from the lookup
    #[error("formula '{name}' not found (required by {required_by})")]
    MissingFormula { name: String, required_by: String },

    /// The dependency graph contains a cycle
    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Source artifact did not pass checksum verification
    #[error("integrity check failed for {0}")]
    IntegrityFailure(String),

    /// A patch could not be fetched or applied
    #[error("patch failed: {0}")]
    PatchFailure(String),

    /// A configure/build/install step failed
    #[error("build failed: {0}")]
    BuildFailure(String),

    /// The operation was aborted by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// A build plan violates dependency ordering
    #[error("invalid build plan: {0}")]
    InvalidPlan(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A file could not be parsed
    #[error("parse error: {0}")]
    ParseError(String),

    /// Filesystem operation failed with context
    #[error("I/O error: {0}")]
    IoError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Classification of an [`Error`] for reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidFormula,
    MissingFormula,
    CyclicDependency,
    IntegrityFailure,
    PatchFailure,
    BuildFailure,
    Cancelled,
    Other,
}

impl ErrorKind {
    /// Whether this kind aborts the whole build before installs start
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFormula | Self::MissingFormula | Self::CyclicDependency
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidFormula => "invalid-formula",
            Self::MissingFormula => "missing-formula",
            Self::CyclicDependency => "cyclic-dependency",
            Self::IntegrityFailure => "integrity-failure",
            Self::PatchFailure => "patch-failure",
            Self::BuildFailure => "build-failure",
            Self::Cancelled => "cancelled",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Shorthand for an `InvalidFormula` error
    pub fn invalid_formula(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFormula {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Get the classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidFormula { .. } => ErrorKind::InvalidFormula,
            Self::MissingFormula { .. } => ErrorKind::MissingFormula,
            Self::CyclicDependency { .. } => ErrorKind::CyclicDependency,
            Self::IntegrityFailure(_) => ErrorKind::IntegrityFailure,
            Self::PatchFailure(_) => ErrorKind::PatchFailure,
            Self::BuildFailure(_) => ErrorKind::BuildFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Other,
        }
    }
}
