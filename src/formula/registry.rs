// src/formula/registry.rs

//! Formula lookup
//!
//! The resolver only needs read access to formulas by name, expressed by the
//! [`FormulaLookup`] trait. Two implementations are provided: an in-memory
//! map and a directory of `<name>.toml` files loaded up front.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::formula::format::Formula;
use crate::formula::parser::parse_formula_file;

/// Read-only access to formulas by name
pub trait FormulaLookup: Send + Sync {
    /// Get the formula registered under `name`
    fn get(&self, name: &str) -> Option<Arc<Formula>>;
}

/// In-memory formula registry
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    formulas: BTreeMap<String, Arc<Formula>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a formula, replacing any previous one with the same name
    pub fn insert(&mut self, formula: Formula) -> Option<Arc<Formula>> {
        self.formulas
            .insert(formula.name().to_string(), Arc::new(formula))
    }

    pub fn with(mut self, formula: Formula) -> Self {
        self.insert(formula);
        self
    }

    pub fn len(&self) -> usize {
        self.formulas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formulas.is_empty()
    }

    /// Registered names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.formulas.keys().map(String::as_str)
    }
}

impl FromIterator<Formula> for MemoryRegistry {
    fn from_iter<I: IntoIterator<Item = Formula>>(iter: I) -> Self {
        let mut registry = Self::new();
        for formula in iter {
            registry.insert(formula);
        }
        registry
    }
}

impl FormulaLookup for MemoryRegistry {
    fn get(&self, name: &str) -> Option<Arc<Formula>> {
        self.formulas.get(name).cloned()
    }
}

/// Outcome of loading a formula directory
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Names of the formulas that loaded
    pub loaded: Vec<String>,
    /// Files that failed to parse or validate
    pub rejected: Vec<(PathBuf, Error)>,
}

/// Registry backed by a directory of `<name>.toml` formula files
///
/// Files are parsed once at load time. A file that fails validation is
/// reported and left out; it never reaches the resolver.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    dir: PathBuf,
    inner: MemoryRegistry,
}

impl DirectoryRegistry {
    /// Load every `*.toml` file in `dir`
    pub fn load(dir: &Path) -> Result<(Self, LoadReport)> {
        info!("Loading formulas from {}", dir.display());

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::IoError(format!("Failed to read formula directory {}: {}", dir.display(), e))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut inner = MemoryRegistry::new();
        let mut report = LoadReport::default();

        for path in paths {
            match parse_formula_file(&path) {
                Ok(formula) => {
                    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                    if stem != formula.name() {
                        debug!(
                            "Formula file {} declares name '{}'",
                            path.display(),
                            formula.name()
                        );
                    }
                    report.loaded.push(formula.name().to_string());
                    if inner.insert(formula).is_some() {
                        warn!("Duplicate formula definition in {}", path.display());
                    }
                }
                Err(e) => {
                    warn!("Skipping formula {}: {}", path.display(), e);
                    report.rejected.push((path, e));
                }
            }
        }

        info!(
            "Loaded {} formulas ({} rejected)",
            report.loaded.len(),
            report.rejected.len()
        );

        Ok((
            Self {
                dir: dir.to_path_buf(),
                inner,
            },
            report,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl FormulaLookup for DirectoryRegistry {
    fn get(&self, name: &str) -> Option<Arc<Formula>> {
        self.inner.get(name)
    }
}
