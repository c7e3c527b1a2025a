// src/formula/parser.rs

//! Formula file parsing

use crate::error::{Error, Result};
use crate::formula::format::{Formula, FormulaDocument};
use std::path::Path;

/// Parse and validate a formula from a TOML string
pub fn parse_formula(content: &str) -> Result<Formula> {
    let doc: FormulaDocument =
        toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid formula: {}", e)))?;
    Formula::try_from(doc)
}

/// Parse and validate a formula from a file
pub fn parse_formula_file(path: &Path) -> Result<Formula> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("Failed to read formula file {}: {}", path.display(), e))
    })?;

    parse_formula(&content)
}

/// Collect non-fatal warnings for a formula that already passed validation
pub fn validate_formula(formula: &Formula) -> Vec<String> {
    let mut warnings = Vec::new();

    if formula.description().is_none() {
        warnings.push("Missing formula description".to_string());
    }
    if formula.homepage().is_none() {
        warnings.push("Missing formula homepage".to_string());
    }
    if formula.install().steps.is_empty() {
        warnings.push("No install steps specified".to_string());
    }

    for patch in formula.patches() {
        if patch.is_remote() && patch.checksum.is_none() {
            warnings.push(format!("Remote patch {} has no checksum", patch.source));
        }
    }

    for option in formula.options() {
        if option.description.is_empty() {
            warnings.push(format!("Option '{}' has no description", option.name));
        }
    }

    warnings
}
