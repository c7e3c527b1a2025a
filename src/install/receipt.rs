// src/install/receipt.rs

//! Install receipts
//!
//! Every promoted keg carries an `INSTALL_RECEIPT.json` recording how it
//! was built. A keg without a receipt is not considered installed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::resolve::ResolvedNode;

/// File name of the receipt inside a keg
pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// One dependency edge as installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDependency {
    pub name: String,
    pub build_only: bool,
}

/// Build record stored in each keg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    pub version: String,
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_options: Vec<String>,
    pub dependencies: Vec<ReceiptDependency>,
    pub patches: Vec<String>,
    pub source_url: String,
    pub source_checksum: Checksum,
    pub installed_at: DateTime<Utc>,
    pub built_by: String,
}

impl InstallReceipt {
    /// Receipt for `node` with the patches that were applied
    pub fn for_node(node: &ResolvedNode, patches: Vec<String>) -> Self {
        let source = node.formula().source();
        Self {
            name: node.name().to_string(),
            version: node.version().to_string(),
            options: node.selected().iter().cloned().collect(),
            ignored_options: node.ignored_options().iter().cloned().collect(),
            dependencies: node
                .dependencies()
                .iter()
                .map(|(name, kind)| ReceiptDependency {
                    name: name.clone(),
                    build_only: kind.is_build_only(),
                })
                .collect(),
            patches,
            source_url: source.url.clone(),
            source_checksum: source.checksum.clone(),
            installed_at: Utc::now(),
            built_by: format!("formulary {}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Write the receipt into `prefix`
    pub fn write(&self, prefix: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(prefix.join(RECEIPT_FILE), json).map_err(|e| {
            Error::IoError(format!("Failed to write receipt in {}: {}", prefix.display(), e))
        })?;
        Ok(())
    }

    /// Read the receipt of an installed keg
    pub fn read(keg: &Path) -> Result<Self> {
        let content = fs::read_to_string(keg.join(RECEIPT_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{DependencyKind, Formula};
    use crate::resolve::{OptionResolver, OptionSelection};
    use std::sync::Arc;

    #[test]
    fn test_receipt_written_and_read() {
        let formula = Formula::builder("openssh", "6.5p1")
            .source(
                "openssh.tar.gz",
                "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f",
            )
            .option("with-ldns", "")
            .depends_on(
                "pkg-config",
                DependencyKind::ConditionalOnOption {
                    option: "with-ldns".into(),
                    build_only: true,
                },
            )
            .depends_on("ldns", DependencyKind::Optional)
            .build()
            .unwrap();
        let selection: OptionSelection =
            ["with-ldns", "with-x"].iter().map(|s| s.to_string()).collect();
        let node = OptionResolver::default().resolve(&Arc::new(formula), &selection);

        let dir = tempfile::tempdir().unwrap();
        let receipt = InstallReceipt::for_node(&node, vec!["fix.patch".to_string()]);
        receipt.write(dir.path()).unwrap();

        let read = InstallReceipt::read(dir.path()).unwrap();
        assert_eq!(read, receipt);
        assert_eq!(read.options, vec!["with-ldns"]);
        assert_eq!(read.ignored_options, vec!["with-x"]);
        assert_eq!(
            read.dependencies,
            vec![
                ReceiptDependency { name: "ldns".into(), build_only: false },
                ReceiptDependency { name: "pkg-config".into(), build_only: true },
            ]
        );
    }

    #[test]
    fn test_missing_receipt() {
        let dir = tempfile::tempdir().unwrap();
        assert!(InstallReceipt::read(dir.path()).is_err());
    }
}
