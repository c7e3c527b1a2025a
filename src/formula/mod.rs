// src/formula/mod.rs

//! Formula definitions, parsing and lookup
//!
//! A formula describes how to build one package from source: where to get
//! it, what it depends on, which option flags it understands, and the
//! ordered steps that configure, build and install it.
//!
//! # Example Formula
//!
//! ```toml
//! [formula]
//! name = "openssh"
//! version = "6.5p1"
//! description = "OpenBSD freely-licensed SSH connectivity tools"
//!
//! [source]
//! url = "https://ftp.openbsd.org/pub/OpenBSD/OpenSSH/portable/openssh-6.5p1.tar.gz"
//! checksum = "sha256:..."
//!
//! [[options]]
//! name = "with-brewed-openssl"
//! description = "Build against the openssl formula"
//!
//! [[dependencies]]
//! name = "openssl"
//! when = "with-brewed-openssl"
//!
//! [[install.steps]]
//! program = "./configure"
//! args = ["--prefix=%(keg)s", "--sysconfdir=%(etc)s/ssh"]
//!
//! [[install.steps.extra_args]]
//! args = ["--with-ssl-dir=%(opt:openssl)s"]
//! when = "with-brewed-openssl"
//!
//! [[install.steps]]
//! program = "make"
//! args = ["install", "DESTDIR=%(destdir)s"]
//! ```

mod format;
mod parser;
mod registry;

pub use format::{
    Caveats, ConditionalArgs, DependencyKind, DependencySpec, EnvEdit, EnvMode, Formula,
    FormulaBuilder, FormulaOption, Guard, InstallProcedure, InstallStep, PatchRef, SourceRef,
};
pub use parser::{parse_formula, parse_formula_file, validate_formula};
pub use registry::{DirectoryRegistry, FormulaLookup, LoadReport, MemoryRegistry};
