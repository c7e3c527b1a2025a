// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use formulary::install::{CancelToken, CommandDescriptor, CommandRunner, ProcessRunner, StepOutput};
use formulary::{
    Checksum, DependencyKind, EngineConfig, Formula, HashAlgorithm, MemoryRegistry, Result,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Sample formula shipped with the tests
pub const OPENSSH: &str = include_str!("../fixtures/openssh.toml");

/// Formula with the given unconditional dependencies and a dummy source
pub fn formula(name: &str, deps: &[&str]) -> Formula {
    deps.iter()
        .fold(
            Formula::builder(name, "1.0").source(
                format!("https://example.invalid/{name}-1.0.tar.gz"),
                "sha256:dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f",
            ),
            |builder, dep| builder.depends_on(*dep, DependencyKind::Required),
        )
        .build()
        .unwrap()
}

/// Registry built from `(name, deps)` pairs
pub fn registry(entries: &[(&str, &[&str])]) -> MemoryRegistry {
    entries
        .iter()
        .map(|(name, deps)| formula(name, deps))
        .collect()
}

/// Write `<dir>/<name>-1.0.tar.gz` with every file under `<name>-1.0/`
pub fn source_tarball(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(format!("{name}-1.0.tar.gz"));
    let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (file, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{name}-1.0/{file}"), content.as_bytes())
            .unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap();
    path
}

/// `sha256:<hex>` of a file
pub fn sha256_of(path: &Path) -> String {
    Checksum::of_file(HashAlgorithm::Sha256, path)
        .unwrap()
        .to_string()
}

/// Engine rooted at `root`, with small limits for tests
pub fn engine(root: &Path) -> EngineConfig {
    let mut config = EngineConfig::with_root(root);
    config.jobs = 2;
    config.max_parallelism = 2;
    config.step_timeout = Duration::from_secs(20);
    config
}

/// Number of entries left in the staging directory
pub fn staging_entries(config: &EngineConfig) -> usize {
    std::fs::read_dir(config.staging_dir())
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Runner that answers `patch` itself and delegates everything else
pub struct PatchInterceptor {
    inner: ProcessRunner,
    patch_exit: i32,
    pub patches: Mutex<Vec<CommandDescriptor>>,
}

impl PatchInterceptor {
    pub fn new(patch_exit: i32) -> Self {
        Self {
            inner: ProcessRunner::new(),
            patch_exit,
            patches: Mutex::new(Vec::new()),
        }
    }
}

impl CommandRunner for PatchInterceptor {
    fn run(&self, command: &CommandDescriptor, cancel: &CancelToken) -> Result<StepOutput> {
        if command.program != "patch" {
            return self.inner.run(command, cancel);
        }
        self.patches.lock().unwrap().push(command.clone());
        Ok(StepOutput {
            exit_code: Some(self.patch_exit),
            timed_out: false,
            log: format!("patching file {}\n", command.args.join(" ")),
        })
    }
}
