// src/config.rs

//! Engine configuration
//!
//! Everything the engine writes lives under a single `root`:
//!
//! ```text
//! <root>/
//!   Cellar/<name>/<version>/   promoted kegs
//!   opt/<name>                 stable link to the current keg
//!   etc/                       shared configuration (%(etc)s)
//!   .staging/                  per-node staging areas
//!   cache/sources/             checksum-keyed download cache
//! ```
//!
//! Configuration is read from TOML. `FORMULARY_ROOT` overrides `root`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable overriding [`EngineConfig::root`]
pub const ROOT_ENV: &str = "FORMULARY_ROOT";

const DEFAULT_ROOT: &str = "/usr/local/formulary";
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

fn default_jobs() -> u32 {
    std::thread::available_parallelism()
        .map(|p| p.get() as u32)
        .unwrap_or(4)
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Install root; all other directories derive from it
    pub root: PathBuf,
    /// Parallel jobs per build (`%(jobs)s` and `MAKEFLAGS`)
    pub jobs: u32,
    /// Wall-clock limit for a single install step or patch
    #[serde(with = "duration_secs")]
    pub step_timeout: Duration,
    /// Maximum number of nodes installed at once
    pub max_parallelism: usize,
    /// Halt dispatch after the first failed node
    pub stop_on_first_failure: bool,
    /// Leave the staging area of a failed node on disk (for debugging)
    pub keep_failed_staging: bool,
    /// `PATH` handed to build subprocesses
    pub base_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let jobs = default_jobs();

        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            jobs,
            step_timeout: Duration::from_secs(3600), // 1 hour
            max_parallelism: jobs.max(1) as usize,
            stop_on_first_failure: false,
            keep_failed_staging: false,
            base_path: DEFAULT_PATH.to_string(),
        }
    }
}

impl EngineConfig {
    /// Configuration rooted at `root` with all other settings defaulted
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FORMULARY_ROOT` if set
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(ROOT_ENV)
            && !root.is_empty()
        {
            self.root = PathBuf::from(root);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(Error::ConfigError("jobs must be at least 1".to_string()));
        }
        if self.max_parallelism == 0 {
            return Err(Error::ConfigError(
                "max_parallelism must be at least 1".to_string(),
            ));
        }
        if self.step_timeout.is_zero() {
            return Err(Error::ConfigError(
                "step_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.root.join("Cellar")
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.root.join("opt")
    }

    pub fn etc_dir(&self) -> PathBuf {
        self.root.join("etc")
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(".staging")
    }

    pub fn source_cache_dir(&self) -> PathBuf {
        self.root.join("cache").join("sources")
    }

    /// Final location of an installed keg
    pub fn keg_path(&self, name: &str, version: &str) -> PathBuf {
        self.cellar_dir().join(name).join(version)
    }

    /// Stable link to the current keg of `name`
    pub fn opt_path(&self, name: &str) -> PathBuf {
        self.opt_dir().join(name)
    }
}

/// Durations in TOML are whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.jobs >= 1);
        assert!(config.max_parallelism >= 1);
        assert_eq!(config.step_timeout, Duration::from_secs(3600));
        assert!(!config.stop_on_first_failure);
    }

    #[test]
    fn test_derived_paths() {
        let config = EngineConfig::with_root("/tmp/fy");
        assert_eq!(config.cellar_dir(), PathBuf::from("/tmp/fy/Cellar"));
        assert_eq!(
            config.keg_path("openssh", "6.5p1"),
            PathBuf::from("/tmp/fy/Cellar/openssh/6.5p1")
        );
        assert_eq!(config.opt_path("openssl"), PathBuf::from("/tmp/fy/opt/openssl"));
        assert_eq!(
            config.source_cache_dir(),
            PathBuf::from("/tmp/fy/cache/sources")
        );
    }

    #[test]
    fn test_from_toml_partial() {
        let config = EngineConfig::from_toml(
            r#"
root = "/opt/fy"
jobs = 2
step_timeout = 30
stop_on_first_failure = true
"#,
        )
        .unwrap();
        assert_eq!(config.root, PathBuf::from("/opt/fy"));
        assert_eq!(config.jobs, 2);
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert!(config.stop_on_first_failure);
        assert_eq!(config.base_path, DEFAULT_PATH);
    }

    #[test]
    fn test_from_toml_rejects_zero_parallelism() {
        let err = EngineConfig::from_toml("max_parallelism = 0").unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_from_toml_rejects_unknown_key() {
        assert!(EngineConfig::from_toml("colour = \"blue\"").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = EngineConfig::load(Path::new("/nonexistent/formulary.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
