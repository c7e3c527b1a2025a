// src/install/fetch.rs

//! Source and patch retrieval
//!
//! The executor never downloads anything itself. It asks a [`SourceFetcher`]
//! for a local copy of an artifact and only looks at the `verified` flag of
//! the answer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hash::Checksum;

/// A fetched artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSource {
    /// Local copy inside the requested destination directory
    pub path: PathBuf,
    /// Whether the copy matches the pinned checksum; artifacts without a
    /// checksum are reported verified
    pub verified: bool,
}

/// Retrieves source archives and patches
pub trait SourceFetcher: Send + Sync {
    /// Place a copy of `source` in `dest` and check it against `checksum`
    fn fetch(&self, source: &str, checksum: Option<&Checksum>, dest: &Path) -> Result<FetchedSource>;
}

/// Fetcher with a checksum-keyed download cache
///
/// Accepts local paths, `file://` URLs and `http(s)://` URLs. Remote
/// downloads go through `curl`; verified downloads are kept under
/// `cache_dir` and reused on the next fetch.
#[derive(Debug, Clone)]
pub struct CachingFetcher {
    cache_dir: PathBuf,
}

impl CachingFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn is_remote(source: &str) -> bool {
        source.starts_with("http://") || source.starts_with("https://")
    }

    /// Resolve a remote artifact to a local file, using the cache when possible
    fn download(&self, url: &str, checksum: Option<&Checksum>, dest_file: &Path) -> Result<()> {
        let Some(checksum) = checksum else {
            // Unpinned downloads are not cacheable
            return download_file(url, dest_file);
        };

        self.through_cache(checksum, dest_file, |path| {
            info!("Downloading: {}", url);
            download_file(url, path)
        })
    }

    /// Copy the cached artifact for `checksum` to `dest_file`, filling the
    /// cache with `fill` on a miss
    ///
    /// Each fill writes its own temp file in `cache_dir` and only a verified
    /// file is renamed onto the cache key, so concurrent fills of the same
    /// key never see each other's partial writes.
    fn through_cache(
        &self,
        checksum: &Checksum,
        dest_file: &Path,
        fill: impl FnOnce(&Path) -> Result<()>,
    ) -> Result<()> {
        fs::create_dir_all(&self.cache_dir)?;
        let cached_path = self.cache_dir.join(checksum.cache_key());

        if cached_path.is_file() {
            if checksum.matches_file(&cached_path)? {
                debug!("Using cached source: {}", cached_path.display());
                fs::copy(&cached_path, dest_file)?;
                return Ok(());
            }
            warn!("Cached file checksum mismatch, re-downloading");
            if let Err(e) = fs::remove_file(&cached_path)
                && e.kind() != io::ErrorKind::NotFound
            {
                return Err(e.into());
            }
        }

        let temp = NamedTempFile::new_in(&self.cache_dir).map_err(|e| {
            Error::IoError(format!(
                "Failed to create temp file in {}: {}",
                self.cache_dir.display(),
                e
            ))
        })?;
        fill(temp.path())?;
        fs::copy(temp.path(), dest_file)?;

        if !checksum.matches_file(temp.path())? {
            // Dropping the temp file removes it
            return Ok(());
        }
        if let Err(e) = temp.persist(&cached_path) {
            if cached_path.is_file() {
                debug!("Cache entry {} filled concurrently", cached_path.display());
            } else {
                warn!("Failed to cache {}: {}", cached_path.display(), e.error);
            }
        }
        Ok(())
    }
}

impl SourceFetcher for CachingFetcher {
    fn fetch(&self, source: &str, checksum: Option<&Checksum>, dest: &Path) -> Result<FetchedSource> {
        fs::create_dir_all(dest)?;
        let file_name = artifact_name(source);
        let dest_file = dest.join(file_name);

        if Self::is_remote(source) {
            self.download(source, checksum, &dest_file)?;
        } else {
            let local = Path::new(source.strip_prefix("file://").unwrap_or(source));
            if !local.is_file() {
                return Err(Error::IoError(format!(
                    "Source file not found: {}",
                    local.display()
                )));
            }
            fs::copy(local, &dest_file).map_err(|e| {
                Error::IoError(format!("Failed to copy {}: {}", local.display(), e))
            })?;
        }

        let verified = match checksum {
            Some(expected) => expected.matches_file(&dest_file)?,
            None => true,
        };

        Ok(FetchedSource {
            path: dest_file,
            verified,
        })
    }
}

/// Last path component of a URL or path
pub(crate) fn artifact_name(source: &str) -> &str {
    source
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("artifact")
}

/// Download a file with curl
fn download_file(url: &str, dest: &Path) -> Result<()> {
    let output = Command::new("curl")
        .args(["-fsSL", "-o"])
        .arg(dest)
        .arg(url)
        .output()
        .map_err(|e| Error::IoError(format!("curl failed: {}", e)))?;

    if !output.status.success() {
        return Err(Error::IoError(format!(
            "Failed to download {}: {}",
            url,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(())
}
