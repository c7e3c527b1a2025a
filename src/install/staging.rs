// src/install/staging.rs

//! Staging areas and keg promotion
//!
//! Every install works inside its own staging area under
//! `<root>/.staging`. Nothing is visible under `Cellar/` until
//! [`promote`] renames the staged prefix into place.
//!
//! ```text
//! <root>/.staging/openssh-6.5p1-XXXXXX/
//!   downloads/   fetched source archive
//!   patches/     fetched patches
//!   src/         unpacked source tree
//!   prefix/      install destination (%(prefix)s)
//!   destdir/     DESTDIR root for builds configured with the final keg
//!                as prefix (%(destdir)s)
//! ```

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Per-node scratch directory, removed on drop
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a fresh staging area named after `label` inside `staging_root`
    pub fn create(staging_root: &Path, label: &str) -> Result<Self> {
        fs::create_dir_all(staging_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{label}-"))
            .tempdir_in(staging_root)
            .map_err(|e| Error::IoError(format!("Failed to create staging area: {}", e)))?;

        let area = Self { dir };
        for sub in [
            area.downloads_dir(),
            area.patches_dir(),
            area.source_dir(),
            area.prefix(),
            area.destdir(),
        ] {
            fs::create_dir_all(sub)?;
        }
        debug!("Staging area: {}", area.path().display());
        Ok(area)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.path().join("downloads")
    }

    pub fn patches_dir(&self) -> PathBuf {
        self.path().join("patches")
    }

    pub fn source_dir(&self) -> PathBuf {
        self.path().join("src")
    }

    pub fn prefix(&self) -> PathBuf {
        self.path().join("prefix")
    }

    pub fn destdir(&self) -> PathBuf {
        self.path().join("destdir")
    }

    /// The tree that becomes `keg`
    ///
    /// A build that installed through `DESTDIR` leaves the keg under
    /// `destdir/<keg path>`; that tree wins over `prefix/` when present.
    pub fn staged_keg(&self, keg: &Path) -> PathBuf {
        let relative: PathBuf = keg
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        let relocated = self.destdir().join(relative);
        if relocated.is_dir() {
            relocated
        } else {
            self.prefix()
        }
    }

    /// Keep the directory on disk instead of removing it
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

/// A keg that has been moved into place but not yet committed
///
/// Any previous keg is parked next to it until [`Promotion::commit`].
/// [`Promotion::rollback`] removes the new keg and puts the previous one back.
#[derive(Debug)]
#[must_use = "a promotion must be committed or rolled back"]
pub struct Promotion {
    keg: PathBuf,
    previous: Option<PathBuf>,
}

impl Promotion {
    pub fn keg(&self) -> &Path {
        &self.keg
    }

    /// Drop the previous keg
    pub fn commit(self) {
        if let Some(aside) = &self.previous
            && let Err(e) = fs::remove_dir_all(aside)
        {
            warn!("Failed to remove previous keg {}: {}", aside.display(), e);
        }
    }

    /// Remove the new keg and restore the previous one, if any
    pub fn rollback(self) -> Result<()> {
        debug!("Rolling back promotion of {}", self.keg.display());
        if self.keg.exists() {
            fs::remove_dir_all(&self.keg).map_err(|e| {
                Error::IoError(format!("Failed to remove {}: {}", self.keg.display(), e))
            })?;
        }
        if let Some(aside) = &self.previous {
            fs::rename(aside, &self.keg).map_err(|e| {
                Error::IoError(format!(
                    "Failed to restore previous keg {}: {}",
                    self.keg.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }
}

/// Move `staged` to `keg`, parking any previous keg aside
///
/// If the move fails the previous keg is restored immediately.
pub fn promote(staged: &Path, keg: &Path) -> Result<Promotion> {
    let parent = keg
        .parent()
        .ok_or_else(|| Error::IoError(format!("Invalid keg path: {}", keg.display())))?;
    fs::create_dir_all(parent)?;

    let leaf = keg
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("keg");
    let aside = parent.join(format!(".{leaf}.previous"));

    let had_previous = keg.exists();
    if had_previous {
        if aside.exists() {
            fs::remove_dir_all(&aside)?;
        }
        fs::rename(keg, &aside)?;
    }

    if let Err(e) = move_dir_atomic(staged, keg) {
        if had_previous && let Err(restore) = fs::rename(&aside, keg) {
            warn!(
                "Failed to restore previous keg {}: {}",
                keg.display(),
                restore
            );
        }
        return Err(Error::IoError(format!(
            "Failed to promote {} to {}: {}",
            staged.display(),
            keg.display(),
            e
        )));
    }

    Ok(Promotion {
        keg: keg.to_path_buf(),
        previous: had_previous.then_some(aside),
    })
}

/// Rename a directory, copying through a sibling temp dir across filesystems
fn move_dir_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!(
                "Cross-filesystem move detected ({} -> {}), using copy fallback",
                src.display(),
                dst.display()
            );

            let parent = dst.parent().unwrap_or(Path::new("."));
            let incoming = tempfile::Builder::new()
                .prefix(".incoming-")
                .tempdir_in(parent)?;
            let copy_root = incoming.path().join("keg");
            copy_tree(src, &copy_root)?;

            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }

            fs::rename(&copy_root, dst)?;
            fs::remove_dir_all(src)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target)?;
            #[cfg(not(unix))]
            fs::copy(entry.path().parent().unwrap_or(src).join(link), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Point the opt link at `keg`, replacing any previous link atomically
#[cfg(unix)]
pub fn link_opt(keg: &Path, opt_link: &Path) -> Result<()> {
    let parent = opt_link
        .parent()
        .ok_or_else(|| Error::IoError(format!("Invalid opt path: {}", opt_link.display())))?;
    fs::create_dir_all(parent)?;

    let name = opt_link
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("link");
    let temp_link = parent.join(format!(".{name}.tmp-link"));
    if temp_link.symlink_metadata().is_ok() {
        fs::remove_file(&temp_link)?;
    }

    std::os::unix::fs::symlink(keg, &temp_link)?;
    fs::rename(&temp_link, opt_link).map_err(|e| {
        let _ = fs::remove_file(&temp_link);
        Error::IoError(format!("Failed to link {}: {}", opt_link.display(), e))
    })?;
    Ok(())
}

#[cfg(not(unix))]
pub fn link_opt(_keg: &Path, opt_link: &Path) -> Result<()> {
    Err(Error::IoError(format!(
        "opt links are not supported on this platform: {}",
        opt_link.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_layout_and_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let area = StagingArea::create(root.path(), "zlib-1.3").unwrap();
            assert!(area.prefix().is_dir());
            assert!(area.source_dir().is_dir());
            let name = area.path().file_name().unwrap().to_str().unwrap().to_string();
            assert!(name.starts_with("zlib-1.3-"));
            area.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_keep_staging() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::create(root.path(), "x-1").unwrap();
        let kept = area.keep();
        assert!(kept.exists());
    }

    #[test]
    fn test_promote_new_keg() {
        let root = tempfile::tempdir().unwrap();
        let staged = root.path().join("staged");
        fs::create_dir_all(staged.join("bin")).unwrap();
        fs::write(staged.join("bin/tool"), b"v1").unwrap();

        let keg = root.path().join("Cellar/tool/1.0");
        promote(&staged, &keg).unwrap().commit();

        assert_eq!(fs::read(keg.join("bin/tool")).unwrap(), b"v1");
        assert!(!staged.exists());
    }

    #[test]
    fn test_promote_replaces_previous_keg() {
        let root = tempfile::tempdir().unwrap();
        let keg = root.path().join("Cellar/tool/1.0");
        fs::create_dir_all(&keg).unwrap();
        fs::write(keg.join("old"), b"old").unwrap();

        let staged = root.path().join("staged");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("new"), b"new").unwrap();

        let promotion = promote(&staged, &keg).unwrap();
        assert!(root.path().join("Cellar/tool/.1.0.previous/old").exists());
        promotion.commit();
        assert!(keg.join("new").exists());
        assert!(!keg.join("old").exists());
        assert!(!root.path().join("Cellar/tool/.1.0.previous").exists());
    }

    #[test]
    fn test_promote_missing_staging_keeps_previous() {
        let root = tempfile::tempdir().unwrap();
        let keg = root.path().join("Cellar/tool/1.0");
        fs::create_dir_all(&keg).unwrap();
        fs::write(keg.join("old"), b"old").unwrap();

        assert!(promote(&root.path().join("missing"), &keg).is_err());
        assert!(keg.join("old").exists());
    }

    #[test]
    fn test_rollback_restores_previous_keg() {
        let root = tempfile::tempdir().unwrap();
        let keg = root.path().join("Cellar/tool/1.0");
        fs::create_dir_all(&keg).unwrap();
        fs::write(keg.join("old"), b"old").unwrap();

        let staged = root.path().join("staged");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("new"), b"new").unwrap();

        promote(&staged, &keg).unwrap().rollback().unwrap();
        assert_eq!(fs::read(keg.join("old")).unwrap(), b"old");
        assert!(!keg.join("new").exists());
        assert!(!root.path().join("Cellar/tool/.1.0.previous").exists());
    }

    #[test]
    fn test_rollback_of_first_install_removes_keg() {
        let root = tempfile::tempdir().unwrap();
        let staged = root.path().join("staged");
        fs::create_dir_all(&staged).unwrap();

        let keg = root.path().join("Cellar/tool/1.0");
        promote(&staged, &keg).unwrap().rollback().unwrap();
        assert!(!keg.exists());
    }

    #[test]
    fn test_staged_keg_prefers_destdir_tree() {
        let root = tempfile::tempdir().unwrap();
        let area = StagingArea::create(root.path(), "tool-1.0").unwrap();
        let keg = Path::new("/fy/Cellar/tool/1.0");
        assert_eq!(area.staged_keg(keg), area.prefix());

        let relocated = area.destdir().join("fy/Cellar/tool/1.0");
        fs::create_dir_all(relocated.join("bin")).unwrap();
        assert_eq!(area.staged_keg(keg), relocated);
    }

    #[test]
    fn test_copy_tree() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("lib/libz.a"), b"z").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink("libz.a", src.join("lib/libz.so")).unwrap();

        let dst = root.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        assert_eq!(fs::read(dst.join("lib/libz.a")).unwrap(), b"z");
        #[cfg(unix)]
        assert_eq!(
            fs::read_link(dst.join("lib/libz.so")).unwrap(),
            PathBuf::from("libz.a")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_link_opt_replaces_link() {
        let root = tempfile::tempdir().unwrap();
        let v1 = root.path().join("Cellar/tool/1.0");
        let v2 = root.path().join("Cellar/tool/2.0");
        fs::create_dir_all(&v1).unwrap();
        fs::create_dir_all(&v2).unwrap();

        let opt = root.path().join("opt/tool");
        link_opt(&v1, &opt).unwrap();
        assert_eq!(fs::read_link(&opt).unwrap(), v1);
        link_opt(&v2, &opt).unwrap();
        assert_eq!(fs::read_link(&opt).unwrap(), v2);
    }
}
