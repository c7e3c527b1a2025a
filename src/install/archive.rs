// src/install/archive.rs

//! Source archive extraction

use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;
use xz2::read::XzDecoder;

use crate::error::{Error, Result};

/// Archive formats recognised by file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarXz,
    /// Not an archive; copied into the source tree unchanged
    Plain,
}

impl ArchiveFormat {
    pub fn detect(path: &Path) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Self::TarXz
        } else if name.ends_with(".tar") {
            Self::Tar
        } else {
            Self::Plain
        }
    }
}

/// Extract `archive` into `dest` and return the source root
///
/// Most upstream tarballs contain a single top-level directory
/// (`openssh-6.5p1/`); when they do, that directory is the source root.
pub fn unpack_source(archive: &Path, dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest)?;

    let format = ArchiveFormat::detect(archive);
    debug!("Unpacking {} as {:?}", archive.display(), format);

    let file = File::open(archive)
        .map_err(|e| Error::IoError(format!("Failed to open {}: {}", archive.display(), e)))?;

    let reader: Box<dyn Read> = match format {
        ArchiveFormat::Tar => Box::new(file),
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(file)),
        ArchiveFormat::Plain => {
            let name = archive
                .file_name()
                .ok_or_else(|| Error::IoError(format!("No file name: {}", archive.display())))?;
            fs::copy(archive, dest.join(name))?;
            return Ok(dest.to_path_buf());
        }
    };

    Archive::new(reader).unpack(dest).map_err(|e| {
        Error::IoError(format!("Failed to extract {}: {}", archive.display(), e))
    })?;

    let entries: Vec<_> = fs::read_dir(dest)?.filter_map(|e| e.ok()).collect();
    if entries.len() == 1 && entries[0].file_type().map(|t| t.is_dir()).unwrap_or(false) {
        let root = entries[0].path();
        debug!("Source directory: {}", root.display());
        return Ok(root);
    }

    Ok(dest.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn write_tarball(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar.gz")), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::detect(Path::new("a.TGZ")), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar.xz")), ArchiveFormat::TarXz);
        assert_eq!(ArchiveFormat::detect(Path::new("a.tar")), ArchiveFormat::Tar);
        assert_eq!(ArchiveFormat::detect(Path::new("a.patch")), ArchiveFormat::Plain);
    }

    #[test]
    fn test_single_top_level_dir_becomes_root() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("hello-1.0.tar.gz");
        write_tarball(
            &archive,
            &[("hello-1.0/configure", b"#!/bin/sh\n"), ("hello-1.0/README", b"hi")],
        );

        let root = unpack_source(&archive, &dir.path().join("src")).unwrap();
        assert!(root.ends_with("hello-1.0"));
        assert!(root.join("README").exists());
    }

    #[test]
    fn test_flat_archive_root_is_dest() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("flat.tar.gz");
        write_tarball(&archive, &[("a.txt", b"a"), ("b.txt", b"b")]);

        let dest = dir.path().join("src");
        assert_eq!(unpack_source(&archive, &dest).unwrap(), dest);
    }

    #[test]
    fn test_plain_file_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("install.sh");
        fs::write(&script, b"echo hi").unwrap();

        let dest = dir.path().join("src");
        let root = unpack_source(&script, &dest).unwrap();
        assert_eq!(root, dest);
        assert!(dest.join("install.sh").exists());
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bad.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();
        assert!(unpack_source(&archive, &dir.path().join("src")).is_err());
    }
}
