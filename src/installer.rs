// src/installer.rs

//! Package archive download and extraction
//!
//! An install is two independently failable steps:
//! 1. Stream the ZIP archive into a temporary file in the staging directory
//! 2. Unpack every entry into `<install root>/<package name>`
//!
//! The temporary archive is deleted on every exit path. A failed extraction
//! may leave partial files behind; the installed registry, which is only
//! updated by the caller after success, stays the source of truth.

use crate::error::{Error, Result};
use crate::manifest::PackageDescriptor;
use crate::progress::{DOWNLOADING, EXTRACTING, ProgressSink};
use crate::transport::Transport;
use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Result of a completed install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    /// Directory the package was unpacked into
    pub dir: PathBuf,
    /// Size of the downloaded archive
    pub archive_bytes: u64,
    /// Number of archive entries written
    pub entries: usize,
}

/// Downloads and unpacks package archives
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    install_root: PathBuf,
    staging_dir: PathBuf,
}

impl ArchiveInstaller {
    pub fn new(install_root: impl Into<PathBuf>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            staging_dir: staging_dir.into(),
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Directory a package is unpacked into
    ///
    /// The name must be a single plain path component so the directory is
    /// always a direct child of the install root.
    pub fn package_dir(&self, package_name: &str) -> Result<PathBuf> {
        let mut components = Path::new(package_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if part == package_name => {
                Ok(self.install_root.join(package_name))
            }
            _ => Err(install_error(
                package_name,
                "package name is not a plain directory name",
            )),
        }
    }

    /// Download the package archive and unpack it
    pub fn install(
        &self,
        descriptor: &PackageDescriptor,
        transport: &dyn Transport,
        progress: &mut dyn ProgressSink,
    ) -> Result<Installation> {
        let name = &descriptor.name;
        let dir = self.package_dir(name)?;
        info!("Installing {} {}", name, descriptor.version);

        fs::create_dir_all(&self.staging_dir)
            .map_err(|e| Error::filesystem(&self.staging_dir, e))?;

        let mut archive = tempfile::Builder::new()
            .prefix(&format!("{}-", name))
            .suffix(".zip")
            .tempfile_in(&self.staging_dir)
            .map_err(|e| Error::filesystem(&self.staging_dir, e))?;

        let archive_bytes = {
            let mut on_chunk = |downloaded: u64, total: u64| {
                progress.progress(downloaded, total, DOWNLOADING);
            };
            transport.download(&descriptor.archive_url, archive.as_file_mut(), &mut on_chunk)?
        };
        debug!(
            "Downloaded {} bytes to {}",
            archive_bytes,
            archive.path().display()
        );

        let reader = archive
            .reopen()
            .map_err(|e| Error::filesystem(archive.path(), e))?;
        let entries = self.extract(reader, name, progress)?;

        // `archive` is dropped here, removing the temporary file
        info!("Installed {} into {} ({} entries)", name, dir.display(), entries);

        Ok(Installation {
            dir,
            archive_bytes,
            entries,
        })
    }

    /// Unpack every entry of a ZIP archive into the package directory
    ///
    /// Archives that wrap everything in a single top-level folder named after
    /// the package are unpacked without repeating that folder. Entries whose
    /// paths would escape the destination are skipped.
    pub fn extract<R: Read + Seek>(
        &self,
        reader: R,
        package_name: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<usize> {
        let mut archive =
            ZipArchive::new(reader).map_err(|e| install_error(package_name, e))?;

        let dest = self.package_dir(package_name)?;
        fs::create_dir_all(&dest).map_err(|e| Error::filesystem(&dest, e))?;

        let strip_root = wrapped_in_package_folder(&mut archive, package_name);
        let total = archive.len() as u64;
        let mut written = 0;

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| install_error(package_name, e))?;

            let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
                warn!("Skipping unsafe archive entry: {}", entry.name());
                progress.progress(index as u64 + 1, total, EXTRACTING);
                continue;
            };

            let relative = if strip_root {
                relative.components().skip(1).collect::<PathBuf>()
            } else {
                relative
            };

            let out_path = dest.join(&relative);
            if entry.is_dir() || relative.as_os_str().is_empty() {
                fs::create_dir_all(&out_path).map_err(|e| Error::filesystem(&out_path, e))?;
            } else {
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::filesystem(parent, e))?;
                }
                let mut outfile =
                    File::create(&out_path).map_err(|e| Error::filesystem(&out_path, e))?;
                io::copy(&mut entry, &mut outfile)
                    .map_err(|e| install_error(package_name, format!("{}: {}", entry.name(), e)))?;
                apply_mode(&out_path, entry.unix_mode())?;
            }

            written += 1;
            progress.progress(index as u64 + 1, total, EXTRACTING);
        }

        Ok(written)
    }
}

fn install_error(package: &str, reason: impl ToString) -> Error {
    Error::InstallError {
        package: package.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
            .map_err(|e| Error::filesystem(path, e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// True if every entry sits below a single folder named like the package
fn wrapped_in_package_folder<R: Read + Seek>(archive: &mut ZipArchive<R>, package_name: &str) -> bool {
    let mut nested = false;

    for index in 0..archive.len() {
        let Ok(entry) = archive.by_index_raw(index) else {
            return false;
        };
        let Some(path) = entry.enclosed_name() else {
            continue;
        };

        let mut components = path.components();
        match components.next() {
            Some(Component::Normal(first))
                if first.to_string_lossy().eq_ignore_ascii_case(package_name) => {}
            _ => return false,
        }
        if components.next().is_some() {
            nested = true;
        }
    }

    nested
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use std::cell::RefCell;
    use std::io::{Cursor, Write};
    use zip::write::FileOptions;

    /// Transport serving one archive and recording requested URLs
    struct ArchiveServer {
        archive: Vec<u8>,
        requested: RefCell<Vec<String>>,
    }

    impl ArchiveServer {
        fn new(archive: Vec<u8>) -> Self {
            Self {
                archive,
                requested: RefCell::new(Vec::new()),
            }
        }
    }

    impl Transport for ArchiveServer {
        fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
            Err(Error::fetch(url, "not a manifest endpoint"))
        }

        fn download(
            &self,
            url: &str,
            sink: &mut dyn Write,
            on_chunk: &mut dyn FnMut(u64, u64),
        ) -> Result<u64> {
            self.requested.borrow_mut().push(url.to_string());
            sink.write_all(&self.archive)?;
            let total = self.archive.len() as u64;
            on_chunk(total, total);
            Ok(total)
        }
    }

    fn descriptor(name: &str) -> PackageDescriptor {
        PackageDescriptor::new(name, "1.0", "fake://archive.zip")
    }

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, contents) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, FileOptions::default()).unwrap();
            } else {
                writer.start_file(*name, FileOptions::default()).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn installer_in(dir: &Path) -> ArchiveInstaller {
        ArchiveInstaller::new(dir.join("programs"), dir.join("data"))
    }

    #[test]
    fn test_extract_into_package_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let installer = installer_in(temp_dir.path());
        let zip = build_zip(&[
            ("widget.exe", "MZ"),
            ("assets/", ""),
            ("assets/icon.png", "png"),
        ]);

        let mut reports = Vec::new();
        let mut sink = |current: u64, total: u64, label: &str| {
            reports.push((current, total, label.to_string()));
        };
        let written = installer
            .extract(Cursor::new(zip), "Widget", &mut sink)
            .unwrap();

        assert_eq!(written, 3);
        let dir = temp_dir.path().join("programs/Widget");
        assert_eq!(fs::read(dir.join("widget.exe")).unwrap(), b"MZ");
        assert_eq!(fs::read(dir.join("assets/icon.png")).unwrap(), b"png");

        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2], (3, 3, EXTRACTING.to_string()));
    }

    #[test]
    fn test_extract_strips_matching_top_folder() {
        let temp_dir = tempfile::tempdir().unwrap();
        let installer = installer_in(temp_dir.path());
        let zip = build_zip(&[
            ("widget/", ""),
            ("widget/Widget.exe", "MZ"),
            ("widget/lib/core.dll", "dll"),
        ]);

        installer
            .extract(Cursor::new(zip), "Widget", &mut NoProgress)
            .unwrap();

        let dir = temp_dir.path().join("programs/Widget");
        assert!(dir.join("Widget.exe").is_file());
        assert!(dir.join("lib/core.dll").is_file());
        assert!(!dir.join("widget").exists());
    }

    #[test]
    fn test_extract_keeps_unrelated_top_folder() {
        let temp_dir = tempfile::tempdir().unwrap();
        let installer = installer_in(temp_dir.path());
        let zip = build_zip(&[("bin/tool", "#!/bin/sh")]);

        installer
            .extract(Cursor::new(zip), "Widget", &mut NoProgress)
            .unwrap();

        assert!(temp_dir.path().join("programs/Widget/bin/tool").is_file());
    }

    #[test]
    fn test_extract_skips_escaping_entries() {
        let temp_dir = tempfile::tempdir().unwrap();
        let installer = installer_in(temp_dir.path());
        let zip = build_zip(&[("../evil.txt", "x"), ("ok.txt", "y")]);

        let written = installer
            .extract(Cursor::new(zip), "Widget", &mut NoProgress)
            .unwrap();

        assert_eq!(written, 1);
        assert!(!temp_dir.path().join("programs/evil.txt").exists());
        assert!(temp_dir.path().join("programs/Widget/ok.txt").is_file());
    }

    #[test]
    fn test_extract_corrupt_archive_is_install_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let installer = installer_in(temp_dir.path());

        let result = installer.extract(
            Cursor::new(b"definitely not a zip".to_vec()),
            "Widget",
            &mut NoProgress,
        );
        assert!(matches!(result, Err(Error::InstallError { .. })));
    }

    #[test]
    fn test_install_downloads_and_unpacks() {
        let temp_dir = tempfile::tempdir().unwrap();
        let installer = installer_in(temp_dir.path());
        let zip = build_zip(&[("Widget.exe", "MZ"), ("lib/core.dll", "dll")]);
        let server = ArchiveServer::new(zip.clone());

        let installation = installer
            .install(&descriptor("Widget"), &server, &mut NoProgress)
            .unwrap();

        assert_eq!(installation.dir, temp_dir.path().join("programs/Widget"));
        assert_eq!(installation.archive_bytes, zip.len() as u64);
        assert_eq!(installation.entries, 2);
        assert!(installation.dir.join("lib/core.dll").is_file());

        // The temporary archive is gone
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path().join("data"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_package_dir_rejects_path_like_names() {
        let installer = installer_in(Path::new("/opt/opm"));

        for name in ["..", ".", "", "/abs", "a/../..", "nested/dir", "a/."] {
            assert!(
                matches!(installer.package_dir(name), Err(Error::InstallError { .. })),
                "{:?} should be rejected",
                name
            );
        }
        assert_eq!(
            installer.package_dir("Widget").unwrap(),
            PathBuf::from("/opt/opm/programs/Widget")
        );
    }

    #[test]
    fn test_install_rejects_unsafe_name_before_download() {
        let temp_dir = tempfile::tempdir().unwrap();
        let installer = installer_in(temp_dir.path());
        let server = ArchiveServer::new(build_zip(&[("manual.txt", "read me")]));

        for name in ["..", "", "/abs"] {
            let result = installer.install(&descriptor(name), &server, &mut NoProgress);
            assert!(matches!(result, Err(Error::InstallError { .. })));
        }

        assert!(server.requested.borrow().is_empty());
        assert!(!temp_dir.path().join("manual.txt").exists());
        assert!(!temp_dir.path().join("data").exists());
    }
}
