//! Files on the local filesystem.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs_err as fs;
use once_cell::sync::OnceCell;

use crate::helpers::{archive, hash, mime};
use crate::types::file::{File, Notify};
use crate::{Error, Result};

/// A file on disk, addressed relative to a base directory.
#[derive(Debug, Clone)]
pub struct LocalFile {
    fullpath: PathBuf,
    path: String,
    size: u64,
    modified: SystemTime,
    md5: OnceCell<String>,
}

impl LocalFile {
    /// Stat `fullpath`. Its relative path is taken against `basepath`, or is
    /// the bare file name without one.
    pub fn new(fullpath: impl Into<PathBuf>, basepath: Option<&Path>) -> Result<Self> {
        let fullpath = fullpath.into();
        let meta = fs::metadata(&fullpath)?;
        if !meta.is_file() {
            return Err(Error::not_found(format!(
                "not a file: {}",
                fullpath.display()
            )));
        }

        let relative = match basepath {
            Some(base) => fullpath.strip_prefix(base).map_err(|_| {
                Error::not_found(format!(
                    "{} is not under {}",
                    fullpath.display(),
                    base.display()
                ))
            })?,
            None => Path::new(fullpath.file_name().unwrap_or_default()),
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        Ok(Self {
            path,
            size: meta.len(),
            modified: meta.modified()?,
            fullpath,
            md5: OnceCell::new(),
        })
    }

    /// Seed the checksum, e.g. from a cache or a verified download.
    pub fn with_md5(self, md5: impl Into<String>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(md5.into());
        Self { md5: cell, ..self }
    }

    pub fn fullpath(&self) -> &Path {
        &self.fullpath
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Checksum if already known, without touching the disk.
    pub fn known_md5(&self) -> Option<&str> {
        self.md5.get().map(String::as_str)
    }

    /// Checksum, computed once and cached.
    pub fn compute_md5(&self) -> Result<&str> {
        self.md5
            .get_or_try_init(|| {
                log::debug!("Computing MD5 of {}", self.fullpath.display());
                hash::md5_file(&self.fullpath)
            })
            .map(String::as_str)
    }

    pub fn archive_kind(&self) -> Result<Option<archive::ArchiveKind>> {
        archive::sniff(&self.fullpath)
    }

    pub fn is_archive(&self) -> Result<bool> {
        Ok(self.archive_kind()?.is_some())
    }

    /// Extract this archive into `dest`, returning the extracted entry names.
    pub fn extract(&self, dest: &Path, callback: Option<Notify<'_>>) -> Result<Vec<String>> {
        archive::extract(&self.fullpath, dest, callback)
    }

    /// Extract this archive into `dest` and delete it.
    pub fn unpack(self, dest: &Path, callback: Option<Notify<'_>>) -> Result<Vec<String>> {
        archive::extract_and_remove(&self.fullpath, dest, callback)
    }
}

impl File for LocalFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> Result<Option<u64>> {
        Ok(Some(self.size))
    }

    fn content_type(&self) -> Result<Option<String>> {
        Ok(mime::guess(&self.path).map(String::from))
    }

    fn md5(&self) -> Result<Option<String>> {
        self.compute_md5().map(|md5| Some(md5.to_string()))
    }

    fn matches(&self, identifier: &str) -> bool {
        if identifier == self.name() || identifier == self.path {
            return true;
        }
        if Path::new(identifier) == self.fullpath {
            return true;
        }
        matches!(self.compute_md5(), Ok(md5) if md5.eq_ignore_ascii_case(identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_uses_forward_slashes() {
        let tmp = tempfile::tempdir().unwrap();
        let full = tmp.path().join("data").join("sub").join("x.csv");
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(&full, b"1,2,3").unwrap();

        let file = LocalFile::new(&full, Some(tmp.path())).unwrap();
        assert_eq!(file.path(), "data/sub/x.csv");
        assert_eq!(file.name(), "x.csv");
        assert!(!file.is_simple());
        assert_eq!(file.size().unwrap(), Some(5));
        assert_eq!(file.content_type().unwrap().as_deref(), Some("text/csv"));

        let bare = LocalFile::new(&full, None).unwrap();
        assert_eq!(bare.path(), "x.csv");
        assert!(bare.is_simple());
    }

    #[test]
    fn md5_is_lazy_and_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let full = tmp.path().join("a.txt");
        fs::write(&full, b"hello").unwrap();

        let file = LocalFile::new(&full, Some(tmp.path())).unwrap();
        assert_eq!(file.known_md5(), None);
        assert_eq!(file.compute_md5().unwrap(), "5d41402abc4b2a76b9719d911017c592");
        assert!(file.known_md5().is_some());
    }

    #[test]
    fn seeded_md5_is_trusted() {
        let tmp = tempfile::tempdir().unwrap();
        let full = tmp.path().join("a.txt");
        fs::write(&full, b"hello").unwrap();

        let file = LocalFile::new(&full, None).unwrap().with_md5("cached");
        assert_eq!(file.md5().unwrap().as_deref(), Some("cached"));
        assert!(file.matches("cached"));
        assert!(file.matches(full.to_str().unwrap()));
    }

    #[test]
    fn extract_keeps_the_archive_and_unpack_removes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let member = tmp.path().join("a.txt");
        fs::write(&member, b"hello").unwrap();
        let zip = tmp.path().join("a.zip");
        archive::write_zip(&zip, &[(member, "inner/a.txt".into())], archive::ArchiveMethod::Store).unwrap();
        let file = LocalFile::new(&zip, Some(tmp.path())).unwrap();
        assert!(file.is_archive().unwrap());

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        assert_eq!(file.extract(&out, None).unwrap(), vec!["inner/a.txt"]);
        assert!(zip.is_file());

        assert_eq!(file.unpack(tmp.path(), None).unwrap(), vec!["inner/a.txt"]);
        assert!(!zip.exists());
        assert_eq!(fs::read(tmp.path().join("inner/a.txt")).unwrap(), b"hello");
    }

    #[test]
    fn directories_are_not_files() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(LocalFile::new(tmp.path(), None).is_err());
    }
}
