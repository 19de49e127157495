//! Temporary dataset directories.

use std::io::Write;
use std::path::{Path, PathBuf};

use fs_err as fs;
use tempfile::TempDir;
use walkdir::WalkDir;

use fairsync_core::Result;

/// A temporary directory, removed when dropped.
pub struct TestDir {
    _temp: TempDir,
    root: PathBuf,
}

impl TestDir {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let root = temp.path().to_path_buf();
        Ok(Self { _temp: temp, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of `rel_path`.
    pub fn path(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path)
    }

    /// Write a file, creating parent directories.
    pub fn write_file(&self, rel_path: &str, contents: &[u8]) -> Result<PathBuf> {
        let path = self.path(rel_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn read_file(&self, rel_path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.path(rel_path))?)
    }

    pub fn file_exists(&self, rel_path: &str) -> bool {
        self.path(rel_path).is_file()
    }

    /// Write a zip holding `members` given as `(name, contents)`.
    pub fn write_zip(&self, rel_path: &str, members: &[(&str, &[u8])]) -> Result<PathBuf> {
        let path = self.path(rel_path);
        fs::write(&path, zip_bytes(members)?)?;
        Ok(path)
    }

    /// Relative paths of all files below the root, sorted, skipping dot-files.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() || entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(files)
    }
}

/// Zip archive bytes holding `members` given as `(name, contents)`.
pub fn zip_bytes(members: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, contents) in members {
        writer.start_file(*name, options)?;
        writer.write_all(contents)?;
    }
    Ok(writer.finish()?.into_inner())
}

/// Gzip-compressed tar bytes holding `members` given as `(name, contents)`.
pub fn tar_gz_bytes(members: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents)?;
    }
    Ok(builder.into_inner()?.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_skips_dot_files_and_directories() {
        let dir = TestDir::new().unwrap();
        dir.write_file("b.txt", b"b").unwrap();
        dir.write_file("a/c.txt", b"c").unwrap();
        dir.write_file(".hidden", b"h").unwrap();
        assert_eq!(dir.list_files().unwrap(), vec!["a/c.txt", "b.txt"]);
    }

    #[test]
    fn zips_are_readable() {
        let dir = TestDir::new().unwrap();
        let path = dir.write_zip("x.zip", &[("one.txt", b"1")]).unwrap();
        let archive = zip::ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
    }

    #[test]
    fn tar_gz_is_a_gzip_stream() {
        let bytes = tar_gz_bytes(&[("one.txt", b"1")]).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }
}
