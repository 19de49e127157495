//! Zip and tar archives: detection, creation and safe extraction.

use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::types::file::{notify, Notify, Progress};
use crate::{Error, Result};

/// Extensions that are zip containers but never treated as archives.
pub const NO_EXTRACT: &[&str] = &["docx", "xlsx", "pptx"];

const TAR_MAGIC_OFFSET: usize = 257;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Tar,
    TarGz,
    TarBz2,
}

/// Detect the archive kind of a file from its leading bytes.
pub fn sniff(path: impl AsRef<Path>) -> Result<Option<ArchiveKind>> {
    let path = path.as_ref();
    let excluded = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| NO_EXTRACT.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    if excluded {
        return Ok(None);
    }

    let mut head = Vec::with_capacity(512);
    fs::File::open(path)?.take(512).read_to_end(&mut head)?;

    if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
        return Ok(Some(ArchiveKind::Zip));
    }
    let kind = if head.starts_with(&[0x1f, 0x8b]) {
        ArchiveKind::TarGz
    } else if head.starts_with(b"BZh") {
        ArchiveKind::TarBz2
    } else {
        ArchiveKind::Tar
    };
    if kind != ArchiveKind::Tar {
        // A compressed stream is only an archive if it holds a tar.
        head.clear();
        if let Err(e) = tar_stream(path, kind)?.take(512).read_to_end(&mut head) {
            log::debug!("{} is not a readable {:?} stream: {}", path.display(), kind, e);
            return Ok(None);
        }
    }
    if head.len() >= TAR_MAGIC_OFFSET + 5
        && &head[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == b"ustar"
    {
        return Ok(Some(kind));
    }
    Ok(None)
}

const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar.bz2", ".tbz2", ".tbz", ".tar", ".zip"];

/// Archive file name without its archive extension.
pub fn stem(file_name: &str) -> &str {
    let lower = file_name.to_ascii_lowercase();
    ARCHIVE_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix) && lower.len() > suffix.len())
        .map(|suffix| &file_name[..file_name.len() - suffix.len()])
        .unwrap_or(file_name)
}

/// Decompressed tar stream of `path`.
fn tar_stream(path: &Path, kind: ArchiveKind) -> Result<Box<dyn Read>> {
    let file = fs::File::open(path)?;
    Ok(match kind {
        ArchiveKind::TarGz => Box::new(flate2::read::MultiGzDecoder::new(file)),
        ArchiveKind::TarBz2 => Box::new(bzip2::read::MultiBzDecoder::new(file)),
        ArchiveKind::Tar | ArchiveKind::Zip => Box::new(file),
    })
}

/// Compression method of archives built for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMethod {
    Store,
    #[default]
    Deflate,
    Bzip2,
    Lzma,
}

impl ArchiveMethod {
    fn compression(self) -> Result<zip::CompressionMethod> {
        match self {
            ArchiveMethod::Store => Ok(zip::CompressionMethod::Stored),
            ArchiveMethod::Deflate => Ok(zip::CompressionMethod::Deflated),
            ArchiveMethod::Bzip2 => Ok(zip::CompressionMethod::Bzip2),
            // zip can read lzma entries but cannot write them
            ArchiveMethod::Lzma => Err(Error::InvalidArchiveMethod("lzma".to_string())),
        }
    }
}

impl FromStr for ArchiveMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "store" => Ok(ArchiveMethod::Store),
            "deflate" => Ok(ArchiveMethod::Deflate),
            "bzip2" => Ok(ArchiveMethod::Bzip2),
            "lzma" => Ok(ArchiveMethod::Lzma),
            other => Err(Error::InvalidArchiveMethod(other.to_string())),
        }
    }
}

/// Write a zip archive holding `members` given as `(source, name in archive)`.
pub fn write_zip(dest: &Path, members: &[(PathBuf, String)], method: ArchiveMethod) -> Result<()> {
    let compression = method.compression()?;
    let mut writer = zip::ZipWriter::new(fs::File::create(dest)?);
    for (source, name) in members {
        let size = fs::metadata(source)?.len();
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(compression)
            .large_file(size > u32::MAX as u64);
        writer.start_file(name.as_str(), options)?;
        let mut input = fs::File::open(source)?;
        io::copy(&mut input, &mut writer)?;
    }
    writer.finish()?;
    log::debug!("Wrote {} members to {}", members.len(), dest.display());
    Ok(())
}

/// Extract an archive into `dest`, returning the names of the extracted entries.
///
/// Every member path is validated before anything is written.
pub fn extract(archive: &Path, dest: &Path, callback: Option<Notify<'_>>) -> Result<Vec<String>> {
    if !dest.is_dir() {
        return Err(Error::NotADirectory {
            path: dest.to_path_buf(),
        });
    }
    match sniff(archive)? {
        Some(ArchiveKind::Zip) => extract_zip(archive, dest, callback),
        Some(kind) => extract_tar(archive, kind, dest, callback),
        None => Err(Error::NotAnArchive {
            path: archive.to_path_buf(),
        }),
    }
}

/// Extract an archive into `dest`, then delete the archive.
///
/// The archive is moved to a hidden sibling first, so a member named like
/// the archive itself lands next to it instead of over it.
pub fn extract_and_remove(archive: &Path, dest: &Path, callback: Option<Notify<'_>>) -> Result<Vec<String>> {
    let file_name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| Error::NotAnArchive {
            path: archive.to_path_buf(),
        })?;
    let aside = archive.with_file_name(format!(".{file_name}.unpacking"));
    fs::rename(archive, &aside)?;

    match extract(&aside, dest, callback) {
        Ok(names) => {
            fs::remove_file(&aside)?;
            Ok(names)
        }
        Err(e) => {
            if let Err(restore) = fs::rename(&aside, archive) {
                log::warn!("Failed to restore {}: {}", archive.display(), restore);
            }
            Err(e)
        }
    }
}

fn to_name(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_safe(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn extract_zip(archive: &Path, dest: &Path, callback: Option<Notify<'_>>) -> Result<Vec<String>> {
    let mut zip = zip::ZipArchive::new(fs::File::open(archive)?)?;

    let mut entries = Vec::with_capacity(zip.len());
    let mut total_size = 0;
    for i in 0..zip.len() {
        let entry = zip.by_index(i)?;
        let relative = entry
            .enclosed_name()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| Error::UnsafeArchiveMember {
                name: entry.name().to_string(),
            })?;
        total_size += entry.size();
        entries.push(relative);
    }

    let mut names = Vec::with_capacity(entries.len());
    let mut current_total = 0;
    for (i, relative) in entries.into_iter().enumerate() {
        let mut entry = zip.by_index(i)?;
        let target = dest.join(&relative);
        let name = to_name(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target)?;
            let size = io::copy(&mut entry, &mut out)?;
            current_total += size;
            notify(
                callback,
                Progress::file(&name, size).with_totals(total_size, current_total),
            );
        }
        names.push(name);
    }
    log::debug!("Extracted {} zip entries from {}", names.len(), archive.display());
    Ok(names)
}

struct Attrs {
    path: PathBuf,
    mode: u32,
    mtime: u64,
}

fn extract_tar(
    archive: &Path,
    kind: ArchiveKind,
    dest: &Path,
    callback: Option<Notify<'_>>,
) -> Result<Vec<String>> {
    // Validate every member before writing anything.
    let mut total_size = 0;
    let mut reader = tar::Archive::new(tar_stream(archive, kind)?);
    for entry in reader.entries()? {
        let entry = entry?;
        let path = entry.path()?;
        if !is_safe(&path) {
            return Err(Error::UnsafeArchiveMember {
                name: path.display().to_string(),
            });
        }
        total_size += entry.size();
    }

    let mut reader = tar::Archive::new(tar_stream(archive, kind)?);
    reader.set_preserve_permissions(false);
    reader.set_preserve_mtime(false);

    let mut names = Vec::new();
    let mut attrs = Vec::new();
    let mut current_total = 0;
    for entry in reader.entries()? {
        let mut entry = entry?;
        let relative = entry.path()?.into_owned();
        let name = to_name(&relative);
        let target = dest.join(&relative);
        attrs.push(Attrs {
            path: target.clone(),
            mode: entry.header().mode()?,
            mtime: entry.header().mtime()?,
        });

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&target)?;
            set_mode(&target, 0o700);
        } else {
            entry.unpack_in(dest)?;
            if kind.is_file() {
                let size = entry.size();
                current_total += size;
                notify(
                    callback,
                    Progress::file(&name, size).with_totals(total_size, current_total),
                );
            }
        }
        if !name.is_empty() {
            names.push(name);
        }
    }

    // Children first so directory times stick.
    attrs.sort_by(|a, b| b.path.cmp(&a.path));
    for item in &attrs {
        set_mode(&item.path, item.mode);
        let time = filetime::FileTime::from_unix_time(item.mtime as i64, 0);
        let _ = filetime::set_file_times(&item.path, time, time);
    }

    log::debug!("Extracted {} tar entries from {}", names.len(), archive.display());
    Ok(names)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, std::fs::Permissions::from_mode(mode & 0o7777));
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn write(dir: &Path, rel: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(1_600_000_000);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn tar_with(path: &Path, entries: &[(&str, &[u8])]) {
        fs::write(path, tar_bytes(entries)).unwrap();
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        io::Write::write_all(&mut encoder, data).unwrap();
        encoder.finish().unwrap()
    }

    fn bzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        io::Write::write_all(&mut encoder, data).unwrap();
        encoder.finish().unwrap()
    }

    /// Writes a raw tar header so names `tar::Builder` refuses can be tested.
    fn tar_with_raw_name(path: &Path, name: &str, data: &[u8]) {
        let mut header = tar::Header::new_ustar();
        {
            let bytes = header.as_mut_bytes();
            bytes[..name.len()].copy_from_slice(name.as_bytes());
        }
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        let mut out = Vec::new();
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(data);
        out.resize(out.len().div_ceil(512) * 512, 0);
        out.extend_from_slice(&[0u8; 1024]);
        fs::write(path, out).unwrap();
    }

    #[test]
    fn sniff_detects_zip_and_tar() {
        let tmp = tempfile::tempdir().unwrap();
        let src = write(tmp.path(), "a.txt", b"hello");
        let zip_path = tmp.path().join("a.zip");
        write_zip(&zip_path, &[(src.clone(), "a.txt".into())], ArchiveMethod::Deflate).unwrap();
        assert_eq!(sniff(&zip_path).unwrap(), Some(ArchiveKind::Zip));

        let tar_path = tmp.path().join("a.tar");
        tar_with(&tar_path, &[("a.txt", b"hello")]);
        assert_eq!(sniff(&tar_path).unwrap(), Some(ArchiveKind::Tar));

        assert_eq!(sniff(&src).unwrap(), None);
    }

    #[test]
    fn compressed_tars_are_extracted() {
        let tmp = tempfile::tempdir().unwrap();
        let plain = tar_bytes(&[("data/a.csv", b"1,2"), ("data/b.csv", b"3,4")]);
        let gz = write(tmp.path(), "data.tar.gz", &gzip(&plain));
        let bz = write(tmp.path(), "data.tbz2", &bzip(&plain));
        assert_eq!(sniff(&gz).unwrap(), Some(ArchiveKind::TarGz));
        assert_eq!(sniff(&bz).unwrap(), Some(ArchiveKind::TarBz2));

        for archive in [&gz, &bz] {
            let out = tempfile::tempdir().unwrap();
            let names = extract(archive, out.path(), None).unwrap();
            assert_eq!(names, vec!["data/a.csv", "data/b.csv"]);
            assert_eq!(fs::read(out.path().join("data/b.csv")).unwrap(), b"3,4");
        }
    }

    #[test]
    fn stems_drop_archive_extensions() {
        assert_eq!(stem("data.zip"), "data");
        assert_eq!(stem("survey.tar.gz"), "survey");
        assert_eq!(stem("Survey.TGZ"), "Survey");
        assert_eq!(stem("scan.tar.bz2"), "scan");
        assert_eq!(stem("notes.txt"), "notes.txt");
        assert_eq!(stem(".zip"), ".zip");
    }

    #[test]
    fn compressed_plain_files_are_not_archives() {
        let tmp = tempfile::tempdir().unwrap();
        let gz = write(tmp.path(), "table.csv.gz", &gzip(b"a,b\n1,2\n"));
        assert_eq!(sniff(&gz).unwrap(), None);
        let bz = write(tmp.path(), "table.csv.bz2", &bzip(b"a,b\n1,2\n"));
        assert_eq!(sniff(&bz).unwrap(), None);
        let truncated = write(tmp.path(), "broken.gz", &[0x1f, 0x8b, 0x08]);
        assert_eq!(sniff(&truncated).unwrap(), None);
    }

    #[test]
    fn member_named_like_its_archive_survives() {
        let tmp = tempfile::tempdir().unwrap();
        let inner = write(tmp.path(), "src/inner", b"inner bytes");
        let outer = tmp.path().join("data.zip");
        write_zip(&outer, &[(inner, "data.zip".into())], ArchiveMethod::Deflate).unwrap();

        let names = extract_and_remove(&outer, tmp.path(), None).unwrap();
        assert_eq!(names, vec!["data.zip"]);
        assert_eq!(fs::read(&outer).unwrap(), b"inner bytes");
        assert!(!tmp.path().join(".data.zip.unpacking").exists());
    }

    #[test]
    fn failed_extraction_keeps_the_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let tar_path = tmp.path().join("evil.tar");
        tar_with_raw_name(&tar_path, "../escape.txt", b"x");
        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();

        let err = extract_and_remove(&tar_path, &out, None).unwrap_err();
        assert_eq!(err.error_type(), "unsafe_archive_member");
        assert!(tar_path.is_file());
        assert!(!tmp.path().join(".evil.tar.unpacking").exists());
    }

    #[test]
    fn office_documents_are_not_archives() {
        let tmp = tempfile::tempdir().unwrap();
        let src = write(tmp.path(), "a.txt", b"hello");
        let docx = tmp.path().join("report.docx");
        write_zip(&docx, &[(src, "word/document.xml".into())], ArchiveMethod::Store).unwrap();
        assert_eq!(sniff(&docx).unwrap(), None);
    }

    #[test]
    fn zip_roundtrip_with_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let a = write(tmp.path(), "src/data/a.csv", b"1,2");
        let b = write(tmp.path(), "src/data/sub/b.csv", b"3,4");
        let zip_path = tmp.path().join("data.zip");
        write_zip(
            &zip_path,
            &[(a, "data/a.csv".into()), (b, "data/sub/b.csv".into())],
            ArchiveMethod::Bzip2,
        )
        .unwrap();

        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();
        let seen = Mutex::new(Vec::new());
        let record = |p: Progress<'_>| seen.lock().unwrap().push((p.file.to_string(), p.current_total_size));
        let names = extract(&zip_path, &out, Some(&record)).unwrap();

        assert_eq!(names, vec!["data/a.csv", "data/sub/b.csv"]);
        assert_eq!(fs::read(out.join("data/sub/b.csv")).unwrap(), b"3,4");
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].1, Some(6));
    }

    #[test]
    fn lzma_cannot_be_written() {
        let tmp = tempfile::tempdir().unwrap();
        let err = write_zip(&tmp.path().join("x.zip"), &[], ArchiveMethod::Lzma).unwrap_err();
        assert_eq!(err.error_type(), "invalid_archive_method");
        assert_eq!("bzip2".parse::<ArchiveMethod>().unwrap(), ArchiveMethod::Bzip2);
        assert!("rar".parse::<ArchiveMethod>().is_err());
    }

    #[test]
    fn tar_restores_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        let tar_path = tmp.path().join("a.tar");
        tar_with(&tar_path, &[("dir/a.txt", b"aaa"), ("b.txt", b"b")]);
        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();

        let names = extract(&tar_path, &out, None).unwrap();
        assert_eq!(names, vec!["dir/a.txt", "b.txt"]);
        let meta = fs::metadata(out.join("dir/a.txt")).unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), 1_600_000_000);
    }

    #[test]
    fn tar_traversal_is_rejected_before_extraction() {
        let tmp = tempfile::tempdir().unwrap();
        let tar_path = tmp.path().join("evil.tar");
        tar_with_raw_name(&tar_path, "../escape.txt", b"x");
        let out = tmp.path().join("out");
        fs::create_dir(&out).unwrap();

        let err = extract(&tar_path, &out, None).unwrap_err();
        assert_eq!(err.error_type(), "unsafe_archive_member");
        assert!(!tmp.path().join("escape.txt").exists());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn extract_rejects_plain_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = write(tmp.path(), "a.txt", b"hello");
        let err = extract(&src, tmp.path(), None).unwrap_err();
        assert_eq!(err.error_type(), "not_an_archive");
    }
}
