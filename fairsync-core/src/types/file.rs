//! The file identity model shared by local and remote files.

use std::collections::BTreeMap;

use crate::Result;

/// Files of a dataset keyed by their relative path.
pub type FileMap<F> = BTreeMap<String, F>;

/// A file of a dataset, local or remote.
///
/// Paths are relative to the dataset root and always use `/` as separator.
pub trait File {
    /// Relative path of the file, possibly with directories.
    fn path(&self) -> &str;

    /// Size in bytes, if known.
    fn size(&self) -> Result<Option<u64>>;

    /// Content type, if known.
    fn content_type(&self) -> Result<Option<String>>;

    /// MD5 checksum, if known. Local files always compute one.
    fn md5(&self) -> Result<Option<String>>;

    /// Base name of the file.
    fn name(&self) -> &str {
        file_name(self.path())
    }

    /// A simple file has no directory component.
    fn is_simple(&self) -> bool {
        self.path() == self.name()
    }

    /// Whether `identifier` names this file (name, path or checksum).
    fn matches(&self, identifier: &str) -> bool {
        if identifier == self.name() || identifier == self.path() {
            return true;
        }
        matches!(self.md5(), Ok(Some(md5)) if md5.eq_ignore_ascii_case(identifier))
    }
}

/// Two files hold the same content when both size and checksum agree.
///
/// Checksums compare case-insensitively; backends differ in hex case.
pub fn same_content(a: &impl File, b: &impl File) -> Result<bool> {
    if a.size()? != b.size()? {
        return Ok(false);
    }
    Ok(match (a.md5()?, b.md5()?) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(&y),
        (x, y) => x == y,
    })
}

/// Last segment of a `/`-separated path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// First segment of a `/`-separated path.
pub fn top_level(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// Progress of a transfer or an extraction.
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// Relative path of the file being transferred.
    pub file: &'a str,
    /// Bytes of this file handled so far.
    pub current_size: u64,
    /// Total size of the whole operation, when known.
    pub total_size: Option<u64>,
    /// Bytes of the whole operation handled so far.
    pub current_total_size: Option<u64>,
}

impl<'a> Progress<'a> {
    pub fn file(file: &'a str, current_size: u64) -> Self {
        Self {
            file,
            current_size,
            total_size: None,
            current_total_size: None,
        }
    }

    pub fn with_totals(mut self, total_size: u64, current_total_size: u64) -> Self {
        self.total_size = Some(total_size);
        self.current_total_size = Some(current_total_size);
        self
    }
}

/// Progress callback. It must not panic; callers never guard it.
pub type Notify<'n> = &'n (dyn Fn(Progress<'_>) + Sync);

pub(crate) fn notify(callback: Option<Notify<'_>>, progress: Progress<'_>) {
    if let Some(callback) = callback {
        callback(progress);
    }
}
