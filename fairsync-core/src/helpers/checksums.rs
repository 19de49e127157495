//! Checksum cache of a local dataset (`.fairly_md5`).
//!
//! One CSV row per file: `name,mtime,size,md5`, where `mtime` is seconds since
//! the epoch with nanosecond decimals. The cache is advisory: a missing file
//! or a stale row only means the checksum gets recomputed.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fs_err as fs;

use crate::types::file::File;
use crate::types::local_file::LocalFile;
use crate::Result;

pub const CHECKSUM_FILE_NAME: &str = ".fairly_md5";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    mtime: Duration,
    size: u64,
    md5: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChecksumCache {
    entries: BTreeMap<String, Entry>,
}

fn since_epoch(time: SystemTime) -> Duration {
    time.duration_since(UNIX_EPOCH).unwrap_or_default()
}

fn format_mtime(mtime: Duration) -> String {
    format!("{}.{:09}", mtime.as_secs(), mtime.subsec_nanos())
}

fn parse_mtime(value: &str) -> Option<Duration> {
    let (secs, frac) = value.split_once('.').unwrap_or((value, ""));
    let secs: u64 = secs.parse().ok()?;
    let mut digits: String = frac.chars().take(9).collect();
    while digits.len() < 9 {
        digits.push('0');
    }
    let nanos: u32 = digits.parse().ok()?;
    Some(Duration::new(secs, nanos))
}

fn quote(name: &str) -> String {
    if name.contains([',', '"']) {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

/// Split a row into the name and the remaining fields.
fn split_name(line: &str) -> Option<(String, &str)> {
    let Some(rest) = line.strip_prefix('"') else {
        let (name, rest) = line.split_once(',')?;
        return Some((name.to_string(), rest));
    };
    let mut name = String::new();
    let mut chars = rest.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '"' {
            name.push(c);
            continue;
        }
        if matches!(chars.peek(), Some((_, '"'))) {
            name.push('"');
            chars.next();
            continue;
        }
        return rest[i + 1..].strip_prefix(',').map(|tail| (name, tail));
    }
    None
}

fn parse_row(line: &str) -> Option<(String, Entry)> {
    let (name, rest) = split_name(line)?;
    let mut fields = rest.splitn(3, ',');
    let mtime = parse_mtime(fields.next()?)?;
    let size = fields.next()?.parse().ok()?;
    let md5 = fields.next()?.trim().to_string();
    if md5.is_empty() {
        return None;
    }
    Some((name, Entry { mtime, size, md5 }))
}

impl ChecksumCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the cache of the dataset at `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(CHECKSUM_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let mut cache = Self::default();
        for line in fs::read_to_string(&path)?.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_row(line) {
                Some((name, entry)) => {
                    cache.entries.insert(name, entry);
                }
                None => log::warn!("Skipping malformed row in {}: {}", path.display(), line),
            }
        }
        log::debug!("Loaded {} cached checksums", cache.entries.len());
        Ok(cache)
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let path = dir.as_ref().join(CHECKSUM_FILE_NAME);
        let mut out = String::new();
        for (name, entry) in &self.entries {
            let _ = writeln!(
                out,
                "{},{},{},{}",
                quote(name),
                format_mtime(entry.mtime),
                entry.size,
                entry.md5
            );
        }
        fs::write(&path, out)?;
        Ok(())
    }

    /// The cached checksum of `path`, only if mtime and size are unchanged.
    pub fn lookup(&self, path: &str, mtime: SystemTime, size: u64) -> Option<&str> {
        let entry = self.entries.get(path)?;
        if entry.mtime == since_epoch(mtime) && entry.size == size {
            Some(entry.md5.as_str())
        } else {
            None
        }
    }

    /// Cache a checksum. Names with line breaks cannot be stored in a row
    /// and are left out; their checksums get recomputed.
    pub fn insert(&mut self, path: impl Into<String>, mtime: SystemTime, size: u64, md5: impl Into<String>) {
        let path = path.into();
        if path.contains(['\n', '\r']) {
            log::debug!("Not caching the checksum of {:?}", path);
            return;
        }
        self.entries.insert(
            path,
            Entry {
                mtime: since_epoch(mtime),
                size,
                md5: md5.into(),
            },
        );
    }

    /// Remember the checksum of `file` if it has been computed.
    pub fn record(&mut self, file: &LocalFile) {
        if let Some(md5) = file.known_md5() {
            self.insert(file.path(), file.modified(), file.len(), md5);
        }
    }

    /// Keep only entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|name, _| keep(name));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_requires_same_mtime_and_size() {
        let mut cache = ChecksumCache::new();
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        cache.insert("a.csv", t, 10, "abc");

        assert_eq!(cache.lookup("a.csv", t, 10), Some("abc"));
        assert_eq!(cache.lookup("a.csv", t, 11), None);
        assert_eq!(cache.lookup("a.csv", t + Duration::from_nanos(1), 10), None);
        assert_eq!(cache.lookup("b.csv", t, 10), None);
    }

    #[test]
    fn save_and_load_keep_nanoseconds_and_odd_names() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = ChecksumCache::new();
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 5);
        cache.insert("dir/a,b \"c\".csv", t, 3, "abc");
        cache.insert("plain.txt", t, 0, "d41d8cd98f00b204e9800998ecf8427e");
        cache.save(tmp.path()).unwrap();

        let loaded = ChecksumCache::load(tmp.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.lookup("dir/a,b \"c\".csv", t, 3), Some("abc"));
    }

    #[test]
    fn names_with_line_breaks_are_not_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cache = ChecksumCache::new();
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 0);
        cache.insert("two\nlines.csv", t, 3, "abc");
        cache.insert("carriage\rreturn.csv", t, 3, "abc");
        cache.insert("b.csv", t, 3, "def");
        assert_eq!(cache.len(), 1);
        cache.save(tmp.path()).unwrap();

        let loaded = ChecksumCache::load(tmp.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.lookup("b.csv", t, 3), Some("def"));
        assert_eq!(loaded.lookup("two\nlines.csv", t, 3), None);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join(CHECKSUM_FILE_NAME),
            "a.csv,1.5,3,abc\nbroken\nb.csv,x,3,abc\nc.csv,1,3,\n",
        )
        .unwrap();
        let cache = ChecksumCache::load(tmp.path()).unwrap();
        assert_eq!(cache.len(), 1);
        let t = UNIX_EPOCH + Duration::from_millis(1500);
        assert_eq!(cache.lookup("a.csv", t, 3), Some("abc"));
    }

    #[test]
    fn missing_file_is_an_empty_cache() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(ChecksumCache::load(tmp.path()).unwrap().is_empty());
    }
}
