//! Part-based uploads with lock retry.
//!
//! Some backends split an upload into parts and lock parts that another
//! writer is handling. A pass uploads every part that is neither complete
//! nor locked; passes repeat until all parts are complete or the retry
//! budget is spent.

use std::io::{Read, Seek, SeekFrom};
use std::thread;
use std::time::Duration;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::types::file::{notify, File, Notify, Progress};
use crate::types::local_file::LocalFile;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PartStatus {
    Complete,
    #[serde(other)]
    Pending,
}

/// One part of a file as reported by the backend. Offsets are inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPart {
    pub part_no: u32,
    pub start_offset: u64,
    pub end_offset: u64,
    pub status: PartStatus,
    #[serde(default)]
    pub locked: bool,
}

impl UploadPart {
    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset + 1
    }

    pub fn is_empty(&self) -> bool {
        self.end_offset < self.start_offset
    }

    pub fn is_complete(&self) -> bool {
        self.status == PartStatus::Complete
    }
}

/// An upload session that accepts parts.
pub trait PartUpload {
    /// Current state of every part.
    fn parts(&self) -> Result<Vec<UploadPart>>;

    /// Send the bytes `[start_offset, end_offset]` of a part.
    fn put_part(&self, part: &UploadPart, data: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between passes that left parts incomplete.
    pub interval: Duration,
    /// Passes allowed to end incomplete before giving up.
    pub max_tries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_tries: 5,
        }
    }
}

/// Upload `file` part by part, returning the number of bytes sent.
pub fn upload_parts(
    session: &dyn PartUpload,
    file: &LocalFile,
    policy: RetryPolicy,
    callback: Option<Notify<'_>>,
) -> Result<u64> {
    let mut input = fs::File::open(file.fullpath())?;
    let mut sent = 0;
    let mut tries = 0;

    loop {
        let mut done = true;
        for part in session.parts()? {
            if part.is_complete() {
                continue;
            }
            if part.locked {
                log::debug!("Part {} of {} is locked", part.part_no, file.path());
                done = false;
                continue;
            }

            let mut data = vec![0; part.len() as usize];
            input.seek(SeekFrom::Start(part.start_offset))?;
            input.read_exact(&mut data)?;
            session.put_part(&part, &data)?;

            sent += data.len() as u64;
            notify(callback, Progress::file(file.path(), sent).with_totals(file.len(), sent));
        }

        if done {
            log::debug!("Uploaded {} bytes of {} in parts", sent, file.path());
            return Ok(sent);
        }

        tries += 1;
        if tries >= policy.max_tries {
            return Err(Error::PartsLocked {
                name: file.path().to_string(),
                tries,
            });
        }
        log::debug!("Retrying locked parts of {} ({}/{})", file.path(), tries, policy.max_tries);
        thread::sleep(policy.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Serves parts from a script; parts stay locked for a number of passes.
    struct Scripted {
        parts: Mutex<Vec<(UploadPart, u32)>>,
        received: Mutex<Vec<(u32, Vec<u8>)>>,
    }

    impl Scripted {
        fn new(size: u64, part_size: u64, locked_passes: &[u32]) -> Self {
            let mut parts = Vec::new();
            let mut start = 0;
            let mut no = 1;
            while start < size {
                let end = (start + part_size).min(size) - 1;
                let lock = locked_passes.get(no as usize - 1).copied().unwrap_or(0);
                parts.push((
                    UploadPart {
                        part_no: no,
                        start_offset: start,
                        end_offset: end,
                        status: PartStatus::Pending,
                        locked: false,
                    },
                    lock,
                ));
                start = end + 1;
                no += 1;
            }
            Self {
                parts: Mutex::new(parts),
                received: Mutex::new(Vec::new()),
            }
        }
    }

    impl PartUpload for Scripted {
        fn parts(&self) -> Result<Vec<UploadPart>> {
            let mut parts = self.parts.lock().unwrap();
            Ok(parts
                .iter_mut()
                .map(|(part, lock)| {
                    let mut view = part.clone();
                    view.locked = *lock > 0;
                    *lock = lock.saturating_sub(1);
                    view
                })
                .collect())
        }

        fn put_part(&self, part: &UploadPart, data: &[u8]) -> Result<()> {
            let mut parts = self.parts.lock().unwrap();
            for (p, _) in parts.iter_mut() {
                if p.part_no == part.part_no {
                    p.status = PartStatus::Complete;
                }
            }
            self.received.lock().unwrap().push((part.part_no, data.to_vec()));
            Ok(())
        }
    }

    fn fixture(content: &[u8]) -> (tempfile::TempDir, LocalFile) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.bin");
        fs::write(&path, content).unwrap();
        let file = LocalFile::new(&path, Some(tmp.path())).unwrap();
        (tmp, file)
    }

    fn fast(max_tries: u32) -> RetryPolicy {
        RetryPolicy {
            interval: Duration::ZERO,
            max_tries,
        }
    }

    #[test]
    fn parts_cover_the_whole_file() {
        let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let (_tmp, file) = fixture(&content);
        let session = Scripted::new(1000, 300, &[]);

        let sent = upload_parts(&session, &file, fast(5), None).unwrap();
        assert_eq!(sent, 1000);

        let mut received = session.received.lock().unwrap().clone();
        received.sort_by_key(|(no, _)| *no);
        let joined: Vec<u8> = received.into_iter().flat_map(|(_, data)| data).collect();
        assert_eq!(joined, content);
    }

    #[test]
    fn locked_parts_are_retried() {
        let (_tmp, file) = fixture(b"abcdefghij");
        let session = Scripted::new(10, 5, &[0, 2]);

        assert_eq!(upload_parts(&session, &file, fast(5), None).unwrap(), 10);
        assert_eq!(session.received.lock().unwrap().len(), 2);
    }

    #[test]
    fn parts_locked_past_the_budget_fail() {
        let (_tmp, file) = fixture(b"abcdefghij");
        let session = Scripted::new(10, 5, &[10]);

        let err = upload_parts(&session, &file, fast(3), None).unwrap_err();
        assert!(matches!(err, Error::PartsLocked { tries: 3, .. }));
        assert!(err.is_transfer_error());
    }

    #[test]
    fn part_listing_parses_backend_json() {
        let json = r#"[
            {"partNo": 1, "startOffset": 0, "endOffset": 9, "status": "COMPLETE", "locked": false},
            {"partNo": 2, "startOffset": 10, "endOffset": 14, "status": "PENDING", "locked": true}
        ]"#;
        let parts: Vec<UploadPart> = serde_json::from_str(json).unwrap();
        assert!(parts[0].is_complete());
        assert!(parts[1].locked);
        assert_eq!(parts[1].len(), 5);
    }
}
