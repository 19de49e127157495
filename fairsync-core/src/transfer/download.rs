//! Checksum-verified downloads.

use std::io::{Read, Write};
use std::path::Path;

use fs_err as fs;

use crate::client::Client;
use crate::helpers::hash::CHUNK_SIZE;
use crate::types::file::{notify, File, Notify, Progress};
use crate::types::local_file::LocalFile;
use crate::types::remote_file::RemoteFile;
use crate::{Error, Result};

/// Download `file` to `root/<file path>`.
///
/// The bytes are hashed while streaming. When the remote checksum is known
/// and differs, the partial file is removed and the download fails. The
/// returned file carries the computed checksum.
pub fn download_file(
    client: &dyn Client,
    file: &RemoteFile,
    root: &Path,
    callback: Option<Notify<'_>>,
) -> Result<LocalFile> {
    let target = root.join(file.path());
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let actual = match stream_to(client, file, &target, callback) {
        Ok(md5) => md5,
        Err(e) => {
            discard(&target);
            return Err(e);
        }
    };

    if let Some(expected) = file.md5()? {
        if !expected.eq_ignore_ascii_case(&actual) {
            discard(&target);
            return Err(Error::ChecksumMismatch {
                name: file.path().to_string(),
                expected,
                actual,
            });
        }
    }

    log::info!("Downloaded {}", file.path());
    Ok(LocalFile::new(&target, Some(root))?.with_md5(actual))
}

fn stream_to(
    client: &dyn Client,
    file: &RemoteFile,
    target: &Path,
    callback: Option<Notify<'_>>,
) -> Result<String> {
    let total = file.size()?;
    let mut reader = client.open_file(file)?;
    let mut out = fs::File::create(target)?;
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut current = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        context.consume(&buf[..n]);
        current += n as u64;
        let progress = Progress::file(file.path(), current);
        notify(
            callback,
            match total {
                Some(total) => progress.with_totals(total, current),
                None => progress,
            },
        );
    }
    out.flush()?;
    Ok(format!("{:x}", context.compute()))
}

fn discard(target: &Path) {
    if target.is_file() {
        if let Err(e) = fs::remove_file(target) {
            log::warn!("Failed to remove partial download {}: {}", target.display(), e);
        }
    }
}
