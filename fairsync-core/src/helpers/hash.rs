//! MD5 helpers.

use std::io::Read;
use std::path::Path;

use fs_err as fs;

use crate::Result;

/// Read size used when streaming file contents.
pub const CHUNK_SIZE: usize = 1 << 18;

/// Compute the MD5 of a reader, streaming it in fixed-size chunks.
pub fn md5_reader(mut reader: impl Read) -> Result<String> {
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        context.consume(&buffer[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// Compute the MD5 of a file on disk.
pub fn md5_file(path: impl AsRef<Path>) -> Result<String> {
    let file = fs::File::open(path.as_ref())?;
    md5_reader(file)
}

/// MD5 of the concatenated member checksums of an archive group.
///
/// Changes whenever a member is added, removed, reordered or modified.
pub fn content_token<'a>(md5s: impl IntoIterator<Item = &'a str>) -> String {
    let joined: String = md5s.into_iter().collect();
    format!("{:x}", md5::compute(joined.as_bytes()))
}
