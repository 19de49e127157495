//! Moving bytes between local files and a backend.
//!
//! - `download`: streamed, checksum-verified downloads
//! - `upload`: upload strategies, archive building, verified uploads
//! - `parts`: part-based uploads with lock retry

pub mod download;
pub mod parts;
pub mod upload;

pub use download::download_file;
pub use parts::{upload_parts, PartStatus, PartUpload, RetryPolicy, UploadPart};
pub use upload::{build_archive, upload_verified, BuiltArchive, UploadPlan, UploadStrategy, ARCHIVE_ALL_NAME};
