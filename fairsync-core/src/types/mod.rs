//! Core type definitions for fairsync.

pub mod dataset_id;
pub mod diff;
pub mod file;
pub mod local_file;
pub mod manifest;
pub mod metadata;
pub mod person;
pub mod remote_file;

pub use dataset_id::{DatasetId, DatasetRef};
pub use diff::{diff_by, diff_files, diff_metadata, Diff};
pub use file::{File, FileMap, Notify, Progress};
pub use local_file::LocalFile;
pub use manifest::{ArchiveRecord, FileRules, IncludeRule, Manifest, MANIFEST_FILE_NAME};
pub use metadata::Metadata;
pub use person::{Person, PersonList};
pub use remote_file::{FileHeaders, HeaderSource, RemoteFile};
