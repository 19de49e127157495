//! fairsync error types.
//!
//! Every variant maps to a stable `error_type()` string so callers can branch
//! on the kind of failure without matching on display text.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for fairsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// YAML parsing error (manifest).
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// JSON conversion error (metadata values).
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// TOML parsing error (settings).
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
    /// TOML serialization error (settings).
    #[error("toml error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    /// Zip archive error.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    /// Worker pool could not be built.
    #[error("worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    /// A file rule could not be compiled.
    #[error("invalid rule {rule:?}: {message}")]
    InvalidRule { rule: String, message: String },
    /// Path is not a directory.
    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },
    /// Directory already holds a manifest.
    #[error("already a dataset: {}", path.display())]
    AlreadyDataset { path: PathBuf },
    /// Directory must be empty (dot-entries aside).
    #[error("directory is not empty: {}", path.display())]
    DirectoryNotEmpty { path: PathBuf },
    /// Stored dataset changed since it was loaded.
    #[error("existing dataset is modified")]
    DatasetModified,
    /// Downloaded bytes do not match the expected checksum.
    #[error("invalid MD5 checksum for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    /// Backend returned a file that does not match what was sent.
    #[error("uploaded file does not match local file: {path}")]
    UploadMismatch { path: String },
    /// Part upload stayed locked past the retry budget.
    #[error("too many tries to upload a part of {name} ({tries} tries)")]
    PartsLocked { name: String, tries: u32 },
    /// Backend refuses empty files.
    #[error("empty files are not allowed: {path}")]
    EmptyFile { path: String },
    /// Archive member would land outside the destination.
    #[error("invalid archive item: {name}")]
    UnsafeArchiveMember { name: String },
    /// File is neither a zip nor a tar archive.
    #[error("invalid archive file: {}", path.display())]
    NotAnArchive { path: PathBuf },
    /// Non-simple file under `mirror` on a backend without folders.
    #[error("folders are not supported by {client}: {path}")]
    FoldersNotSupported { client: String, path: String },
    /// Unknown upload strategy name.
    #[error("invalid upload strategy: {0}")]
    InvalidStrategy(String),
    /// Unknown or unsupported archive compression method.
    #[error("invalid archive method: {0}")]
    InvalidArchiveMethod(String),
    /// Temporary archive would overwrite an existing file.
    #[error("invalid archive name: {name}")]
    InvalidArchiveName { name: String },
    /// Metadata value failed normalization.
    #[error("invalid value for {key}: {message}")]
    InvalidMetadata { key: String, message: String },
    /// No metadata template under this name.
    #[error("invalid template name: {0}")]
    InvalidTemplate(String),
    /// Dataset identifier could not be interpreted.
    #[error("invalid dataset identifier: {0}")]
    InvalidIdentifier(String),
    /// No client registered under this id.
    #[error("unknown client: {0}")]
    UnknownClient(String),
    /// No repository configured under this id.
    #[error("unknown repository: {0}")]
    UnknownRepository(String),
    /// No remote dataset could be located for a local dataset.
    #[error("no remote dataset known for {}", path.display())]
    NoRemote { path: PathBuf },
    /// Settings error.
    #[error("config error: {0}")]
    Config(String),
    /// Error reported by a backend adapter.
    #[error("{client}: {message}")]
    Backend { client: String, message: String },
    /// Generic not found error.
    #[error("{0}")]
    NotFound(String),
}

impl Error {
    /// Get the error type as a stable string.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Io(_) => "io_error",
            Error::Yaml(_) => "yaml_error",
            Error::Json(_) => "json_error",
            Error::Toml(_) | Error::TomlSer(_) => "toml_error",
            Error::Zip(_) => "zip_error",
            Error::Pool(_) => "pool_error",
            Error::InvalidRule { .. } => "invalid_rule",
            Error::NotADirectory { .. } => "not_a_directory",
            Error::AlreadyDataset { .. } => "already_dataset",
            Error::DirectoryNotEmpty { .. } => "directory_not_empty",
            Error::DatasetModified => "dataset_modified",
            Error::ChecksumMismatch { .. } => "checksum_mismatch",
            Error::UploadMismatch { .. } => "upload_mismatch",
            Error::PartsLocked { .. } => "parts_locked",
            Error::EmptyFile { .. } => "empty_file",
            Error::UnsafeArchiveMember { .. } => "unsafe_archive_member",
            Error::NotAnArchive { .. } => "not_an_archive",
            Error::FoldersNotSupported { .. } => "folders_not_supported",
            Error::InvalidStrategy(_) => "invalid_strategy",
            Error::InvalidArchiveMethod(_) => "invalid_archive_method",
            Error::InvalidArchiveName { .. } => "invalid_archive_name",
            Error::InvalidMetadata { .. } => "invalid_metadata",
            Error::InvalidTemplate(_) => "invalid_template",
            Error::InvalidIdentifier(_) => "invalid_identifier",
            Error::UnknownClient(_) => "unknown_client",
            Error::UnknownRepository(_) => "unknown_repository",
            Error::NoRemote { .. } => "no_remote",
            Error::Config(_) => "config_error",
            Error::Backend { .. } => "backend_error",
            Error::NotFound(_) => "not_found",
        }
    }

    /// Create a backend error.
    pub fn backend(client: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Backend {
            client: client.into(),
            message: message.into(),
        }
    }

    /// Create an invalid metadata error.
    pub fn invalid_metadata(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidMetadata {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    /// Warning-class errors can be retried with `force`.
    pub fn is_warning(&self) -> bool {
        matches!(self, Error::DatasetModified)
    }

    /// Transfer failures: the bytes did not arrive intact.
    pub fn is_transfer_error(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::ChecksumMismatch { .. }
                | Error::UploadMismatch { .. }
                | Error::PartsLocked { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_types_are_stable() {
        assert_eq!(Error::DatasetModified.error_type(), "dataset_modified");
        assert_eq!(
            Error::UnsafeArchiveMember {
                name: "../x".into()
            }
            .error_type(),
            "unsafe_archive_member"
        );
        assert_eq!(
            Error::backend("zenodo", "boom").error_type(),
            "backend_error"
        );
    }

    #[test]
    fn only_modified_is_a_warning() {
        assert!(Error::DatasetModified.is_warning());
        assert!(!Error::not_found("x").is_warning());
    }

    #[test]
    fn display_is_one_line() {
        let err = Error::ChecksumMismatch {
            name: "a.csv".into(),
            expected: "abc".into(),
            actual: "def".into(),
        };
        let text = err.to_string();
        assert!(!text.contains('\n'));
        assert!(text.contains("a.csv"));
        assert!(err.is_transfer_error());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.error_type(), "io_error");
    }
}
