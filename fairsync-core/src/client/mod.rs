//! The client contract every repository backend implements.
//!
//! Datasets only talk to a backend through [`Client`]. Concrete clients are
//! registered by id in a [`registry::ClientRegistry`].

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::dataset_id::{DatasetId, DatasetRef};
use crate::types::file::Notify;
use crate::types::local_file::LocalFile;
use crate::types::metadata::Metadata;
use crate::types::remote_file::RemoteFile;
use crate::{Error, Result};

pub mod registry;

/// Publication status of a remote dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    /// Not published yet.
    Draft,
    /// Published and publicly available.
    Public,
    /// Published, under embargo.
    Embargoed,
    /// Published, accessible under conditions.
    Restricted,
    /// Published, accessible by the owners only.
    Closed,
    Error,
    #[default]
    Unknown,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Draft => "draft",
            DatasetStatus::Public => "public",
            DatasetStatus::Embargoed => "embargoed",
            DatasetStatus::Restricted => "restricted",
            DatasetStatus::Closed => "closed",
            DatasetStatus::Error => "error",
            DatasetStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(DatasetStatus::Draft),
            "public" => Ok(DatasetStatus::Public),
            "embargoed" => Ok(DatasetStatus::Embargoed),
            "restricted" => Ok(DatasetStatus::Restricted),
            "closed" => Ok(DatasetStatus::Closed),
            "error" => Ok(DatasetStatus::Error),
            "unknown" => Ok(DatasetStatus::Unknown),
            other => Err(Error::not_found(format!("unknown dataset status: {other}"))),
        }
    }
}

/// Summary of a remote dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetDetails {
    pub title: Option<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
    pub status: DatasetStatus,
    pub size: Option<u64>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

/// Capabilities of a repository backend.
///
/// `upload_file` must either return a remote file whose size and checksum
/// match the uploaded file, or fail.
pub trait Client: Send + Sync {
    /// Id of the client implementation, e.g. `zenodo`.
    fn client_id(&self) -> &str;

    /// Id of the configured repository this client talks to, if any.
    fn repository_id(&self) -> Option<&str> {
        None
    }

    /// Key under which remote datasets are recorded in a manifest.
    fn remote_key(&self) -> &str {
        self.repository_id().unwrap_or(self.client_id())
    }

    /// Resolve a reference to a backend-native identifier.
    fn get_dataset_id(&self, reference: &DatasetRef) -> Result<DatasetId>;

    /// Stable cache key of a dataset identifier.
    fn get_dataset_hash(&self, id: &DatasetId) -> String {
        id.to_string()
    }

    fn create_dataset(&self, metadata: &Metadata) -> Result<DatasetId>;

    fn get_metadata(&self, id: &DatasetId) -> Result<Metadata>;

    fn save_metadata(&self, id: &DatasetId, metadata: &Metadata) -> Result<()>;

    fn get_files(&self, id: &DatasetId) -> Result<Vec<RemoteFile>>;

    fn upload_file(&self, id: &DatasetId, file: &LocalFile, notify: Option<Notify<'_>>) -> Result<RemoteFile>;

    fn delete_file(&self, id: &DatasetId, file: &RemoteFile) -> Result<()>;

    fn delete_dataset(&self, id: &DatasetId) -> Result<()>;

    fn get_details(&self, id: &DatasetId) -> Result<DatasetDetails>;

    /// Whether directory structure survives an upload.
    fn supports_folder(&self) -> bool;

    /// Whether zero-byte files can be uploaded.
    fn allows_empty_files(&self) -> bool {
        true
    }

    /// Stream the contents of a remote file.
    fn open_file(&self, file: &RemoteFile) -> Result<Box<dyn Read + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            DatasetStatus::Draft,
            DatasetStatus::Public,
            DatasetStatus::Embargoed,
            DatasetStatus::Restricted,
            DatasetStatus::Closed,
            DatasetStatus::Error,
            DatasetStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<DatasetStatus>().unwrap(), status);
        }
        assert!("deleted".parse::<DatasetStatus>().is_err());
    }

    #[test]
    fn details_default_to_unknown_status() {
        let details = DatasetDetails::default();
        assert_eq!(details.status, DatasetStatus::Unknown);
        assert_eq!(details.status.to_string(), "unknown");
    }
}
