//! Datasets: a local directory or a remote record seen through one interface.
//!
//! Both kinds cache their metadata and file list. A cache is reloaded when
//! asked to, or, with auto-refresh on, when the dataset reports a newer
//! modification time than the one seen at the last load.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::diff::{self, Diff};
use crate::types::file::{File, FileMap};
use crate::types::metadata::Metadata;
use crate::{Error, Result};

pub mod local;
pub mod remote;
pub mod sync;

pub use local::LocalDataset;
pub use remote::{RemoteDataset, StoreOptions};
pub use sync::{locate_remote, pull, push, SyncOptions, SyncSummary};

/// Cached state shared by every dataset kind.
#[derive(Debug, Clone)]
pub struct DatasetCache<F> {
    pub metadata: Option<Metadata>,
    pub files: Option<FileMap<F>>,
    /// Modification time seen at the last load; `None` until something is loaded.
    pub seen: Option<Option<DateTime<Utc>>>,
    pub auto_refresh: bool,
}

impl<F> Default for DatasetCache<F> {
    fn default() -> Self {
        Self {
            metadata: None,
            files: None,
            seen: None,
            auto_refresh: false,
        }
    }
}

fn not_loaded(what: &str) -> Error {
    Error::not_found(format!("{what} not loaded"))
}

pub trait Dataset {
    type File: File + Clone;

    fn cache(&self) -> &DatasetCache<Self::File>;

    fn cache_mut(&mut self) -> &mut DatasetCache<Self::File>;

    /// Read metadata from where the dataset lives.
    fn load_metadata(&self) -> Result<Metadata>;

    /// Write metadata to where the dataset lives.
    fn store_metadata(&mut self, metadata: &Metadata) -> Result<()>;

    /// Read the file list from where the dataset lives.
    fn load_files(&self) -> Result<Vec<Self::File>>;

    /// Current modification time of the dataset, if known.
    fn modified(&self) -> Result<Option<DateTime<Utc>>>;

    fn title(&mut self) -> Result<Option<String>>;

    /// Total size in bytes, if known.
    fn size(&mut self) -> Result<Option<u64>>;

    fn created(&self) -> Result<Option<DateTime<Utc>>>;

    fn auto_refresh(&self) -> bool {
        self.cache().auto_refresh
    }

    fn set_auto_refresh(&mut self, enabled: bool) {
        self.cache_mut().auto_refresh = enabled;
    }

    /// Whether the dataset changed since the last load; `None` before any load.
    fn is_modified(&self) -> Result<Option<bool>> {
        match self.cache().seen {
            None => Ok(None),
            Some(seen) => Ok(Some(seen != self.modified()?)),
        }
    }

    fn get_metadata(&mut self, refresh: bool) -> Result<&Metadata> {
        if refresh || self.cache().metadata.is_none() {
            let metadata = self.load_metadata()?;
            let stamp = self.modified()?;
            let cache = self.cache_mut();
            cache.seen = Some(stamp);
            return Ok(cache.metadata.insert(metadata));
        }
        self.cache().metadata.as_ref().ok_or_else(|| not_loaded("metadata"))
    }

    /// Cached metadata.
    ///
    /// With auto-refresh on, metadata the user has not edited is reloaded
    /// when the dataset changed since it was loaded.
    fn metadata(&mut self) -> Result<&Metadata> {
        let edited = self
            .cache()
            .metadata
            .as_ref()
            .is_some_and(Metadata::is_modified);
        let refresh = !edited && self.auto_refresh() && self.is_modified()? == Some(true);
        self.get_metadata(refresh)
    }

    fn metadata_mut(&mut self) -> Result<&mut Metadata> {
        self.metadata()?;
        self.cache_mut()
            .metadata
            .as_mut()
            .ok_or_else(|| not_loaded("metadata"))
    }

    /// Assign attributes, normalizing each value.
    fn set_metadata(&mut self, entries: impl IntoIterator<Item = (String, Value)>) -> Result<()>
    where
        Self: Sized,
    {
        self.metadata_mut()?.update(entries)
    }

    /// Replace the cached metadata as a whole.
    fn replace_metadata(&mut self, metadata: Metadata) {
        self.cache_mut().metadata = Some(metadata);
    }

    /// Store the cached metadata, then reload it.
    ///
    /// Fails with [`Error::DatasetModified`] when the dataset changed since it
    /// was loaded, unless `force` is set. Nothing happens before a load.
    fn save_metadata(&mut self, force: bool) -> Result<()> {
        let Some(metadata) = self.cache().metadata.clone() else {
            return Ok(());
        };
        if !force && self.is_modified()? == Some(true) {
            return Err(Error::DatasetModified);
        }
        self.store_metadata(&metadata)?;
        self.get_metadata(true)?;
        Ok(())
    }

    fn get_files(&mut self, refresh: bool) -> Result<&FileMap<Self::File>> {
        if refresh || self.auto_refresh() || self.cache().files.is_none() {
            let files: FileMap<Self::File> = self
                .load_files()?
                .into_iter()
                .map(|file| (file.path().to_string(), file))
                .collect();
            let stamp = self.modified()?;
            let cache = self.cache_mut();
            cache.seen = Some(stamp);
            return Ok(cache.files.insert(files));
        }
        self.cache().files.as_ref().ok_or_else(|| not_loaded("files"))
    }

    /// Cached files, reloaded when the dataset changed since the last load.
    fn files(&mut self) -> Result<&FileMap<Self::File>> {
        let refresh = self.is_modified()? == Some(true);
        self.get_files(refresh)
    }

    /// The first file matching `identifier` (name, path or checksum).
    fn get_file(&mut self, identifier: &str, refresh: bool) -> Result<Option<&Self::File>> {
        Ok(self
            .get_files(refresh)?
            .values()
            .find(|file| file.matches(identifier)))
    }

    /// Cached metadata against what is currently stored.
    fn diff_metadata(&mut self) -> Result<Diff<Value>> {
        let stored = self.load_metadata()?;
        Ok(diff::diff_metadata(self.metadata()?, &stored))
    }

    /// This dataset's metadata against another dataset's.
    fn diff_metadata_with<D: Dataset>(&mut self, other: &mut D) -> Result<Diff<Value>>
    where
        Self: Sized,
    {
        let theirs = other.metadata()?;
        Ok(diff::diff_metadata(self.metadata()?, theirs))
    }

    /// Cached files against what is currently stored.
    fn diff_files(&mut self) -> Result<Diff<Self::File>> {
        let stored: FileMap<Self::File> = self
            .load_files()?
            .into_iter()
            .map(|file| (file.path().to_string(), file))
            .collect();
        diff::diff_files(self.files()?, &stored)
    }

    /// This dataset's files against another dataset's.
    fn diff_files_with<D: Dataset>(&mut self, other: &mut D) -> Result<Diff<Self::File, D::File>>
    where
        Self: Sized,
    {
        let theirs = other.files()?;
        diff::diff_files(self.files()?, theirs)
    }
}
