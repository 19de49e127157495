//! A dataset held by a repository backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fs_err as fs;
use rayon::prelude::*;

use crate::client::{Client, DatasetDetails, DatasetStatus};
use crate::config::Settings;
use crate::dataset::local::LocalDataset;
use crate::dataset::{Dataset, DatasetCache};
use crate::helpers::{archive, templates};
use crate::transfer::download::download_file;
use crate::transfer::upload::extracted_token;
use crate::types::dataset_id::DatasetId;
use crate::types::file::{File, Notify};
use crate::types::local_file::LocalFile;
use crate::types::manifest::{ArchiveRecord, IncludeRule};
use crate::types::metadata::Metadata;
use crate::types::remote_file::RemoteFile;
use crate::{Error, Result};

/// Options of [`RemoteDataset::store`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Extract downloaded archives, unwrapping archives nested one per level.
    pub extract: bool,
    /// Download workers; wins over the configured count and its cap.
    pub max_workers: Option<usize>,
}

impl StoreOptions {
    pub fn extract(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Worker count: explicit, else from `settings`.
    pub fn workers(&self, settings: &Settings) -> usize {
        self.max_workers.unwrap_or_else(|| settings.workers()).max(1)
    }
}

/// What one stored file added to the local dataset.
struct Stored {
    include: IncludeRule,
    file: Option<LocalFile>,
    archive: Option<(String, ArchiveRecord)>,
}

pub struct RemoteDataset {
    client: Arc<dyn Client>,
    id: DatasetId,
    details: Option<DatasetDetails>,
    cache: DatasetCache<RemoteFile>,
}

impl std::fmt::Debug for RemoteDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDataset")
            .field("client", &self.client.client_id())
            .field("id", &self.id)
            .field("details", &self.details)
            .finish()
    }
}

impl RemoteDataset {
    pub fn new(client: Arc<dyn Client>, id: DatasetId) -> Self {
        Self {
            client,
            id,
            details: None,
            cache: DatasetCache::default(),
        }
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    pub fn id(&self) -> &DatasetId {
        &self.id
    }

    /// Cache key of this dataset within its client.
    pub fn hash(&self) -> String {
        self.client.get_dataset_hash(&self.id)
    }

    pub fn details(&mut self, refresh: bool) -> Result<&DatasetDetails> {
        if refresh || self.details.is_none() {
            let details = self.client.get_details(&self.id)?;
            return Ok(self.details.insert(details));
        }
        self.details
            .as_ref()
            .ok_or_else(|| Error::not_found("details not loaded"))
    }

    pub fn url(&mut self) -> Result<Option<String>> {
        Ok(self.details(false)?.url.clone())
    }

    /// DOI from the details, else from the metadata.
    pub fn doi(&mut self) -> Result<Option<String>> {
        if let Some(doi) = self.details(false)?.doi.clone() {
            return Ok(Some(doi));
        }
        Ok(self.metadata()?.doi().map(str::to_string))
    }

    pub fn status(&mut self) -> Result<DatasetStatus> {
        Ok(self.details(false)?.status)
    }

    /// Directory name derived from the DOI.
    pub fn default_path(&mut self) -> Result<PathBuf> {
        let doi = self
            .doi()?
            .ok_or_else(|| Error::not_found(format!("dataset {} has no DOI to name a directory", self.id)))?;
        Ok(PathBuf::from(doi.replace(['/', '\\'], "_")))
    }

    /// Metadata template for datasets stored from this backend.
    fn template(&self) -> Option<&str> {
        self.client
            .repository_id()
            .filter(|id| templates::exists(id))
            .or_else(|| Some(self.client.client_id()).filter(|id| templates::exists(id)))
    }

    /// Download the dataset into a new local dataset at `path`.
    ///
    /// The directory must be empty apart from dot-entries. Downloads run on
    /// a bounded worker pool; the manifest is written once all of them are
    /// done.
    pub fn store(
        &mut self,
        path: Option<&Path>,
        options: StoreOptions,
        settings: &Settings,
        callback: Option<Notify<'_>>,
    ) -> Result<LocalDataset> {
        let root = match path {
            Some(path) => path.to_path_buf(),
            None => self.default_path()?,
        };
        fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(Error::NotADirectory { path: root });
        }
        let occupied = fs::read_dir(&root)?
            .filter_map(|entry| entry.ok())
            .any(|entry| !entry.file_name().to_string_lossy().starts_with('.'));
        if occupied {
            return Err(Error::DirectoryNotEmpty { path: root });
        }

        let mut local = LocalDataset::init(&root, self.template())?;
        let metadata = self.metadata()?.clone();
        local.set_metadata(metadata.iter().map(|(k, v)| (k.clone(), v.clone())))?;
        local.save_metadata(false)?;

        let files: Vec<RemoteFile> = self.get_files(false)?.values().cloned().collect();
        let workers = options.workers(settings);
        log::debug!("Storing {} files with {} workers", files.len(), workers);

        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        let client = self.client.as_ref();
        let stored = pool.install(|| {
            files
                .par_iter()
                .map(|file| store_file(client, file, &root, options.extract, callback))
                .collect::<Result<Vec<Stored>>>()
        })?;

        for item in stored {
            if let Some(file) = &item.file {
                local.remember_checksum(file);
            }
            let rules = local.file_rules_mut();
            rules.includes.push(item.include);
            if let Some((name, record)) = item.archive {
                if let Some(previous) = rules.archives.insert(name.clone(), record) {
                    log::warn!("Two archives unwrap as {}, {} is no longer tracked", name, previous.file_name(&name));
                }
            }
        }
        local.save_files(true)?;
        local.get_files(true)?;
        local.save_checksums()?;
        local.set_remote(self.client.remote_key(), &self.id)?;

        log::info!("Stored dataset {} at {}", self.id, root.display());
        Ok(local)
    }
}

/// Download one file and, if asked, unwrap it.
///
/// An unwrapped archive is recorded so sync compares it by checksum
/// instead of fetching it again.
fn store_file(
    client: &dyn Client,
    file: &RemoteFile,
    root: &Path,
    extract: bool,
    callback: Option<Notify<'_>>,
) -> Result<Stored> {
    let local = download_file(client, file, root, callback)?;
    if !(extract && local.is_simple() && local.is_archive()?) {
        return Ok(Stored {
            include: IncludeRule::Pattern(file.path().to_string()),
            file: Some(local),
            archive: None,
        });
    }

    let md5 = local.compute_md5()?.to_string();
    let mut current = local;
    let names = loop {
        let path = current.path().to_string();
        let names = current.unpack(root, callback)?;
        log::debug!("Extracted {} entries from {}", names.len(), path);
        if let [only] = names.as_slice() {
            let inner = root.join(only);
            if inner.is_file() && archive::sniff(&inner)?.is_some() {
                current = LocalFile::new(inner, Some(root))?;
                continue;
            }
        }
        break names;
    };

    let content = extracted_token(root, &names)?;
    let name = archive::stem(file.path()).to_string();
    let remote_name = Some(file.path().to_string()).filter(|path| *path != format!("{name}.zip"));
    Ok(Stored {
        include: IncludeRule::archive(file.path(), names),
        file: None,
        archive: Some((
            name,
            ArchiveRecord {
                md5,
                content,
                file: remote_name,
            },
        )),
    })
}

impl Dataset for RemoteDataset {
    type File = RemoteFile;

    fn cache(&self) -> &DatasetCache<RemoteFile> {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut DatasetCache<RemoteFile> {
        &mut self.cache
    }

    fn load_metadata(&self) -> Result<Metadata> {
        self.client.get_metadata(&self.id)
    }

    fn store_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        self.client.save_metadata(&self.id, metadata)?;
        self.details = None;
        Ok(())
    }

    fn load_files(&self) -> Result<Vec<RemoteFile>> {
        self.client.get_files(&self.id)
    }

    fn modified(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.client.get_details(&self.id)?.modified)
    }

    fn title(&mut self) -> Result<Option<String>> {
        if let Some(title) = self.details(false)?.title.clone() {
            return Ok(Some(title));
        }
        Ok(self.metadata()?.title().map(str::to_string))
    }

    fn size(&mut self) -> Result<Option<u64>> {
        if let Some(size) = self.details(false)?.size {
            return Ok(Some(size));
        }
        let mut total = 0;
        for file in self.files()?.values() {
            match file.size()? {
                Some(size) => total += size,
                None => return Ok(None),
            }
        }
        Ok(Some(total))
    }

    fn created(&self) -> Result<Option<DateTime<Utc>>> {
        if let Some(details) = &self.details {
            return Ok(details.created);
        }
        Ok(self.client.get_details(&self.id)?.created)
    }
}
