//! An in-memory repository backend.
//!
//! Datasets live in a mutex-guarded map. Uploads go through the part
//! protocol so the retry loop runs end to end. Every write advances a
//! logical clock that drives `modified` in the dataset details.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use fairsync_core::client::{Client, DatasetDetails, DatasetStatus};
use fairsync_core::transfer::{upload_parts, PartStatus, PartUpload, RetryPolicy, UploadPart};
use fairsync_core::types::file::File;
use fairsync_core::{DatasetId, DatasetRef, Error, LocalFile, Metadata, Notify, RemoteFile, Result};

const URL_SCHEME: &str = "memory://";

/// A snapshot of one stored dataset.
#[derive(Debug, Clone, Default)]
pub struct MemoryDataset {
    pub metadata: Metadata,
    pub files: BTreeMap<String, Vec<u8>>,
    /// md5 values reported instead of the real ones.
    pub claimed_md5: BTreeMap<String, String>,
    pub created: i64,
    pub modified: i64,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    clock: i64,
    datasets: BTreeMap<String, MemoryDataset>,
    uploads: usize,
    fail_after: Option<usize>,
    corrupt: bool,
    locked_passes: u32,
}

impl State {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }
}

pub struct MemoryClient {
    client_id: String,
    repository_id: Option<String>,
    folders: bool,
    empty_files: bool,
    part_size: u64,
    epoch: DateTime<Utc>,
    state: Mutex<State>,
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("client_id", &self.client_id)
            .field("repository_id", &self.repository_id)
            .field("folders", &self.folders)
            .finish()
    }
}

impl MemoryClient {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            repository_id: None,
            folders: true,
            empty_files: true,
            part_size: 64 * 1024,
            epoch: Utc::now(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_repository(mut self, repository_id: impl Into<String>) -> Self {
        self.repository_id = Some(repository_id.into());
        self
    }

    pub fn with_folders(mut self, folders: bool) -> Self {
        self.folders = folders;
        self
    }

    pub fn with_empty_files(mut self, allowed: bool) -> Self {
        self.empty_files = allowed;
        self
    }

    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self
    }

    /// Let `count` more uploads succeed, then fail every following one.
    pub fn fail_uploads_after(&self, count: usize) {
        let mut state = self.lock();
        state.fail_after = Some(state.uploads + count);
    }

    /// Store one extra byte with every upload.
    pub fn corrupt_uploads(&self, corrupt: bool) {
        self.lock().corrupt = corrupt;
    }

    /// Report every pending part as locked for `passes` listings.
    pub fn lock_parts(&self, passes: u32) {
        self.lock().locked_passes = passes;
    }

    /// Successful uploads so far.
    pub fn uploads(&self) -> usize {
        self.lock().uploads
    }

    pub fn dataset_count(&self) -> usize {
        self.lock().datasets.len()
    }

    pub fn dataset(&self, id: &DatasetId) -> Option<MemoryDataset> {
        self.lock().datasets.get(&key(id)).cloned()
    }

    /// Create a dataset directly, as if made through the repository website.
    pub fn insert_dataset(&self, metadata: Metadata) -> DatasetId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = DatasetId::new(state.next_id.to_string());
        let now = state.tick();
        let mut metadata = metadata;
        metadata.mark_clean();
        state.datasets.insert(
            key(&id),
            MemoryDataset {
                metadata,
                created: now,
                modified: now,
                ..MemoryDataset::default()
            },
        );
        id
    }

    /// Add or replace a file behind the engine's back.
    pub fn put_file(&self, id: &DatasetId, path: &str, contents: &[u8]) -> Result<()> {
        self.write(id, |dataset| {
            dataset.claimed_md5.remove(path);
            dataset.files.insert(path.to_string(), contents.to_vec());
            Ok(())
        })
    }

    /// Make the backend report `md5` for `path` regardless of its content.
    pub fn claim_md5(&self, id: &DatasetId, path: &str, md5: &str) -> Result<()> {
        self.write(id, |dataset| {
            dataset.claimed_md5.insert(path.to_string(), md5.to_string());
            Ok(())
        })
    }

    /// Edit one metadata field behind the engine's back.
    pub fn set_metadata_value(&self, id: &DatasetId, field: &str, value: Value) -> Result<()> {
        self.write(id, |dataset| {
            dataset.metadata.set(field, value)?;
            dataset.metadata.mark_clean();
            Ok(())
        })
    }

    pub fn file_content(&self, id: &DatasetId, path: &str) -> Option<Vec<u8>> {
        self.lock().datasets.get(&key(id))?.files.get(path).cloned()
    }

    pub fn file_paths(&self, id: &DatasetId) -> Vec<String> {
        self.lock()
            .datasets
            .get(&key(id))
            .map(|dataset| dataset.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::backend(&self.client_id, message)
    }

    fn read<T>(&self, id: &DatasetId, f: impl FnOnce(&MemoryDataset) -> T) -> Result<T> {
        let state = self.lock();
        let dataset = state
            .datasets
            .get(&key(id))
            .ok_or_else(|| Error::not_found(format!("dataset {id}")))?;
        Ok(f(dataset))
    }

    fn write<T>(&self, id: &DatasetId, f: impl FnOnce(&mut MemoryDataset) -> Result<T>) -> Result<T> {
        let mut state = self.lock();
        let now = state.tick();
        let dataset = state
            .datasets
            .get_mut(&key(id))
            .ok_or_else(|| Error::not_found(format!("dataset {id}")))?;
        let value = f(dataset)?;
        dataset.modified = now;
        Ok(value)
    }

    fn remote_file(&self, id: &DatasetId, dataset: &MemoryDataset, path: &str) -> Option<RemoteFile> {
        let contents = dataset.files.get(path)?;
        let md5 = match dataset.claimed_md5.get(path) {
            Some(md5) => md5.clone(),
            None => format!("{:x}", md5::compute(contents)),
        };
        Some(
            RemoteFile::new(path)
                .with_id(path)
                .with_url(format!("{URL_SCHEME}{}/{path}", key(id)))
                .with_size(contents.len() as u64)
                .with_md5(md5),
        )
    }

    fn time(&self, tick: i64) -> DateTime<Utc> {
        self.epoch + chrono::Duration::seconds(tick)
    }
}

fn key(id: &DatasetId) -> String {
    id.id().unwrap_or_default().to_string()
}

/// Buffers parts of one upload.
struct PartBuffer<'a> {
    client: &'a MemoryClient,
    parts: Mutex<Vec<UploadPart>>,
    data: Mutex<Vec<u8>>,
}

impl<'a> PartBuffer<'a> {
    fn new(client: &'a MemoryClient, size: u64) -> Self {
        let mut parts = Vec::new();
        let mut start = 0;
        while start < size {
            let end = (start + client.part_size).min(size) - 1;
            parts.push(UploadPart {
                part_no: parts.len() as u32 + 1,
                start_offset: start,
                end_offset: end,
                status: PartStatus::Pending,
                locked: false,
            });
            start = end + 1;
        }
        Self {
            client,
            parts: Mutex::new(parts),
            data: Mutex::new(vec![0; size as usize]),
        }
    }

    fn into_data(self) -> Vec<u8> {
        self.data.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PartUpload for PartBuffer<'_> {
    fn parts(&self) -> Result<Vec<UploadPart>> {
        let mut parts = self.parts.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut state = self.client.lock();
        if state.locked_passes > 0 {
            state.locked_passes -= 1;
            for part in parts.iter_mut().filter(|part| !part.is_complete()) {
                part.locked = true;
            }
        }
        Ok(parts)
    }

    fn put_part(&self, part: &UploadPart, data: &[u8]) -> Result<()> {
        let start = part.start_offset as usize;
        let mut buffer = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = buffer
            .get_mut(start..start + data.len())
            .ok_or_else(|| self.client.error(format!("part {} out of range", part.part_no)))?;
        slot.copy_from_slice(data);

        let mut parts = self.parts.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stored) = parts.iter_mut().find(|p| p.part_no == part.part_no) {
            stored.status = PartStatus::Complete;
        }
        Ok(())
    }
}

impl Client for MemoryClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn repository_id(&self) -> Option<&str> {
        self.repository_id.as_deref()
    }

    fn get_dataset_id(&self, reference: &DatasetRef) -> Result<DatasetId> {
        let state = self.lock();
        let found = match reference {
            DatasetRef::Native(id) => state.datasets.contains_key(&key(id)).then(|| key(id)),
            DatasetRef::Id(id) => state.datasets.contains_key(id).then(|| id.clone()),
            DatasetRef::Url(url) => url
                .strip_prefix(URL_SCHEME)
                .and_then(|rest| rest.split('/').next())
                .filter(|id| state.datasets.contains_key(*id))
                .map(str::to_string),
            DatasetRef::Doi(doi) => state
                .datasets
                .iter()
                .find(|(_, dataset)| dataset.metadata.doi() == Some(doi.as_str()))
                .map(|(id, _)| id.clone()),
        };
        found
            .map(DatasetId::new)
            .ok_or_else(|| Error::not_found(format!("no dataset for {reference:?}")))
    }

    fn create_dataset(&self, metadata: &Metadata) -> Result<DatasetId> {
        Ok(self.insert_dataset(metadata.clone()))
    }

    fn get_metadata(&self, id: &DatasetId) -> Result<Metadata> {
        self.read(id, |dataset| dataset.metadata.clone())
    }

    fn save_metadata(&self, id: &DatasetId, metadata: &Metadata) -> Result<()> {
        self.write(id, |dataset| {
            dataset.metadata = metadata.clone();
            dataset.metadata.mark_clean();
            Ok(())
        })
    }

    fn get_files(&self, id: &DatasetId) -> Result<Vec<RemoteFile>> {
        self.read(id, |dataset| {
            dataset
                .files
                .keys()
                .filter_map(|path| self.remote_file(id, dataset, path))
                .collect()
        })
    }

    fn upload_file(&self, id: &DatasetId, file: &LocalFile, notify: Option<Notify<'_>>) -> Result<RemoteFile> {
        if !self.folders && file.path().contains('/') {
            return Err(Error::FoldersNotSupported {
                client: self.client_id.clone(),
                path: file.path().to_string(),
            });
        }
        {
            let state = self.lock();
            if state.fail_after.is_some_and(|limit| state.uploads >= limit) {
                return Err(self.error(format!("upload of {} refused", file.path())));
            }
        }

        let buffer = PartBuffer::new(self, file.len());
        let policy = RetryPolicy {
            interval: Duration::ZERO,
            ..RetryPolicy::default()
        };
        upload_parts(&buffer, file, policy, notify)?;
        let mut contents = buffer.into_data();
        if self.lock().corrupt {
            contents.push(0);
        }

        let path = file.path().to_string();
        self.write(id, |dataset| {
            dataset.claimed_md5.remove(&path);
            dataset.files.insert(path.clone(), contents);
            Ok(())
        })?;
        self.lock().uploads += 1;
        log::debug!("Stored {} in memory dataset {}", path, id);

        self.read(id, |dataset| self.remote_file(id, dataset, &path))?
            .ok_or_else(|| self.error(format!("{path} vanished after upload")))
    }

    fn delete_file(&self, id: &DatasetId, file: &RemoteFile) -> Result<()> {
        let path = file.id().unwrap_or(file.path()).to_string();
        self.write(id, |dataset| {
            dataset.claimed_md5.remove(&path);
            dataset
                .files
                .remove(&path)
                .map(|_| ())
                .ok_or_else(|| Error::not_found(format!("file {path}")))
        })
    }

    fn delete_dataset(&self, id: &DatasetId) -> Result<()> {
        self.lock()
            .datasets
            .remove(&key(id))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(format!("dataset {id}")))
    }

    fn get_details(&self, id: &DatasetId) -> Result<DatasetDetails> {
        self.read(id, |dataset| DatasetDetails {
            title: dataset.metadata.title().map(str::to_string),
            url: Some(format!("{URL_SCHEME}{}", key(id))),
            doi: dataset.metadata.doi().map(str::to_string),
            status: DatasetStatus::Draft,
            size: Some(dataset.files.values().map(|c| c.len() as u64).sum()),
            created: Some(self.time(dataset.created)),
            modified: Some(self.time(dataset.modified)),
        })
    }

    fn supports_folder(&self) -> bool {
        self.folders
    }

    fn allows_empty_files(&self) -> bool {
        self.empty_files
    }

    fn open_file(&self, file: &RemoteFile) -> Result<Box<dyn Read + Send>> {
        let url = file
            .url()
            .ok_or_else(|| self.error(format!("{} has no url", file.path())))?;
        let (dataset, path) = url
            .strip_prefix(URL_SCHEME)
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| self.error(format!("unexpected url {url}")))?;
        let contents = self.file_content(&DatasetId::new(dataset), path)
            .ok_or_else(|| Error::not_found(format!("file {path}")))?;
        Ok(Box::new(Cursor::new(contents)))
    }
}
