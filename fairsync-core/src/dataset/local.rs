//! A dataset stored in a local directory governed by `manifest.yaml`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fs_err as fs;
use walkdir::WalkDir;

use crate::client::Client;
use crate::dataset::remote::RemoteDataset;
use crate::dataset::{Dataset, DatasetCache};
use crate::helpers::archive::ArchiveMethod;
use crate::helpers::checksums::{ChecksumCache, CHECKSUM_FILE_NAME};
use crate::helpers::rules::RuleCache;
use crate::helpers::templates::{self, DEFAULT_TEMPLATE};
use crate::transfer::upload::{build_archive, upload_verified, UploadPlan, UploadStrategy};
use crate::types::dataset_id::DatasetId;
use crate::types::file::{File, FileMap, Notify};
use crate::types::local_file::LocalFile;
use crate::types::manifest::{ArchiveRecord, FileRules, Manifest, MANIFEST_FILE_NAME};
use crate::types::metadata::Metadata;
use crate::{Error, Result};

#[derive(Debug)]
pub struct LocalDataset {
    root: PathBuf,
    manifest_path: PathBuf,
    template: String,
    rules: FileRules,
    matcher: Arc<RuleCache>,
    checksums: ChecksumCache,
    cache: DatasetCache<LocalFile>,
}

impl LocalDataset {
    /// Create a dataset at `path` with metadata fields from `template`.
    ///
    /// The directory is created if needed. An existing manifest is an error.
    pub fn init(path: impl AsRef<Path>, template: Option<&str>) -> Result<Self> {
        let root = path.as_ref();
        fs::create_dir_all(root)?;
        if !root.is_dir() {
            return Err(Error::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        let manifest_path = root.join(MANIFEST_FILE_NAME);
        if manifest_path.exists() {
            return Err(Error::AlreadyDataset {
                path: root.to_path_buf(),
            });
        }

        let template = template.unwrap_or(DEFAULT_TEMPLATE);
        let manifest = Manifest {
            metadata: templates::load(template)?,
            template: template.to_string(),
            ..Manifest::default()
        };
        manifest.save(&manifest_path)?;
        log::info!("Initialized dataset at {} ({} template)", root.display(), template);
        Self::open(root)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref();
        if !root.is_dir() {
            return Err(Error::NotADirectory {
                path: root.to_path_buf(),
            });
        }
        let manifest_path = root.join(MANIFEST_FILE_NAME);
        let manifest = Manifest::load(&manifest_path)?;
        Ok(Self {
            root: root.to_path_buf(),
            manifest_path,
            template: manifest.template,
            rules: manifest.files,
            matcher: Arc::new(RuleCache::new()),
            checksums: ChecksumCache::load(root)?,
            cache: DatasetCache::default(),
        })
    }

    /// Share compiled rules with other datasets.
    pub fn with_matcher(mut self, matcher: Arc<RuleCache>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn file_rules(&self) -> &FileRules {
        &self.rules
    }

    /// Edit the file rules; the file cache is dropped.
    pub fn file_rules_mut(&mut self) -> &mut FileRules {
        self.cache.files = None;
        &mut self.rules
    }

    /// Remote datasets recorded in the manifest.
    pub fn remotes(&self) -> Result<BTreeMap<String, DatasetId>> {
        Ok(Manifest::load(&self.manifest_path)?.remotes)
    }

    pub fn set_remote(&mut self, key: &str, id: &DatasetId) -> Result<()> {
        self.update_manifest(|manifest| {
            manifest.remotes.insert(key.to_string(), id.clone());
        })
    }

    /// Store the file rules in the manifest.
    pub fn save_files(&mut self, force: bool) -> Result<()> {
        if !force && self.is_modified()? == Some(true) {
            return Err(Error::DatasetModified);
        }
        let rules = self.rules.clone();
        self.update_manifest(|manifest| manifest.files = rules)
    }

    /// Store metadata and file rules.
    pub fn save(&mut self) -> Result<()> {
        self.save_metadata(false)?;
        self.save_files(false)
    }

    pub(crate) fn remember_checksum(&mut self, file: &LocalFile) {
        self.checksums.record(file);
    }

    /// Write `.fairly_md5` for every selected file with a known checksum.
    pub fn save_checksums(&mut self) -> Result<()> {
        if let Some(files) = &self.cache.files {
            for file in files.values() {
                self.checksums.record(file);
            }
        }
        let root = self.root.clone();
        self.checksums
            .retain(|name| root.join(name).is_file());
        self.checksums.save(&self.root)
    }

    /// Read-modify-write of the manifest.
    ///
    /// A write through this dataset does not count as an outside change.
    pub(crate) fn update_manifest(&mut self, edit: impl FnOnce(&mut Manifest)) -> Result<()> {
        let mut manifest = Manifest::load(&self.manifest_path)?;
        edit(&mut manifest);
        manifest.save(&self.manifest_path)?;
        if self.cache.seen.is_some() {
            self.cache.seen = Some(self.modified()?);
        }
        Ok(())
    }

    /// Selected files, owned, with checksums shared back to the cache later.
    pub(crate) fn snapshot_files(&mut self) -> Result<FileMap<LocalFile>> {
        Ok(self.get_files(true)?.clone())
    }

    /// Upload the dataset as a new remote dataset.
    ///
    /// Direct files go first, then one zip per archive group. Any failure
    /// deletes the new remote dataset and returns the original error.
    pub fn upload(
        &mut self,
        client: &Arc<dyn Client>,
        strategy: UploadStrategy,
        method: ArchiveMethod,
        callback: Option<Notify<'_>>,
    ) -> Result<RemoteDataset> {
        let metadata = self.metadata()?.clone();
        let files = self.snapshot_files()?;
        let plan = UploadPlan::new(&files, strategy, client.as_ref())?;

        let id = client.create_dataset(&metadata)?;
        log::info!("Created dataset {} on {}", id, client.client_id());

        let result = self
            .upload_plan(client.as_ref(), &id, &files, &plan, method, callback)
            .and_then(|archives| {
                self.rules.archives = archives.clone();
                self.update_manifest(|manifest| {
                    manifest.files.archives = archives;
                    manifest.remotes.insert(client.remote_key().to_string(), id.clone());
                })
            });
        if let Err(e) = result {
            if let Err(cleanup) = client.delete_dataset(&id) {
                log::warn!("Failed to delete dataset {} after failed upload: {}", id, cleanup);
            }
            return Err(e);
        }

        for file in files.values() {
            self.checksums.record(file);
        }
        self.save_checksums()?;
        log::info!(
            "Uploaded {} files and {} archives to {}",
            plan.direct.len(),
            plan.archives.len(),
            client.client_id()
        );
        Ok(RemoteDataset::new(client.clone(), id))
    }

    fn upload_plan(
        &self,
        client: &dyn Client,
        id: &DatasetId,
        files: &FileMap<LocalFile>,
        plan: &UploadPlan,
        method: ArchiveMethod,
        callback: Option<Notify<'_>>,
    ) -> Result<BTreeMap<String, ArchiveRecord>> {
        for path in &plan.direct {
            let file = files
                .get(path)
                .ok_or_else(|| Error::not_found(format!("file not found: {path}")))?;
            upload_verified(client, id, file, callback)?;
        }

        let mut archives = BTreeMap::new();
        for (name, members) in &plan.archives {
            let built = build_archive(&self.root, name, files, members, method)?;
            let uploaded = upload_verified(client, id, &built.file, callback).and_then(|_| built.record());
            built.remove();
            archives.insert(name.clone(), uploaded?);
        }
        Ok(archives)
    }

    fn is_reserved(path: &str) -> bool {
        path == MANIFEST_FILE_NAME || path == CHECKSUM_FILE_NAME
    }
}

impl Dataset for LocalDataset {
    type File = LocalFile;

    fn cache(&self) -> &DatasetCache<LocalFile> {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut DatasetCache<LocalFile> {
        &mut self.cache
    }

    fn load_metadata(&self) -> Result<Metadata> {
        Metadata::from_map(Manifest::load(&self.manifest_path)?.metadata)
    }

    fn store_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        let attrs = metadata.serialize();
        self.update_manifest(|manifest| manifest.metadata = attrs)
    }

    fn load_files(&self) -> Result<Vec<LocalFile>> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let file = LocalFile::new(entry.path(), Some(&self.root))?;
            let path = file.path();
            if Self::is_reserved(path) {
                continue;
            }
            if !self
                .matcher
                .is_selected(path, &self.rules.includes, &self.rules.excludes)?
            {
                continue;
            }
            let file = match self.checksums.lookup(path, file.modified(), file.len()) {
                Some(md5) => {
                    let md5 = md5.to_string();
                    file.with_md5(md5)
                }
                None => file,
            };
            files.push(file);
        }
        log::debug!("Selected {} files in {}", files.len(), self.root.display());
        Ok(files)
    }

    fn modified(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.manifest_path.is_file() {
            return Ok(None);
        }
        let time = fs::metadata(&self.manifest_path)?.modified()?;
        Ok(Some(DateTime::<Utc>::from(time)))
    }

    fn title(&mut self) -> Result<Option<String>> {
        Ok(self.metadata()?.title().map(str::to_string))
    }

    fn size(&mut self) -> Result<Option<u64>> {
        Ok(Some(self.files()?.values().map(LocalFile::len).sum()))
    }

    fn created(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.manifest_path.is_file() {
            return Ok(None);
        }
        let meta = fs::metadata(&self.manifest_path)?;
        let time = meta.created().or_else(|_| meta.modified())?;
        Ok(Some(DateTime::<Utc>::from(time)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn dataset_with(includes: &[&str]) -> (tempfile::TempDir, LocalDataset) {
        let tmp = tempfile::tempdir().unwrap();
        let mut ds = LocalDataset::init(tmp.path(), None).unwrap();
        for rule in includes {
            ds.file_rules_mut().includes.push((*rule).into());
        }
        ds.save_files(true).unwrap();
        (tmp, ds)
    }

    #[test]
    fn init_writes_template_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("new");
        let ds = LocalDataset::init(&root, Some("zenodo")).unwrap();
        assert_eq!(ds.template(), "zenodo");

        let manifest = Manifest::load(root.join(MANIFEST_FILE_NAME)).unwrap();
        assert!(manifest.metadata.contains_key("access_type"));

        let err = LocalDataset::init(&root, None).unwrap_err();
        assert_eq!(err.error_type(), "already_dataset");
    }

    #[test]
    fn open_requires_a_directory() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "file.txt", "x");
        let err = LocalDataset::open(tmp.path().join("file.txt")).unwrap_err();
        assert_eq!(err.error_type(), "not_a_directory");
    }

    #[test]
    fn selection_follows_segment_rules() {
        let (tmp, mut ds) = dataset_with(&["*.csv"]);
        write(tmp.path(), "a.csv", "a");
        write(tmp.path(), "b.txt", "b");
        write(tmp.path(), "sub/c.csv", "c");

        let files = ds.get_files(true).unwrap();
        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["a.csv"]);
    }

    #[test]
    fn without_includes_nothing_is_selected() {
        let (tmp, mut ds) = dataset_with(&[]);
        write(tmp.path(), "a.csv", "a");
        assert!(ds.get_files(true).unwrap().is_empty());
    }

    #[test]
    fn manifest_and_checksums_are_never_selected() {
        let (tmp, mut ds) = dataset_with(&["*"]);
        write(tmp.path(), "a.csv", "a");
        ds.get_files(true).unwrap();
        ds.save_checksums().unwrap();

        let paths: Vec<String> = ds.get_files(true).unwrap().keys().cloned().collect();
        assert_eq!(paths, vec!["a.csv".to_string()]);
    }

    #[test]
    fn excludes_win_over_includes() {
        let (tmp, mut ds) = dataset_with(&["*", "data/*"]);
        ds.file_rules_mut().excludes.push("*.tmp".into());
        write(tmp.path(), "a.csv", "a");
        write(tmp.path(), "a.tmp", "a");
        write(tmp.path(), "data/x.csv", "x");

        let paths: Vec<String> = ds.get_files(true).unwrap().keys().cloned().collect();
        assert_eq!(paths, vec!["a.csv".to_string(), "data/x.csv".to_string()]);
    }

    #[test]
    fn rescans_reuse_cached_checksums() {
        let (tmp, mut ds) = dataset_with(&["*.csv"]);
        write(tmp.path(), "a.csv", "a");
        for file in ds.get_files(true).unwrap().values() {
            file.compute_md5().unwrap();
        }
        ds.save_checksums().unwrap();

        let mut reopened = LocalDataset::open(tmp.path()).unwrap();
        let file = &reopened.get_files(true).unwrap()["a.csv"];
        assert_eq!(file.known_md5(), Some("0cc175b9c0f1b6a831c399e269772661"));
    }

    #[test]
    fn metadata_roundtrips_through_the_manifest() {
        let (tmp, mut ds) = dataset_with(&[]);
        ds.set_metadata([
            ("title".to_string(), json!("Rivers")),
            ("keywords".to_string(), json!("water; flow")),
        ])
        .unwrap();
        ds.save().unwrap();

        let mut reopened = LocalDataset::open(tmp.path()).unwrap();
        let metadata = reopened.metadata().unwrap();
        assert_eq!(metadata.title(), Some("Rivers"));
        assert_eq!(metadata.get("keywords"), Some(&json!(["water", "flow"])));
        assert_eq!(reopened.title().unwrap().as_deref(), Some("Rivers"));
    }

    #[test]
    fn outside_manifest_edits_block_saving() {
        let (tmp, mut ds) = dataset_with(&[]);
        ds.set_metadata([("title".to_string(), json!("Mine"))]).unwrap();

        let mut manifest = Manifest::load(ds.manifest_path()).unwrap();
        manifest.metadata.insert("title".into(), json!("Theirs"));
        manifest.save(tmp.path().join(MANIFEST_FILE_NAME)).unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        filetime::set_file_mtime(ds.manifest_path(), filetime::FileTime::from_system_time(later)).unwrap();

        assert_eq!(ds.save_metadata(false).unwrap_err().error_type(), "dataset_modified");
        ds.save_metadata(true).unwrap();
        assert_eq!(ds.metadata().unwrap().title(), Some("Mine"));
    }

    #[test]
    fn remotes_are_recorded_by_key() {
        let (_tmp, mut ds) = dataset_with(&[]);
        ds.set_remote("zenodo", &DatasetId::new("42")).unwrap();
        assert_eq!(ds.remotes().unwrap()["zenodo"], DatasetId::new("42"));
    }
}
