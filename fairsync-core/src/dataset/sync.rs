//! Push and pull: apply the difference between a local dataset and its
//! remote counterpart in one direction.
//!
//! Metadata is overwritten as a whole whenever the two sides differ; the
//! last writer wins. Files are reconciled one at a time, so a failure leaves
//! the files handled so far in place.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use fs_err as fs;

use crate::client::Client;
use crate::dataset::local::LocalDataset;
use crate::dataset::remote::RemoteDataset;
use crate::dataset::Dataset;
use crate::helpers::archive::ArchiveMethod;
use crate::transfer::download::download_file;
use crate::transfer::upload::{
    archive_token, build_archive, extracted_token, upload_verified, UploadPlan, UploadStrategy,
};
use crate::types::dataset_id::DatasetRef;
use crate::types::diff::diff_files;
use crate::types::file::{File, FileMap, Notify};
use crate::types::local_file::LocalFile;
use crate::types::manifest::{ArchiveRecord, FileRules};
use crate::types::remote_file::RemoteFile;
use crate::{Error, Result};

/// How archive groups are formed and written during a sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub strategy: UploadStrategy,
    pub method: ArchiveMethod,
}

/// What a push or pull changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub metadata_updated: bool,
    /// Files uploaded (push) or downloaded (pull) that were missing.
    pub transferred: usize,
    /// Files deleted and transferred again because their content differed.
    pub replaced: usize,
    pub deleted: usize,
    /// Archives uploaded (push) or extracted (pull).
    pub archives: usize,
}

impl SyncSummary {
    pub fn is_empty(&self) -> bool {
        *self == SyncSummary::default()
    }
}

/// Find the remote dataset a local dataset is synchronized with.
///
/// In order: `target`, the dataset's DOI, the remote recorded in the
/// manifest under the client's key.
pub fn locate_remote(
    local: &mut LocalDataset,
    client: &Arc<dyn Client>,
    target: Option<&DatasetRef>,
) -> Result<RemoteDataset> {
    if let Some(target) = target {
        let id = client.get_dataset_id(target)?;
        return Ok(RemoteDataset::new(client.clone(), id));
    }

    if let Some(doi) = local.metadata()?.doi().map(str::to_string) {
        match client.get_dataset_id(&DatasetRef::Doi(doi.clone())) {
            Ok(id) => return Ok(RemoteDataset::new(client.clone(), id)),
            Err(e) => log::debug!("No dataset for DOI {} on {}: {}", doi, client.client_id(), e),
        }
    }

    let remotes = local.remotes()?;
    match remotes.get(client.remote_key()) {
        Some(id) => Ok(RemoteDataset::new(client.clone(), id.clone())),
        None => Err(Error::NoRemote {
            path: local.path().to_path_buf(),
        }),
    }
}

fn archive_file_name(name: &str) -> String {
    format!("{name}.zip")
}

/// Keep files unwrapped from a recorded archive grouped under its name,
/// whatever the strategy would do with them.
fn pin_recorded(plan: &mut UploadPlan, rules: &FileRules, files: &FileMap<LocalFile>) {
    for (name, record) in &rules.archives {
        let Some(members) = rules.archive_members(&record.file_name(name)) else {
            continue;
        };
        let pinned: Vec<String> = files.keys().filter(|path| members.contains(path)).cloned().collect();
        if pinned.is_empty() {
            continue;
        }
        plan.direct.retain(|path| !pinned.contains(path));
        for group in plan.archives.values_mut() {
            group.retain(|path| !pinned.contains(path));
        }
        plan.archives.retain(|_, group| !group.is_empty());

        let group = plan.archives.entry(name.clone()).or_default();
        group.extend(pinned);
        group.sort();
        group.dedup();
    }
}

fn subset<F: Clone>(files: &FileMap<F>, paths: &[String]) -> FileMap<F> {
    paths
        .iter()
        .filter_map(|path| files.get(path).map(|file| (path.clone(), file.clone())))
        .collect()
}

/// Make `remote` match `local`.
pub fn push(
    local: &mut LocalDataset,
    remote: &mut RemoteDataset,
    options: SyncOptions,
    callback: Option<Notify<'_>>,
) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    let client = remote.client().clone();
    let id = remote.id().clone();

    if !local.diff_metadata_with(remote)?.is_empty() {
        let metadata = local.metadata()?.clone();
        remote.replace_metadata(metadata);
        remote.save_metadata(true)?;
        summary.metadata_updated = true;
    }

    let files = local.snapshot_files()?;
    let mut plan = UploadPlan::new(&files, options.strategy, client.as_ref())?;
    pin_recorded(&mut plan, local.file_rules(), &files);
    let recorded = local.file_rules().archives.clone();

    let archive_paths: BTreeSet<String> = plan
        .archives
        .keys()
        .map(|name| archive_file_name(name))
        .chain(recorded.iter().map(|(name, record)| record.file_name(name)))
        .collect();
    let remote_files = remote.get_files(true)?.clone();
    let remote_direct: FileMap<RemoteFile> = remote_files
        .iter()
        .filter(|(path, _)| !archive_paths.contains(*path))
        .map(|(path, file)| (path.clone(), file.clone()))
        .collect();

    let diff = diff_files(&subset(&files, &plan.direct), &remote_direct)?;
    for (path, file) in &diff.removed {
        client.delete_file(&id, file)?;
        log::debug!("Deleted remote {}", path);
        summary.deleted += 1;
    }
    for (local_file, remote_file) in diff.modified.values() {
        client.delete_file(&id, remote_file)?;
        upload_verified(client.as_ref(), &id, local_file, callback)?;
        summary.replaced += 1;
    }
    for file in diff.added.values() {
        upload_verified(client.as_ref(), &id, file, callback)?;
        summary.transferred += 1;
    }

    let mut archives = BTreeMap::new();
    let mut renamed = Vec::new();
    for (name, members) in &plan.archives {
        let record = recorded.get(name);
        let remote_name = record.map_or_else(|| archive_file_name(name), |record| record.file_name(name));
        let remote_archive = remote_files.get(&remote_name);
        let token = archive_token(&files, members)?;
        if let (Some(record), Some(_)) = (record, remote_archive) {
            if record.content == token {
                archives.insert(name.clone(), record.clone());
                continue;
            }
        }
        if let Some(old) = remote_archive {
            client.delete_file(&id, old)?;
        }
        let built = build_archive(local.path(), name, &files, members, options.method)?;
        let uploaded = upload_verified(client.as_ref(), &id, &built.file, callback).and_then(|_| built.record());
        built.remove();
        archives.insert(name.clone(), uploaded?);
        if remote_name != archive_file_name(name) {
            renamed.push((remote_name, archive_file_name(name)));
        }
        summary.archives += 1;
    }
    for (name, record) in recorded.iter().filter(|(name, _)| !plan.archives.contains_key(*name)) {
        if let Some(old) = remote_files.get(&record.file_name(name)) {
            client.delete_file(&id, old)?;
            summary.deleted += 1;
        }
    }

    let rules = local.file_rules_mut();
    rules.archives = archives.clone();
    for (from, to) in &renamed {
        rules.rename_archive(from, to);
    }
    local.update_manifest(|manifest| {
        manifest.files.archives = archives;
        for (from, to) in &renamed {
            manifest.files.rename_archive(from, to);
        }
    })?;
    for file in files.values() {
        local.remember_checksum(file);
    }
    local.save_checksums()?;
    remote.get_files(true)?;

    log::info!("Pushed to {} on {}: {:?}", id, client.client_id(), summary);
    Ok(summary)
}

/// Make `local` match `remote`.
pub fn pull(
    local: &mut LocalDataset,
    remote: &mut RemoteDataset,
    options: SyncOptions,
    callback: Option<Notify<'_>>,
) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    let client = remote.client().clone();
    let root = local.path().to_path_buf();

    if !remote.diff_metadata_with(local)?.is_empty() {
        let metadata = remote.metadata()?.clone();
        local.replace_metadata(metadata);
        local.save_metadata(true)?;
        summary.metadata_updated = true;
    }

    let files = local.snapshot_files()?;
    let mut plan = UploadPlan::new(&files, options.strategy, client.as_ref())?;
    pin_recorded(&mut plan, local.file_rules(), &files);
    let mut recorded = local.file_rules().archives.clone();

    let remote_files = remote.get_files(true)?.clone();
    let remote_direct: FileMap<RemoteFile> = remote_files
        .iter()
        .filter(|(path, _)| {
            !recorded
                .iter()
                .any(|(name, record)| record.file_name(name) == **path)
        })
        .map(|(path, file)| (path.clone(), file.clone()))
        .collect();

    let mut rules = local.file_rules().clone();
    let diff = diff_files(&remote_direct, &subset(&files, &plan.direct))?;
    for (path, file) in &diff.removed {
        fs::remove_file(file.fullpath())?;
        rules.forget_path(path);
        log::debug!("Deleted local {}", path);
        summary.deleted += 1;
    }
    for (remote_file, local_file) in diff.modified.values() {
        fs::remove_file(local_file.fullpath())?;
        let downloaded = download_file(client.as_ref(), remote_file, &root, callback)?;
        local.remember_checksum(&downloaded);
        summary.replaced += 1;
    }
    for (path, file) in &diff.added {
        let downloaded = download_file(client.as_ref(), file, &root, callback)?;
        local.remember_checksum(&downloaded);
        rules.include_path(path);
        summary.transferred += 1;
    }

    for (name, record) in recorded.iter_mut() {
        let Some(remote_archive) = remote_files.get(&record.file_name(name)) else {
            continue;
        };
        let same = remote_archive
            .md5()?
            .is_some_and(|md5| md5.eq_ignore_ascii_case(&record.md5));
        if same {
            continue;
        }
        let downloaded = download_file(client.as_ref(), remote_archive, &root, callback)?;
        let md5 = downloaded.compute_md5()?.to_string();
        let names = downloaded.unpack(&root, callback)?;
        if let Some(members) = rules.archive_members_mut(&record.file_name(name)) {
            *members = names.clone();
        }
        *record = ArchiveRecord {
            md5,
            content: extracted_token(&root, &names)?,
            file: record.file.clone(),
        };
        summary.archives += 1;
    }

    rules.archives = recorded;
    *local.file_rules_mut() = rules;
    local.save_files(true)?;
    local.get_files(true)?;
    local.save_checksums()?;

    log::info!("Pulled from {} on {}: {:?}", remote.id(), client.client_id(), summary);
    Ok(summary)
}
