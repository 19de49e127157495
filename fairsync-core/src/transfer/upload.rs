//! Upload planning and verified uploads.
//!
//! Backends without folders get folder structure emulated with zip archives:
//!
//! | Strategy          | Simple files | Files in folders                       |
//! |-------------------|--------------|----------------------------------------|
//! | `mirror`          | direct       | direct (needs folder support)          |
//! | `archive_all`     | archived     | archived, all in `dataset.zip`         |
//! | `archive_folders` | direct       | one archive per top-level folder       |
//!
//! `auto` picks `mirror` when the backend supports folders and
//! `archive_folders` otherwise.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::helpers::archive::{self, ArchiveMethod};
use crate::helpers::hash;
use crate::types::dataset_id::DatasetId;
use crate::types::file::{top_level, File, FileMap, Notify};
use crate::types::local_file::LocalFile;
use crate::types::manifest::ArchiveRecord;
use crate::types::remote_file::RemoteFile;
use crate::{Error, Result};

/// Name of the single archive built by `archive_all`.
pub const ARCHIVE_ALL_NAME: &str = "dataset";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStrategy {
    #[default]
    Auto,
    Mirror,
    ArchiveAll,
    ArchiveFolders,
}

impl UploadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStrategy::Auto => "auto",
            UploadStrategy::Mirror => "mirror",
            UploadStrategy::ArchiveAll => "archive_all",
            UploadStrategy::ArchiveFolders => "archive_folders",
        }
    }

    /// Replace `auto` by a concrete strategy.
    pub fn resolve(self, supports_folder: bool) -> UploadStrategy {
        match self {
            UploadStrategy::Auto if supports_folder => UploadStrategy::Mirror,
            UploadStrategy::Auto => UploadStrategy::ArchiveFolders,
            other => other,
        }
    }
}

impl fmt::Display for UploadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "auto" => Ok(UploadStrategy::Auto),
            "mirror" => Ok(UploadStrategy::Mirror),
            "archive_all" => Ok(UploadStrategy::ArchiveAll),
            "archive_folders" => Ok(UploadStrategy::ArchiveFolders),
            other => Err(Error::InvalidStrategy(other.to_string())),
        }
    }
}

/// Which files go up as they are and which go into which archive.
///
/// Paths are keys of the file map the plan was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPlan {
    pub strategy: UploadStrategy,
    pub direct: Vec<String>,
    pub archives: BTreeMap<String, Vec<String>>,
}

impl UploadPlan {
    pub fn new<F: File>(
        files: &FileMap<F>,
        strategy: UploadStrategy,
        client: &dyn Client,
    ) -> Result<UploadPlan> {
        let supports_folder = client.supports_folder();
        let strategy = strategy.resolve(supports_folder);
        let mut plan = UploadPlan {
            strategy,
            ..UploadPlan::default()
        };

        if strategy == UploadStrategy::ArchiveAll {
            if !files.is_empty() {
                plan.archives
                    .insert(ARCHIVE_ALL_NAME.to_string(), files.keys().cloned().collect());
            }
            return Ok(plan);
        }

        for (path, file) in files {
            if file.is_simple() {
                plan.direct.push(path.clone());
                continue;
            }
            match strategy {
                UploadStrategy::Mirror if supports_folder => plan.direct.push(path.clone()),
                UploadStrategy::Mirror => {
                    return Err(Error::FoldersNotSupported {
                        client: client.client_id().to_string(),
                        path: path.clone(),
                    })
                }
                _ => plan
                    .archives
                    .entry(top_level(path).to_string())
                    .or_default()
                    .push(path.clone()),
            }
        }
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.archives.is_empty()
    }
}

/// Content token of an archive: MD5 over the member checksums in order.
pub fn archive_token(files: &FileMap<LocalFile>, members: &[String]) -> Result<String> {
    let mut md5s = Vec::with_capacity(members.len());
    for member in members {
        let file = files
            .get(member)
            .ok_or_else(|| Error::not_found(format!("file not found: {member}")))?;
        md5s.push(file.compute_md5()?);
    }
    Ok(hash::content_token(md5s))
}

/// Content token of archive members already extracted below `root`.
///
/// Files are taken in path order, the order an upload plan lists members in.
pub fn extracted_token(root: &Path, names: &[String]) -> Result<String> {
    let mut members: Vec<&String> = names.iter().filter(|name| root.join(name).is_file()).collect();
    members.sort();
    let md5s = members
        .into_iter()
        .map(|name| hash::md5_file(root.join(name)))
        .collect::<Result<Vec<_>>>()?;
    Ok(hash::content_token(md5s.iter().map(String::as_str)))
}

/// An archive written next to the dataset for the duration of an upload.
#[derive(Debug)]
pub struct BuiltArchive {
    pub name: String,
    pub file: LocalFile,
    pub content: String,
}

impl BuiltArchive {
    pub fn record(&self) -> Result<ArchiveRecord> {
        Ok(ArchiveRecord {
            md5: self.file.compute_md5()?.to_string(),
            content: self.content.clone(),
            file: None,
        })
    }

    pub fn remove(self) {
        if let Err(e) = fs::remove_file(self.file.fullpath()) {
            log::warn!("Failed to remove temporary archive {}: {}", self.file.fullpath().display(), e);
        }
    }
}

/// Write `root/<name>.zip` holding `members` at their relative paths.
pub fn build_archive(
    root: &Path,
    name: &str,
    files: &FileMap<LocalFile>,
    members: &[String],
    method: ArchiveMethod,
) -> Result<BuiltArchive> {
    let path = root.join(format!("{name}.zip"));
    if path.exists() {
        return Err(Error::InvalidArchiveName {
            name: name.to_string(),
        });
    }

    let mut entries: Vec<(PathBuf, String)> = Vec::with_capacity(members.len());
    for member in members {
        let file = files
            .get(member)
            .ok_or_else(|| Error::not_found(format!("file not found: {member}")))?;
        entries.push((file.fullpath().to_path_buf(), member.clone()));
    }
    let content = archive_token(files, members)?;

    let written = archive::write_zip(&path, &entries, method)
        .and_then(|()| LocalFile::new(&path, Some(root)));
    let file = match written {
        Ok(file) => file,
        Err(e) => {
            let _ = fs::remove_file(&path);
            return Err(e);
        }
    };
    log::debug!("Built archive {} with {} files", name, members.len());
    Ok(BuiltArchive {
        name: name.to_string(),
        file,
        content,
    })
}

/// Upload a file and check that the backend stored what was sent.
///
/// A mismatching remote file is deleted before the error is returned.
pub fn upload_verified(
    client: &dyn Client,
    id: &DatasetId,
    file: &LocalFile,
    callback: Option<Notify<'_>>,
) -> Result<RemoteFile> {
    if file.is_empty() && !client.allows_empty_files() {
        return Err(Error::EmptyFile {
            path: file.path().to_string(),
        });
    }

    let local_md5 = file.compute_md5()?.to_string();
    let remote = client.upload_file(id, file, callback)?;

    let size_ok = remote.size()? == Some(file.len());
    let md5_ok = remote
        .md5()?
        .is_some_and(|md5| md5.eq_ignore_ascii_case(&local_md5));
    if !size_ok || !md5_ok {
        log::debug!("Uploaded {} does not match, removing remote copy", file.path());
        if let Err(e) = client.delete_file(id, &remote) {
            log::warn!("Failed to delete mismatching upload {}: {}", file.path(), e);
        }
        return Err(Error::UploadMismatch {
            path: file.path().to_string(),
        });
    }

    log::info!("Uploaded {}", file.path());
    Ok(remote)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files(paths: &[&str]) -> FileMap<RemoteFile> {
        paths
            .iter()
            .map(|p| (p.to_string(), RemoteFile::new(*p)))
            .collect()
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("".parse::<UploadStrategy>().unwrap(), UploadStrategy::Auto);
        assert_eq!(
            "archive_folders".parse::<UploadStrategy>().unwrap(),
            UploadStrategy::ArchiveFolders
        );
        assert_eq!(
            "zip".parse::<UploadStrategy>().unwrap_err().error_type(),
            "invalid_strategy"
        );
        assert_eq!(UploadStrategy::ArchiveAll.to_string(), "archive_all");
    }

    #[test]
    fn auto_follows_folder_support() {
        assert_eq!(UploadStrategy::Auto.resolve(true), UploadStrategy::Mirror);
        assert_eq!(UploadStrategy::Auto.resolve(false), UploadStrategy::ArchiveFolders);
        assert_eq!(UploadStrategy::ArchiveAll.resolve(true), UploadStrategy::ArchiveAll);
    }

    #[test]
    fn plan_groups_by_top_level_folder() {
        let map = files(&["a.txt", "data/x.csv", "data/sub/y.csv", "img/z.png"]);
        let client = NoFolders;
        let plan = UploadPlan::new(&map, UploadStrategy::Auto, &client).unwrap();

        assert_eq!(plan.strategy, UploadStrategy::ArchiveFolders);
        assert_eq!(plan.direct, vec!["a.txt"]);
        assert_eq!(plan.archives.len(), 2);
        assert_eq!(plan.archives["data"], vec!["data/sub/y.csv", "data/x.csv"]);
        assert_eq!(plan.archives["img"], vec!["img/z.png"]);
    }

    #[test]
    fn archive_all_takes_simple_files_too() {
        let map = files(&["a.txt", "data/x.csv"]);
        let plan = UploadPlan::new(&map, UploadStrategy::ArchiveAll, &NoFolders).unwrap();
        assert!(plan.direct.is_empty());
        assert_eq!(plan.archives[ARCHIVE_ALL_NAME], vec!["a.txt", "data/x.csv"]);
    }

    #[test]
    fn mirror_without_folders_fails() {
        let map = files(&["a.txt", "data/x.csv"]);
        let err = UploadPlan::new(&map, UploadStrategy::Mirror, &NoFolders).unwrap_err();
        assert_eq!(err.error_type(), "folders_not_supported");
    }

    #[test]
    fn archive_token_follows_member_checksums() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("data")).unwrap();
        fs::write(tmp.path().join("data/a.csv"), "1").unwrap();
        fs::write(tmp.path().join("data/b.csv"), "2").unwrap();
        let mut map = FileMap::new();
        for p in ["data/a.csv", "data/b.csv"] {
            map.insert(p.to_string(), LocalFile::new(tmp.path().join(p), Some(tmp.path())).unwrap());
        }
        let members = vec!["data/a.csv".to_string(), "data/b.csv".to_string()];

        let built = build_archive(tmp.path(), "data", &map, &members, ArchiveMethod::Deflate).unwrap();
        assert_eq!(built.file.path(), "data.zip");
        assert!(built.file.is_archive().unwrap());
        let expected = hash::content_token([
            "c4ca4238a0b923820dcc509a6f75849b",
            "c81e728d9d4c2f636f067f89cc14862c",
        ]);
        assert_eq!(built.content, expected);

        let again = build_archive(tmp.path(), "data", &map, &members, ArchiveMethod::Deflate);
        assert_eq!(again.unwrap_err().error_type(), "invalid_archive_name");

        let path = built.file.fullpath().to_path_buf();
        built.remove();
        assert!(!path.exists());
    }

    #[test]
    fn extracted_token_matches_the_built_archive() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("data/sub")).unwrap();
        fs::write(tmp.path().join("data/x.csv"), "1").unwrap();
        fs::write(tmp.path().join("data/sub/y.csv"), "2").unwrap();
        let mut map = FileMap::new();
        for p in ["data/sub/y.csv", "data/x.csv"] {
            map.insert(p.to_string(), LocalFile::new(tmp.path().join(p), Some(tmp.path())).unwrap());
        }
        let members: Vec<String> = map.keys().cloned().collect();
        let token = archive_token(&map, &members).unwrap();

        // Extraction order and directory entries do not change the token.
        let names = vec![
            "data".to_string(),
            "data/x.csv".to_string(),
            "data/sub".to_string(),
            "data/sub/y.csv".to_string(),
        ];
        assert_eq!(extracted_token(tmp.path(), &names).unwrap(), token);
    }

    struct NoFolders;

    impl Client for NoFolders {
        fn client_id(&self) -> &str {
            "plain"
        }
        fn get_dataset_id(&self, _: &crate::types::dataset_id::DatasetRef) -> Result<DatasetId> {
            unimplemented!()
        }
        fn create_dataset(&self, _: &crate::types::metadata::Metadata) -> Result<DatasetId> {
            unimplemented!()
        }
        fn get_metadata(&self, _: &DatasetId) -> Result<crate::types::metadata::Metadata> {
            unimplemented!()
        }
        fn save_metadata(&self, _: &DatasetId, _: &crate::types::metadata::Metadata) -> Result<()> {
            unimplemented!()
        }
        fn get_files(&self, _: &DatasetId) -> Result<Vec<RemoteFile>> {
            unimplemented!()
        }
        fn upload_file(&self, _: &DatasetId, _: &LocalFile, _: Option<Notify<'_>>) -> Result<RemoteFile> {
            unimplemented!()
        }
        fn delete_file(&self, _: &DatasetId, _: &RemoteFile) -> Result<()> {
            unimplemented!()
        }
        fn delete_dataset(&self, _: &DatasetId) -> Result<()> {
            unimplemented!()
        }
        fn get_details(&self, _: &DatasetId) -> Result<crate::client::DatasetDetails> {
            unimplemented!()
        }
        fn supports_folder(&self) -> bool {
            false
        }
        fn open_file(&self, _: &RemoteFile) -> Result<Box<dyn std::io::Read + Send>> {
            unimplemented!()
        }
    }
}
