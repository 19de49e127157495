//! The dataset manifest (`manifest.yaml`).
//!
//! The manifest lives at the root of a local dataset and records its
//! metadata, which files belong to it, archives uploaded on its behalf, and
//! the remote datasets it is known under.

use std::collections::BTreeMap;
use std::path::Path;

use fs_err as fs;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::types::dataset_id::DatasetId;
use crate::Result;

/// Manifest file name at the dataset root.
pub const MANIFEST_FILE_NAME: &str = "manifest.yaml";

/// Missing and `null` sections both read as empty.
fn null_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, deserialize_with = "null_default")]
    pub metadata: Map<String, Value>,

    #[serde(default, deserialize_with = "null_default")]
    pub template: String,

    #[serde(default, deserialize_with = "null_default")]
    pub files: FileRules,

    /// Remote datasets keyed by repository id.
    #[serde(
        default,
        deserialize_with = "null_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub remotes: BTreeMap<String, DatasetId>,
}

/// File selection rules of a dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileRules {
    #[serde(default, deserialize_with = "null_default")]
    pub includes: Vec<IncludeRule>,

    #[serde(default, deserialize_with = "null_default")]
    pub excludes: Vec<String>,

    /// Archives uploaded in place of folders, keyed by archive name.
    #[serde(
        default,
        deserialize_with = "null_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub archives: BTreeMap<String, ArchiveRecord>,
}

/// An inclusion rule: a pattern, or an archive name with the rules for the
/// files extracted from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncludeRule {
    Pattern(String),
    Archive(BTreeMap<String, Vec<String>>),
}

impl IncludeRule {
    pub fn archive(name: impl Into<String>, members: Vec<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert(name.into(), members);
        IncludeRule::Archive(map)
    }

    /// Patterns a path is matched against.
    pub fn patterns(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            IncludeRule::Pattern(rule) => Box::new(std::iter::once(rule.as_str())),
            IncludeRule::Archive(map) => {
                Box::new(map.values().flat_map(|rules| rules.iter().map(String::as_str)))
            }
        }
    }
}

impl From<&str> for IncludeRule {
    fn from(rule: &str) -> Self {
        IncludeRule::Pattern(rule.to_string())
    }
}

/// Checksum of an uploaded archive and the content token of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub md5: String,
    pub content: String,
    /// Remote file name when it is not `<name>.zip`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl ArchiveRecord {
    /// Name of the remote archive recorded under `name`.
    pub fn file_name(&self, name: &str) -> String {
        self.file.clone().unwrap_or_else(|| format!("{name}.zip"))
    }
}

impl FileRules {
    /// Add a literal include for `path` unless one exists.
    pub fn include_path(&mut self, path: &str) {
        let exists = self
            .includes
            .iter()
            .any(|rule| matches!(rule, IncludeRule::Pattern(p) if p == path));
        if !exists {
            self.includes.push(IncludeRule::Pattern(path.to_string()));
        }
    }

    /// Drop a literal include for `path`.
    pub fn forget_path(&mut self, path: &str) {
        self.includes
            .retain(|rule| !matches!(rule, IncludeRule::Pattern(p) if p == path));
    }

    /// Member rules of the archive named `file`, if it was unwrapped here.
    pub fn archive_members(&self, file: &str) -> Option<&Vec<String>> {
        self.includes.iter().find_map(|rule| match rule {
            IncludeRule::Archive(map) => map.get(file),
            IncludeRule::Pattern(_) => None,
        })
    }

    pub fn archive_members_mut(&mut self, file: &str) -> Option<&mut Vec<String>> {
        self.includes.iter_mut().find_map(|rule| match rule {
            IncludeRule::Archive(map) => map.get_mut(file),
            IncludeRule::Pattern(_) => None,
        })
    }

    /// Move the member rules of archive `from` to archive `to`.
    pub fn rename_archive(&mut self, from: &str, to: &str) {
        for rule in &mut self.includes {
            if let IncludeRule::Archive(map) = rule {
                if let Some(members) = map.remove(from) {
                    map.insert(to.to_string(), members);
                }
            }
        }
    }
}

impl Manifest {
    /// Load a manifest; a missing or empty file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            log::debug!("No manifest at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path.as_ref(), content)?;
        log::debug!("Manifest saved to {}", path.as_ref().display());
        Ok(())
    }
}
