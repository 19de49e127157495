//! Dataset identifiers.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Result;

static DOI_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(doi:|https?://doi\.org/)(.+)$").expect("valid regex"));
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^https?://").expect("valid regex"));

/// A backend-native dataset identifier, e.g. `{id: "123", version: "2"}`.
///
/// Backends decide which keys they need; the map is ordered so it serializes
/// the same way every time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(pub BTreeMap<String, String>);

impl DatasetId {
    /// An identifier with a single `id` key.
    pub fn new(id: impl Into<String>) -> Self {
        let mut map = BTreeMap::new();
        map.insert("id".to_string(), id.into());
        Self(map)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The `id` component, if any.
    pub fn id(&self) -> Option<&str> {
        self.get("id")
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// A user-supplied reference to a dataset, before a backend resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetRef {
    /// A DOI without prefix, e.g. `10.4121/abc`.
    Doi(String),
    /// A landing page or API URL.
    Url(String),
    /// A plain identifier.
    Id(String),
    /// An already resolved identifier.
    Native(DatasetId),
}

impl DatasetRef {
    /// Classify a user-supplied identifier.
    pub fn parse(value: &str) -> Result<DatasetRef> {
        let value = value.trim();
        if value.is_empty() {
            return Err(crate::Error::InvalidIdentifier(value.to_string()));
        }
        if let Some(caps) = DOI_PREFIX.captures(value) {
            return Ok(DatasetRef::Doi(caps[2].to_string()));
        }
        if URL.is_match(value) {
            return Ok(DatasetRef::Url(value.to_string()));
        }
        Ok(DatasetRef::Id(value.to_string()))
    }
}

impl From<DatasetId> for DatasetRef {
    fn from(id: DatasetId) -> Self {
        DatasetRef::Native(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_classifies_identifiers() {
        assert_eq!(
            DatasetRef::parse("doi:10.4121/abc").unwrap(),
            DatasetRef::Doi("10.4121/abc".into())
        );
        assert_eq!(
            DatasetRef::parse("https://doi.org/10.5281/zenodo.1").unwrap(),
            DatasetRef::Doi("10.5281/zenodo.1".into())
        );
        assert_eq!(
            DatasetRef::parse("https://zenodo.org/records/1").unwrap(),
            DatasetRef::Url("https://zenodo.org/records/1".into())
        );
        assert_eq!(DatasetRef::parse("1234").unwrap(), DatasetRef::Id("1234".into()));
        assert!(DatasetRef::parse("  ").is_err());
    }

    #[test]
    fn dataset_id_is_ordered_and_displayable() {
        let id = DatasetId::new("17").with("version", "2");
        assert_eq!(id.id(), Some("17"));
        assert_eq!(id.to_string(), "id=17,version=2");
    }
}
