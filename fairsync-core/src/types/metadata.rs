//! Dataset metadata: an ordered attribute map with per-key normalization.
//!
//! Values are plain JSON values. Empty values (null, empty string, empty list
//! or map) are never stored; booleans and numbers always are. Each assignment
//! runs through a normalizer `(key, value) -> value`:
//!
//! | Key        | Normalization |
//! |------------|---------------|
//! | `doi`      | lowercased, `doi:` / `https://doi.org/` prefixes stripped, validated |
//! | `keywords` | strings split on `,` `;` and newlines, items trimmed |
//! | `authors`  | coerced to a list of person records |
//!
//! A snapshot taken on load lets [`Metadata::is_modified`] report local edits
//! without a round trip to where the metadata came from.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::types::person::{is_empty_value, PersonList};
use crate::{Error, Result};

static DOI: Lazy<Regex> = Lazy::new(|| {
    RegexBuilder::new(r"^10.\d{4,9}/[-._;()/:a-z0-9]+$")
        .case_insensitive(true)
        .build()
        .expect("valid DOI regex")
});
static KEYWORD_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[,;\n]").expect("valid keyword regex"));

const DOI_PREFIXES: &[&str] = &["doi:", "http://doi.org/", "https://doi.org/"];

/// Normalization hook applied to every assigned value.
pub type Normalizer = fn(&str, Value) -> Result<Value>;

/// Default normalization rules.
pub fn normalize(key: &str, value: Value) -> Result<Value> {
    match key {
        "doi" => normalize_doi(&value).map(Value::String),
        "keywords" => normalize_keywords(value),
        "authors" => Ok(PersonList::from_value(&value)?.to_value()),
        _ => Ok(value),
    }
}

/// Canonical form of a DOI, e.g. `10.4121/abc` for `https://doi.org/10.4121/ABC`.
pub fn normalize_doi(value: &Value) -> Result<String> {
    let Value::String(raw) = value else {
        return Err(Error::invalid_metadata("doi", "expected a string"));
    };
    let mut doi = raw.trim().to_lowercase();
    if let Some(prefix) = DOI_PREFIXES.iter().find(|p| doi.starts_with(*p)) {
        doi = doi[prefix.len()..].to_string();
    }
    if !DOI.is_match(&doi) {
        return Err(Error::invalid_metadata("doi", format!("invalid DOI {raw:?}")));
    }
    Ok(doi)
}

fn normalize_keywords(value: Value) -> Result<Value> {
    let keywords: Vec<String> = match value {
        Value::String(s) => KEYWORD_SEPARATOR
            .split(&s)
            .map(|k| k.trim().to_string())
            .collect(),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                other => Err(Error::invalid_metadata(
                    "keywords",
                    format!("expected a string, got {other}"),
                )),
            })
            .collect::<Result<_>>()?,
        other => {
            return Err(Error::invalid_metadata(
                "keywords",
                format!("expected a string or a list, got {other}"),
            ))
        }
    };
    Ok(Value::Array(
        keywords
            .into_iter()
            .filter(|k| !k.is_empty())
            .map(Value::String)
            .collect(),
    ))
}

/// Ordered metadata attributes.
#[derive(Debug, Clone)]
pub struct Metadata {
    attrs: Map<String, Value>,
    basis: Map<String, Value>,
    normalize: Normalizer,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::with_normalizer(normalize)
    }
}

impl PartialEq for Metadata {
    fn eq(&self, other: &Self) -> bool {
        self.attrs == other.attrs
    }
}

impl Serialize for Metadata {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.attrs.serialize(serializer)
    }
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata with a custom normalizer, e.g. for a backend-specific schema.
    pub fn with_normalizer(normalize: Normalizer) -> Self {
        Self {
            attrs: Map::new(),
            basis: Map::new(),
            normalize,
        }
    }

    /// Build from loaded attributes; the result is not modified.
    pub fn from_map(map: Map<String, Value>) -> Result<Self> {
        let mut metadata = Self::new();
        metadata.update(map)?;
        metadata.mark_clean();
        Ok(metadata)
    }

    /// Build from a JSON object; `null` yields empty metadata.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Self::from_map(map),
            other => Err(Error::invalid_metadata(
                "metadata",
                format!("expected a mapping, got {other}"),
            )),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    /// Assign a normalized value. Assigning an empty value removes the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        if is_empty_value(&value) {
            self.attrs.remove(&key);
            return Ok(());
        }
        let value = (self.normalize)(&key, value)?;
        self.attrs.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attrs.remove(key)
    }

    pub fn update(&mut self, entries: impl IntoIterator<Item = (String, Value)>) -> Result<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.attrs.clear();
    }

    pub fn iter(&self) -> serde_json::map::Iter<'_> {
        self.attrs.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.attrs.keys()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    /// Whether attributes changed since load or the last [`mark_clean`](Self::mark_clean).
    pub fn is_modified(&self) -> bool {
        self.attrs != self.basis
    }

    pub fn mark_clean(&mut self) {
        self.basis = self.attrs.clone();
    }

    /// Plain attribute map, ready to be written out.
    pub fn serialize(&self) -> Map<String, Value> {
        self.attrs.clone()
    }

    pub fn title(&self) -> Option<&str> {
        self.get_str("title")
    }

    pub fn doi(&self) -> Option<&str> {
        self.get_str("doi")
    }

    pub fn authors(&self) -> Result<PersonList> {
        match self.attrs.get("authors") {
            Some(value) => PersonList::from_value(value),
            None => Ok(PersonList::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn doi_is_canonicalized() {
        let mut metadata = Metadata::new();
        metadata.set("doi", "https://doi.org/10.4121/ABC-123").unwrap();
        assert_eq!(metadata.doi(), Some("10.4121/abc-123"));
        metadata.set("doi", "doi:10.5281/zenodo.1234").unwrap();
        assert_eq!(metadata.doi(), Some("10.5281/zenodo.1234"));
    }

    #[test]
    fn invalid_doi_is_rejected() {
        let mut metadata = Metadata::new();
        let err = metadata.set("doi", "not a doi").unwrap_err();
        assert_eq!(err.error_type(), "invalid_metadata");
        assert!(metadata.set("doi", 5).is_err());
    }

    #[test]
    fn keywords_are_split_and_trimmed() {
        let mut metadata = Metadata::new();
        metadata.set("keywords", "rust; data ,sync\nfair").unwrap();
        assert_eq!(
            metadata.get("keywords"),
            Some(&json!(["rust", "data", "sync", "fair"]))
        );
        assert!(metadata.set("keywords", json!([1, 2])).is_err());
    }

    #[test]
    fn authors_become_person_records() {
        let mut metadata = Metadata::new();
        metadata.set("authors", "Doe, John; jane@example.org").unwrap();
        let authors = metadata.authors().unwrap();
        assert_eq!(authors.len(), 2);
        assert_eq!(authors.0[0].surname.as_deref(), Some("Doe"));
        assert_eq!(
            metadata.serialize()["authors"][1],
            json!({"email": "jane@example.org"})
        );
    }

    #[test]
    fn empty_values_are_dropped_but_false_and_zero_kept() {
        let mut metadata = Metadata::new();
        metadata.set("title", "T").unwrap();
        metadata.set("title", "").unwrap();
        metadata.set("open", false).unwrap();
        metadata.set("version", 0).unwrap();
        metadata.set("tags", json!([])).unwrap();
        assert!(!metadata.contains_key("title"));
        assert!(!metadata.contains_key("tags"));
        assert_eq!(metadata.get("open"), Some(&json!(false)));
        assert_eq!(metadata.get("version"), Some(&json!(0)));
    }

    #[test]
    fn modification_is_a_snapshot_compare() {
        let map = json!({"title": "A", "keywords": "x"});
        let mut metadata = Metadata::from_value(map).unwrap();
        assert!(!metadata.is_modified());

        metadata.set("title", "B").unwrap();
        assert!(metadata.is_modified());
        metadata.set("title", "A").unwrap();
        assert!(!metadata.is_modified());
    }

    #[test]
    fn custom_normalizer_replaces_defaults() {
        fn upper(_key: &str, value: Value) -> Result<Value> {
            Ok(match value {
                Value::String(s) => Value::String(s.to_uppercase()),
                other => other,
            })
        }
        let mut metadata = Metadata::with_normalizer(upper);
        metadata.set("doi", "anything").unwrap();
        assert_eq!(metadata.doi(), Some("ANYTHING"));
    }

    #[test]
    fn insertion_order_is_kept() {
        let mut metadata = Metadata::new();
        metadata.set("zeta", 1).unwrap();
        metadata.set("alpha", 2).unwrap();
        let keys: Vec<_> = metadata.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
    }
}
