//! One-directional differences between two keyed collections.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::file::{same_content, File, FileMap};
use crate::types::metadata::Metadata;
use crate::Result;

/// Added, modified and removed entries of "mine" (`L`) against "theirs" (`R`).
///
/// Modified entries hold `(mine, theirs)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff<L, R = L> {
    pub added: BTreeMap<String, L>,
    pub modified: BTreeMap<String, (L, R)>,
    pub removed: BTreeMap<String, R>,
}

impl<L, R> Default for Diff<L, R> {
    fn default() -> Self {
        Self {
            added: BTreeMap::new(),
            modified: BTreeMap::new(),
            removed: BTreeMap::new(),
        }
    }
}

impl<L, R> Diff<L, R> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

/// Compare two collections with a fallible equality.
pub fn diff_by<'a, L, R, IL, IR, F>(mine: IL, theirs: IR, mut same: F) -> Result<Diff<L, R>>
where
    L: Clone + 'a,
    R: Clone + 'a,
    IL: IntoIterator<Item = (&'a String, &'a L)>,
    IR: IntoIterator<Item = (&'a String, &'a R)>,
    F: FnMut(&L, &R) -> Result<bool>,
{
    let mut theirs: BTreeMap<&String, &R> = theirs.into_iter().collect();
    let mut diff = Diff::default();
    for (key, value) in mine {
        match theirs.remove(key) {
            None => {
                diff.added.insert(key.clone(), value.clone());
            }
            Some(other) => {
                if !same(value, other)? {
                    diff.modified.insert(key.clone(), (value.clone(), other.clone()));
                }
            }
        }
    }
    for (key, other) in theirs {
        diff.removed.insert(key.clone(), other.clone());
    }
    Ok(diff)
}

/// Metadata attributes compared by value.
pub fn diff_metadata(mine: &Metadata, theirs: &Metadata) -> Diff<Value> {
    let mut diff = Diff::default();
    for (key, value) in mine.iter() {
        match theirs.get(key) {
            None => {
                diff.added.insert(key.clone(), value.clone());
            }
            Some(other) if other != value => {
                diff.modified.insert(key.clone(), (value.clone(), other.clone()));
            }
            Some(_) => {}
        }
    }
    for (key, other) in theirs.iter() {
        if !mine.contains_key(key) {
            diff.removed.insert(key.clone(), other.clone());
        }
    }
    diff
}

/// Files compared by size and checksum.
pub fn diff_files<L, R>(mine: &FileMap<L>, theirs: &FileMap<R>) -> Result<Diff<L, R>>
where
    L: File + Clone,
    R: File + Clone,
{
    diff_by(mine, theirs, |a, b| same_content(a, b))
}
