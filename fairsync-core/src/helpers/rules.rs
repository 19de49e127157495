//! File rule matching.
//!
//! A rule is a `/`-separated pattern where `*` matches any run of characters
//! within one segment and `?` matches exactly one character. Segments are
//! matched positionally, so a rule only matches paths with the same number of
//! segments. Matching ignores case.
//!
//! | Rule          | Matches                      | Does not match               |
//! |---------------|------------------------------|------------------------------|
//! | `*.csv`       | `a.csv`, `B.CSV`             | `data/a.csv`                 |
//! | `data/*.csv`  | `data/x.csv`                 | `x.csv`, `data/sub/x.csv`    |
//! | `table_??.*`  | `table_01.csv`               | `table_1.csv`                |
//! | `data/*/*`    | `data/set1/results.csv`      | `data/results.csv`           |

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use regex::{Regex, RegexBuilder};

use crate::types::manifest::IncludeRule;
use crate::{Error, Result};

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".")
}

/// Compiled rules keyed by their raw text.
///
/// Shared by reference between datasets; compiling happens once per rule.
#[derive(Debug, Default)]
pub struct RuleCache {
    compiled: RwLock<HashMap<String, Arc<Vec<Regex>>>>,
}

impl RuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(rule: &str) -> Result<Vec<Regex>> {
        segments(rule)
            .map(|segment| {
                let pattern = regex::escape(segment)
                    .replace(r"\*", ".*")
                    .replace(r"\?", ".");
                RegexBuilder::new(&format!("^{pattern}$"))
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| Error::InvalidRule {
                        rule: rule.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    fn get(&self, rule: &str) -> Result<Arc<Vec<Regex>>> {
        {
            let compiled = self.compiled.read().unwrap_or_else(|e| e.into_inner());
            if let Some(regexes) = compiled.get(rule) {
                return Ok(regexes.clone());
            }
        }
        log::debug!("Compiling file rule {:?}", rule);
        let regexes = Arc::new(Self::compile(rule)?);
        self.compiled
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(rule.to_string(), regexes.clone());
        Ok(regexes)
    }

    /// Whether `path` matches `rule`.
    pub fn matches(&self, path: &str, rule: &str) -> Result<bool> {
        let regexes = self.get(rule)?;
        let parts: Vec<&str> = segments(path).collect();
        if parts.len() != regexes.len() {
            return Ok(false);
        }
        Ok(parts.iter().zip(regexes.iter()).all(|(part, re)| re.is_match(part)))
    }

    pub fn matches_any<'r>(&self, path: &str, rules: impl IntoIterator<Item = &'r str>) -> Result<bool> {
        for rule in rules {
            if self.matches(path, rule)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// A path is selected when it matches an include and no exclude.
    ///
    /// Without includes nothing is selected.
    pub fn is_selected(&self, path: &str, includes: &[IncludeRule], excludes: &[String]) -> Result<bool> {
        let included = self.matches_any(path, includes.iter().flat_map(|rule| rule.patterns()))?;
        if !included {
            return Ok(false);
        }
        Ok(!self.matches_any(path, excludes.iter().map(String::as_str))?)
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.compiled.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
