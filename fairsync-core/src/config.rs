//! Settings: worker pool size and configured repositories.
//!
//! Settings are read from a TOML file and can be overridden from the
//! environment with `FAIRSYNC_MAX_WORKERS` and `FAIRSYNC_<REPOSITORY>_<KEY>`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const CONFIG_DIR_NAME: &str = ".fairsync";
const ENV_PREFIX: &str = "FAIRSYNC_";

/// Upper bound on download workers unless a caller asks for more explicitly.
pub const MAX_WORKERS: usize = 32;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

/// A data repository: which client talks to it and how.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct RepositoryConfig {
    /// Client implementation; defaults to the repository id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Landing page address, used to recognize dataset URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// DOI prefixes minted by this repository, e.g. `10.5281`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doi_prefixes: Vec<String>,
    /// Client-specific options.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl RepositoryConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    fn set(&mut self, key: &str, value: String) {
        match key {
            "client_id" => self.client_id = value,
            "name" => self.name = Some(value),
            "url" => self.url = Some(value),
            "api_url" => self.api_url = Some(value),
            "token" => self.token = Some(value),
            "doi_prefixes" => {
                self.doi_prefixes = value
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            }
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
    }
}

impl Settings {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from `path`; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("Looking for settings at {}", path.display());
        if !path.is_file() {
            log::debug!("No settings file found at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        log::info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// `$HOME/.fairsync/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))?;
        Some(PathBuf::from(home).join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Settings from the default location, overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        let mut settings = match Self::default_path() {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        settings.apply_env(std::env::vars())?;
        Ok(settings)
    }

    /// Overlay `FAIRSYNC_*` variables.
    ///
    /// Repository keys apply to configured repositories only; the longest
    /// matching repository id wins.
    pub fn apply_env(&mut self, vars: impl IntoIterator<Item = (String, String)>) -> Result<()> {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            if rest == "MAX_WORKERS" {
                let workers = value
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid {name}: {value:?}")))?;
                self.max_workers = Some(workers);
                continue;
            }

            let upper = rest.to_ascii_uppercase();
            let repository = self
                .repositories
                .keys()
                .filter(|id| {
                    let prefix = format!("{}_", id.to_ascii_uppercase());
                    upper.starts_with(&prefix) && upper.len() > prefix.len()
                })
                .max_by_key(|id| id.len())
                .cloned();
            let Some(id) = repository else {
                log::debug!("Ignoring {} (no such repository)", name);
                continue;
            };
            let key = rest[id.len() + 1..].to_ascii_lowercase();
            if let Some(config) = self.repositories.get_mut(&id) {
                config.set(&key, value);
            }
        }
        Ok(())
    }

    /// Number of download workers.
    pub fn workers(&self) -> usize {
        self.max_workers
            .unwrap_or_else(num_cpus::get)
            .clamp(1, MAX_WORKERS)
    }

    pub fn repository(&self, id: &str) -> Option<&RepositoryConfig> {
        self.repositories.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
max_workers = 4

[repositories.zenodo]
client_id = "zenodo"
url = "https://zenodo.org/"
doi_prefixes = ["10.5281"]

[repositories.4tu]
client_id = "djehuty"
url = "https://data.4tu.nl/"
doi_prefixes = ["10.4121"]
community = "tu-delft"
"#;

    #[test]
    fn parse_repositories() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        assert_eq!(settings.workers(), 4);
        let repo = settings.repository("4tu").unwrap();
        assert_eq!(repo.client_id, "djehuty");
        assert_eq!(repo.doi_prefixes, vec!["10.4121"]);
        assert_eq!(repo.extra.get("community").map(String::as_str), Some("tu-delft"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        let settings = Settings::from_toml_str(SAMPLE).unwrap();
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path).unwrap(), settings);
    }

    #[test]
    fn missing_file_is_default() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::load(tmp.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn environment_overrides_repository_keys() {
        let mut settings = Settings::from_toml_str(SAMPLE).unwrap();
        settings
            .apply_env(vec![
                ("FAIRSYNC_ZENODO_TOKEN".to_string(), "secret".to_string()),
                ("FAIRSYNC_4TU_API_URL".to_string(), "https://api".to_string()),
                ("FAIRSYNC_UNKNOWN_TOKEN".to_string(), "x".to_string()),
                ("FAIRSYNC_MAX_WORKERS".to_string(), "64".to_string()),
                ("PATH".to_string(), "/bin".to_string()),
            ])
            .unwrap();
        assert_eq!(settings.repository("zenodo").unwrap().token.as_deref(), Some("secret"));
        assert_eq!(settings.repository("4tu").unwrap().api_url.as_deref(), Some("https://api"));
        assert!(settings.repository("unknown").is_none());
        assert_eq!(settings.max_workers, Some(64));
        assert_eq!(settings.workers(), MAX_WORKERS);
    }

    #[test]
    fn invalid_worker_count_is_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(vec![("FAIRSYNC_MAX_WORKERS".to_string(), "many".to_string())])
            .unwrap_err();
        assert_eq!(err.error_type(), "config_error");
    }
}
