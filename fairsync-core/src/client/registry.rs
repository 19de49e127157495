//! Client factories keyed by client id, and per-client dataset caches.
//!
//! Backends register a factory once at startup; repositories from the
//! settings pick their factory through `client_id`. A [`Connection`] keeps
//! the remote datasets fetched through one client.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::client::Client;
use crate::config::{RepositoryConfig, Settings};
use crate::dataset::local::LocalDataset;
use crate::dataset::remote::RemoteDataset;
use crate::helpers::templates;
use crate::types::dataset_id::DatasetRef;
use crate::{Error, Result};

/// Builds a client for a repository id and its configuration.
pub type ClientFactory = Box<dyn Fn(&str, &RepositoryConfig) -> Result<Arc<dyn Client>> + Send + Sync>;

/// Where a user-supplied dataset reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetLocation {
    Remote { repository: String, reference: DatasetRef },
    Local(PathBuf),
}

/// An opened dataset of either kind.
#[derive(Debug)]
pub enum OpenDataset {
    Local(LocalDataset),
    Remote(RemoteDataset),
}

pub struct ClientRegistry {
    factories: BTreeMap<String, ClientFactory>,
    settings: Settings,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.factories.keys().collect::<Vec<_>>())
            .field("settings", &self.settings)
            .finish()
    }
}

impl ClientRegistry {
    pub fn new(settings: Settings) -> Self {
        Self {
            factories: BTreeMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn register<F>(&mut self, client_id: impl Into<String>, factory: F)
    where
        F: Fn(&str, &RepositoryConfig) -> Result<Arc<dyn Client>> + Send + Sync + 'static,
    {
        let client_id = client_id.into();
        log::debug!("Registered client {}", client_id);
        self.factories.insert(client_id, Box::new(factory));
    }

    pub fn client_ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Client for a configured repository id, or for a bare client id.
    pub fn client(&self, id: &str) -> Result<Arc<dyn Client>> {
        if let Some(config) = self.settings.repository(id) {
            let client_id = if config.client_id.is_empty() {
                id
            } else {
                config.client_id.as_str()
            };
            let factory = self
                .factories
                .get(client_id)
                .ok_or_else(|| Error::UnknownClient(client_id.to_string()))?;
            return factory(id, config);
        }
        match self.factories.get(id) {
            Some(factory) => factory(id, &RepositoryConfig::new(id)),
            None => Err(Error::UnknownRepository(id.to_string())),
        }
    }

    /// Classify `value` as a remote reference or a local path.
    ///
    /// URLs match repositories by address prefix, DOIs by registrant prefix.
    /// Anything unmatched is a local path.
    pub fn locate(&self, value: &str) -> Result<DatasetLocation> {
        let reference = DatasetRef::parse(value)?;
        let repository = match &reference {
            DatasetRef::Url(url) => self.settings.repositories.iter().find_map(|(id, config)| {
                let base = config.url.as_deref()?.trim_end_matches('/');
                (!base.is_empty() && url.starts_with(base)).then(|| id.clone())
            }),
            DatasetRef::Doi(doi) => {
                let prefix = doi.split('/').next().unwrap_or_default();
                self.settings
                    .repositories
                    .iter()
                    .find(|(_, config)| config.doi_prefixes.iter().any(|p| p == prefix))
                    .map(|(id, _)| id.clone())
            }
            _ => None,
        };
        Ok(match repository {
            Some(repository) => DatasetLocation::Remote {
                repository,
                reference,
            },
            None => DatasetLocation::Local(PathBuf::from(value)),
        })
    }

    pub fn open_dataset(&self, value: &str) -> Result<OpenDataset> {
        match self.locate(value)? {
            DatasetLocation::Remote {
                repository,
                reference,
            } => {
                let client = self.client(&repository)?;
                let id = client.get_dataset_id(&reference)?;
                Ok(OpenDataset::Remote(RemoteDataset::new(client, id)))
            }
            DatasetLocation::Local(path) => Ok(OpenDataset::Local(LocalDataset::open(path)?)),
        }
    }

    /// Initialize a local dataset; `template` may name a template or a
    /// repository whose client has one.
    pub fn init_dataset(&self, path: impl AsRef<Path>, template: Option<&str>) -> Result<LocalDataset> {
        let template = match template {
            None => None,
            Some(name) if templates::exists(name) => Some(name),
            Some(name) => {
                let config = self
                    .settings
                    .repository(name)
                    .ok_or_else(|| Error::InvalidTemplate(name.to_string()))?;
                Some(config.client_id.as_str()).filter(|id| templates::exists(id))
            }
        };
        LocalDataset::init(path, template)
    }

    pub fn connect(&self, id: &str) -> Result<Connection> {
        Ok(Connection::new(self.client(id)?))
    }
}

/// A client with the datasets fetched through it.
pub struct Connection {
    client: Arc<dyn Client>,
    datasets: HashMap<String, RemoteDataset>,
}

impl Connection {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self {
            client,
            datasets: HashMap::new(),
        }
    }

    pub fn client(&self) -> &Arc<dyn Client> {
        &self.client
    }

    /// The dataset `reference` points to, cached by its hash.
    pub fn get_dataset(&mut self, reference: &DatasetRef, refresh: bool) -> Result<&mut RemoteDataset> {
        let id = self.client.get_dataset_id(reference)?;
        let hash = self.client.get_dataset_hash(&id);
        let dataset = match self.datasets.entry(hash) {
            Entry::Occupied(entry) if !refresh => {
                log::debug!("Dataset {} served from cache", entry.key());
                entry.into_mut()
            }
            Entry::Occupied(mut entry) => {
                entry.insert(RemoteDataset::new(self.client.clone(), id));
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(RemoteDataset::new(self.client.clone(), id)),
        };
        Ok(dataset)
    }

    /// Forget a cached dataset; returns whether it was cached.
    pub fn invalidate(&mut self, reference: &DatasetRef) -> Result<bool> {
        let id = self.client.get_dataset_id(reference)?;
        Ok(self.datasets.remove(&self.client.get_dataset_hash(&id)).is_some())
    }

    pub fn clear(&mut self) {
        self.datasets.clear();
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}
