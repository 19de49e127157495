//! fairsync core library
//!
//! Keeps a local dataset directory and a record on a remote data repository
//! in step: which files belong to the dataset, what changed on either side,
//! and how to move the difference.
//!
//! # Architecture
//!
//! - `types`: files, metadata, persons, diffs, the manifest
//! - `helpers`: rule matching, checksums, archives, templates
//! - `client`: the backend contract and the client registry
//! - `transfer`: verified uploads and downloads, part uploads
//! - `dataset`: local and remote datasets, store, push and pull

pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod helpers;
pub mod transfer;
pub mod types;

pub use error::{Error, Result};

pub use types::{
    ArchiveRecord, DatasetId, DatasetRef, Diff, File, FileMap, FileRules, IncludeRule, LocalFile,
    Manifest, Metadata, Notify, Person, PersonList, Progress, RemoteFile,
};

pub use client::registry::{ClientRegistry, Connection, DatasetLocation, OpenDataset};
pub use client::{Client, DatasetDetails, DatasetStatus};
pub use config::{RepositoryConfig, Settings};
pub use dataset::{
    locate_remote, pull, push, Dataset, LocalDataset, RemoteDataset, StoreOptions, SyncOptions,
    SyncSummary,
};
pub use helpers::archive::ArchiveMethod;
pub use helpers::rules::RuleCache;
pub use transfer::UploadStrategy;
