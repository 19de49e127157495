//! fairsync test kit.
//!
//! Helpers for driving the sync engine end to end without a network.
//!
//! # Key Types
//!
//! - [`TestDir`]: temporary dataset directory with write, archive and listing helpers
//! - [`MemoryClient`]: repository backend that keeps datasets in memory
//!
//! # Fault injection
//!
//! | Knob | Effect |
//! |------|--------|
//! | `fail_uploads_after(n)` | upload number `n + 1` fails with a backend error |
//! | `corrupt_uploads(true)` | stored bytes differ from the uploaded file |
//! | `lock_parts(n)` | every part stays locked for `n` passes |
//! | `with_folders(false)` | paths with `/` are rejected |
//! | `with_empty_files(false)` | empty files are rejected before upload |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fairsync_core::{ArchiveMethod, Client, LocalDataset, UploadStrategy};
//! use fairsync_testkit::{MemoryClient, TestDir};
//!
//! let dir = TestDir::new().unwrap();
//! dir.write_file("data.csv", b"a,b\n1,2\n").unwrap();
//! let mut local = LocalDataset::init(dir.root(), None).unwrap();
//! local.file_rules_mut().includes.push("*".into());
//!
//! let client: Arc<dyn Client> = Arc::new(MemoryClient::new("memory"));
//! local.upload(&client, UploadStrategy::Auto, ArchiveMethod::Deflate, None).unwrap();
//! ```

mod dir;
mod integration;
mod memory;

pub use dir::{tar_gz_bytes, zip_bytes, TestDir};
pub use memory::{MemoryClient, MemoryDataset};

/// Re-export fairsync_core for convenience in tests.
pub use fairsync_core;
