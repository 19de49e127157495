//! Files held by a remote repository.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::types::file::File;
use crate::Result;

/// File attributes as reported by HTTP response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeaders {
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub md5: Option<String>,
}

impl FileHeaders {
    /// Read `content-length`, `content-type` and `content-md5` from header pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut headers = Self::default();
        for (name, value) in pairs {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "content-length" => headers.size = value.parse().ok(),
                "content-type" => headers.content_type = Some(value.to_string()),
                "content-md5" => headers.md5 = Some(value.to_ascii_lowercase()),
                _ => {}
            }
        }
        headers
    }
}

/// Resolves file attributes a backend payload left out.
pub trait HeaderSource: Send + Sync {
    fn headers(&self, url: &str) -> Result<FileHeaders>;
}

/// A file of a remote dataset.
#[derive(Clone, Default)]
pub struct RemoteFile {
    path: String,
    url: Option<String>,
    id: Option<String>,
    size: Option<u64>,
    content_type: Option<String>,
    md5: Option<String>,
    headers: OnceCell<FileHeaders>,
    source: Option<Arc<dyn HeaderSource>>,
}

impl fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("url", &self.url)
            .field("id", &self.id)
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .field("md5", &self.md5)
            .finish()
    }
}

impl PartialEq for RemoteFile {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.url == other.url
            && self.id == other.id
            && self.size == other.size
            && self.md5 == other.md5
    }
}

impl RemoteFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }

    /// Attributes missing from the payload are fetched from `source` on first use.
    pub fn with_header_source(mut self, source: Arc<dyn HeaderSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn headers(&self) -> Result<Option<&FileHeaders>> {
        let (Some(source), Some(url)) = (&self.source, &self.url) else {
            return Ok(None);
        };
        self.headers
            .get_or_try_init(|| {
                log::debug!("Fetching headers of {}", url);
                source.headers(url)
            })
            .map(Some)
    }
}

impl File for RemoteFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn size(&self) -> Result<Option<u64>> {
        if self.size.is_some() {
            return Ok(self.size);
        }
        Ok(self.headers()?.and_then(|h| h.size))
    }

    fn content_type(&self) -> Result<Option<String>> {
        if self.content_type.is_some() {
            return Ok(self.content_type.clone());
        }
        Ok(self.headers()?.and_then(|h| h.content_type.clone()))
    }

    fn md5(&self) -> Result<Option<String>> {
        if self.md5.is_some() {
            return Ok(self.md5.clone());
        }
        Ok(self.headers()?.and_then(|h| h.md5.clone()))
    }

    fn matches(&self, identifier: &str) -> bool {
        if identifier == self.name() || identifier == self.path {
            return true;
        }
        if self.url.as_deref() == Some(identifier) || self.id.as_deref() == Some(identifier) {
            return true;
        }
        matches!(self.md5(), Ok(Some(md5)) if md5 == identifier)
    }
}
