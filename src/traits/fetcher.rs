use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

/// Errors from fetching a catalog or firmware blob.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to fetch {url}: {reason}")]
    Failed { url: String, reason: String },

    #[error("I/O error while fetching {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Abstraction over byte downloads (release catalog, hex and init files).
/// This allows mocking the network in tests.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch the full contents behind `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Real implementation that reads local paths and `file://` URLs.
#[derive(Default)]
pub struct FileFetcher;

impl FileFetcher {
    fn resolve(url: &str) -> Result<PathBuf, FetchError> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if url.contains("://") {
            return Err(FetchError::Failed {
                url: url.to_string(),
                reason: "unsupported URL scheme".to_string(),
            });
        }
        Ok(PathBuf::from(url))
    }
}

#[async_trait]
impl ResourceFetcher for FileFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let path = Self::resolve(url)?;
        tokio::fs::read(&path).await.map_err(|source| FetchError::Io {
            url: url.to_string(),
            source,
        })
    }
}
