//! [`ResourceFetcher`] over HTTP(S) with `reqwest`.
//!
//! Enabled with the `http` cargo feature.

use async_trait::async_trait;
use tracing::debug;

use super::fetcher::{FetchError, ResourceFetcher};

fn failed(url: &str, reason: impl ToString) -> FetchError {
    FetchError::Failed {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

/// Downloads `http://` and `https://` URLs.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxy, timeouts, user agent).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(failed(url, "unsupported URL scheme"));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| failed(url, e))?;
        let bytes = response.bytes().await.map_err(|e| failed(url, e))?;

        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}
