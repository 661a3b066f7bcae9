//! Media download.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{CaveError, Result};

/// Fetches the raw bytes of a media descriptor (usually a URL).
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, descriptor: &str) -> Result<Vec<u8>>;
}

/// HTTP fetcher with a per-file timeout.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(&self, descriptor: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(descriptor)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Fetcher over a fixed map of descriptor to bytes, for tests.
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(descriptor.into(), bytes);
    }
}

#[async_trait]
impl MediaFetcher for MemoryFetcher {
    async fn fetch(&self, descriptor: &str) -> Result<Vec<u8>> {
        self.files
            .get(descriptor)
            .cloned()
            .ok_or_else(|| CaveError::blob(descriptor, "no such descriptor"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_fetcher_serves_registered_bytes() {
        let mut fetcher = MemoryFetcher::new();
        fetcher.insert("u/one", vec![1, 2, 3]);
        assert_eq!(fetcher.fetch("u/one").await.unwrap(), vec![1, 2, 3]);
        assert!(fetcher.fetch("u/two").await.is_err());
    }
}
