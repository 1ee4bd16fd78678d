//! Content fetching for watched URLs.
//!
//! A plain HTTP GET with a fixed timeout and an identifying `User-Agent`.
//! Any non-success status is a [`FetchError`]; the orchestrator skips that
//! URL for the current run.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::models::FetchedDocument;

/// Fetches the raw content behind a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError>;
}

/// [`Fetcher`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { client, timeout })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self, FetchError> {
        Self::new(Duration::from_secs(config.timeout_secs), &config.user_agent)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let classify = |source: reqwest::Error| {
            if source.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout: self.timeout,
                }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    source,
                }
            }
        };

        let resp = self.client.get(url).send().await.map_err(classify)?;

        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }

        let bytes = resp.bytes().await.map_err(classify)?;
        Ok(FetchedDocument::new(url, bytes.to_vec()))
    }
}
