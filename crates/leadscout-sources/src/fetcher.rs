//! Page fetching capability shared by all adapters.
//!
//! Adapters never open connections themselves; they receive a [`PageFetcher`]
//! so the same adapter runs against the network or a scripted fixture.

use crate::error::{is_transient_status, Result, SourceError};
use async_trait::async_trait;
use leadscout_core::ScanningConfig;
use reqwest::Client;

/// A fetched page, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// URL that was requested
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    /// HTTP status code
    pub status: u16,
    /// Response body as text
    pub body: String,
}

impl FetchResponse {
    /// A 200 response with no redirect.
    #[must_use]
    pub fn ok(url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status: 200,
            body: body.into(),
        }
    }

    /// A response with the given status and no redirect.
    #[must_use]
    pub fn with_status(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            ..Self::ok(url, body)
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the status is worth retrying under backoff.
    #[must_use]
    pub fn is_transient_status(&self) -> bool {
        is_transient_status(self.status)
    }

    /// Turn a non-2xx response into the matching error.
    pub fn error_for_status(&self) -> Result<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(SourceError::Http {
                url: self.url.clone(),
                status: self.status,
            })
        }
    }
}

/// Something that can retrieve a page by URL.
///
/// Implementations return `Ok` for every HTTP status and reserve `Err` for
/// failures where no response arrived.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a URL.
    async fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

/// [`PageFetcher`] backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Build a fetcher with the configured timeout and user agent.
    pub fn new(config: &ScanningConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .gzip(true)
            .build()
            .map_err(|e| SourceError::Transient {
                url: String::new(),
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse> {
        tracing::debug!(url = %url, "fetching page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Transient {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await.map_err(|e| SourceError::Transient {
            url: url.to_string(),
            message: format!("failed to read body: {e}"),
        })?;

        Ok(FetchResponse {
            url: url.to_string(),
            final_url,
            status,
            body,
        })
    }
}
