//! reqwest-backed page fetcher.
//!
//! Used for dblp listing pages and for downloading audio challenges.

use crate::error::{HindexError, Result};
use crate::session::PageFetcher;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// User agent string for requests
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// HTTP client with optional proxy
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Build HTTP client with optional proxy
    pub fn new(user_agent: &str, proxy: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .cookie_store(true);

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                HindexError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| HindexError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response> {
        debug!(url = url, "GET");
        let response = self
            .client
            .get(url)
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(HindexError::RateLimited(60));
        }

        if !status.is_success() {
            return Err(HindexError::Api {
                code: status.as_u16() as i32,
                message: format!("HTTP error: {} for {}", status, url),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn get_text(&self, url: &str) -> Result<String> {
        Ok(self.send(url).await?.text().await?)
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        Ok(self.send(url).await?.bytes().await?.to_vec())
    }
}
