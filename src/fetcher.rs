//! HTTP fetcher for URL feeds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::config::FetchConfig;

const RETRY_DELAY_MS: u64 = 2000;

/// Source of feed bodies.
///
/// Bodies are untrusted text: they are only ever scanned for address
/// tokens, never parsed as structured data.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the body of `url` decoded as text.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// HTTP client for fetching feeds
pub struct HttpFetcher {
    client: Client,
    max_retries: u32,
    max_body_bytes: usize,
    retry_delay: Duration,
}

impl HttpFetcher {
    /// Create a new fetcher from configuration
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(format!("addrsync/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            max_retries: config.max_retries.max(1),
            max_body_bytes: config.max_body_bytes,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Override the base delay between attempts
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// One GET attempt with size validation.
    async fn fetch_once(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP {}", response.status());
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_body_bytes as u64 {
                anyhow::bail!(
                    "Response too large: {} bytes (max: {} bytes)",
                    content_length,
                    self.max_body_bytes
                );
            }
        }

        // Decodes with the charset from Content-Type, UTF-8 when absent
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if body.len() > self.max_body_bytes {
            anyhow::bail!(
                "Downloaded content too large: {} bytes (max: {} bytes)",
                body.len(),
                self.max_body_bytes
            );
        }

        Ok(body)
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = retry_backoff(self.retry_delay, attempt);
                debug!("Retry {} after {:?} for {}", attempt, delay, url);
                tokio::time::sleep(delay).await;
            }

            match self.fetch_once(url).await {
                Ok(body) => {
                    info!("Fetched {} ({} bytes)", url, body.len());
                    return Ok(body);
                }
                Err(e) => {
                    debug!("Attempt {} for {} failed: {:#}", attempt + 1, url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("No attempt made"))
            .context(format!("Failed to fetch {}", url)))
    }
}

/// Delay before retry number `attempt` (1-based): doubles each time,
/// saturating instead of overflowing.
fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

// Note: Default is intentionally not implemented for HttpFetcher
// because new() can fail and we want explicit error handling.
