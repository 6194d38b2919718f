//! HTTP fetching for external sources
//!
//! Every non-2xx status is a failure and feeds the caller's rate limiter.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::services::rate_limiter::RateLimiter;

/// HTTP fetch errors
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {0}: {1}")]
    Status(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Text fetcher used by the sitemap index and source providers
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

/// `reqwest`-backed fetcher with a fixed user agent
pub struct ReqwestFetcher {
    http_client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        tracing::debug!(url = %url, "HTTP GET");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(FetchError::Status(status.as_u16(), truncate(&error_text, 200)));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))
    }
}

/// Fetch through a shared limiter, recording the outcome for backoff
pub async fn fetch_limited(
    fetcher: &dyn HttpFetcher,
    limiter: &RateLimiter,
    url: &str,
) -> Result<String, FetchError> {
    limiter.wait().await;
    match fetcher.fetch_text(url).await {
        Ok(body) => {
            limiter.record_success().await;
            Ok(body)
        }
        Err(e) => {
            tracing::warn!(source = %limiter.source(), url = %url, error = %e, "Fetch failed");
            limiter.record_failure().await;
            Err(e)
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
