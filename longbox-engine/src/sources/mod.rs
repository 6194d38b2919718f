//! Secondary metadata sources
//!
//! A source turns a series name into candidate [`SeriesProfile`]s and a series
//! id into its issue list. Providers fetch through the shared
//! [`HttpFetcher`](crate::http::HttpFetcher) and the source's shared
//! [`RateLimiter`](crate::services::rate_limiter::RateLimiter).

pub mod comicvine;

use async_trait::async_trait;
use thiserror::Error;

use crate::http::FetchError;
use crate::models::{IssueCandidate, MetadataSource, SeriesProfile};

pub use comicvine::ComicVineProvider;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Source answered, but with an error payload
    #[error("{provider} API error: {message}")]
    Api { provider: MetadataSource, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// Provider lacks credentials or configuration
    #[error("{0} is not configured")]
    NotConfigured(MetadataSource),
}

impl ProviderError {
    /// Transport-level failure (as opposed to a bad payload)
    pub fn is_transport(&self) -> bool {
        matches!(self, ProviderError::Fetch(FetchError::Network(_)) | ProviderError::Fetch(FetchError::Status(..)))
    }
}

#[async_trait]
pub trait SeriesSourceProvider: Send + Sync {
    fn source(&self) -> MetadataSource;

    /// Candidate series for a name
    async fn search_series(&self, name: &str) -> Result<Vec<SeriesProfile>, ProviderError>;

    /// Issues of one series
    async fn list_issues(&self, series_id: &str) -> Result<Vec<IssueCandidate>, ProviderError>;
}
