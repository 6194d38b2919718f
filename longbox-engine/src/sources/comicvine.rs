//! ComicVine volume search
//!
//! ComicVine calls a series a "volume". Search goes through
//! `/api/search/?resources=volume`, issues through `/api/issues/?filter=volume:<id>`.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use super::{ProviderError, SeriesSourceProvider};
use crate::http::{fetch_limited, HttpFetcher};
use crate::models::{IssueCandidate, MetadataSource, SeriesProfile};
use crate::services::rate_limiter::RateLimiter;

pub const COMICVINE_BASE_URL: &str = "https://comicvine.gamespot.com/api";
const SEARCH_LIMIT: u32 = 20;
const STATUS_OK: i64 = 1;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status_code: i64,
    #[serde(default)]
    error: String,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CvName {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CvVolume {
    id: u64,
    name: Option<String>,
    publisher: Option<CvName>,
    /// Sent as a string, sometimes empty
    start_year: Option<String>,
    count_of_issues: Option<u32>,
    /// Newline separated
    aliases: Option<String>,
    #[serde(default)]
    people: Vec<CvName>,
}

#[derive(Debug, Deserialize)]
struct CvIssue {
    id: u64,
    issue_number: Option<String>,
    name: Option<String>,
    cover_date: Option<String>,
}

impl CvVolume {
    fn into_profile(self) -> Option<SeriesProfile> {
        let name = self.name?.trim().to_string();
        if name.is_empty() {
            return None;
        }

        let mut profile = SeriesProfile::new(MetadataSource::ComicVine, self.id.to_string(), name);
        profile.publisher = self.publisher.and_then(|p| p.name);
        profile.start_year = self.start_year.and_then(|y| y.trim().parse().ok());
        profile.issue_count = self.count_of_issues;
        profile.aliases = self
            .aliases
            .map(|a| {
                a.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        profile.creators = self.people.into_iter().filter_map(|p| p.name).collect();
        Some(profile)
    }
}

impl CvIssue {
    fn into_candidate(self) -> Option<IssueCandidate> {
        let mut candidate = IssueCandidate::new(self.id.to_string(), self.issue_number?);
        candidate.title = self.name.filter(|n| !n.trim().is_empty());
        candidate.cover_date = self
            .cover_date
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok());
        Some(candidate)
    }
}

pub struct ComicVineProvider {
    fetcher: Arc<dyn HttpFetcher>,
    limiter: Arc<RateLimiter>,
    base_url: String,
    api_key: Option<String>,
}

impl ComicVineProvider {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, limiter: Arc<RateLimiter>, api_key: Option<String>) -> Self {
        Self {
            fetcher,
            limiter,
            base_url: COMICVINE_BASE_URL.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured(MetadataSource::ComicVine))?;

        let mut query = vec![("api_key", api_key.to_string()), ("format", "json".to_string())];
        query.extend(params.iter().cloned());

        Url::parse_with_params(&format!("{}/{}/", self.base_url, path), &query)
            .map(String::from)
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, ProviderError> {
        let body = fetch_limited(self.fetcher.as_ref(), &self.limiter, url).await?;
        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;

        if envelope.status_code != STATUS_OK {
            return Err(ProviderError::Api {
                provider: MetadataSource::ComicVine,
                message: envelope.error,
            });
        }
        Ok(envelope.results)
    }
}

#[async_trait]
impl SeriesSourceProvider for ComicVineProvider {
    fn source(&self) -> MetadataSource {
        MetadataSource::ComicVine
    }

    async fn search_series(&self, name: &str) -> Result<Vec<SeriesProfile>, ProviderError> {
        let url = self.url(
            "search",
            &[
                ("resources", "volume".to_string()),
                ("query", name.to_string()),
                ("limit", SEARCH_LIMIT.to_string()),
                (
                    "field_list",
                    "id,name,publisher,start_year,count_of_issues,aliases,people".to_string(),
                ),
            ],
        )?;

        debug!(source = "comicvine", query = %name, "Searching volumes");
        let volumes: Vec<CvVolume> = self.get(&url).await?;
        Ok(volumes.into_iter().filter_map(CvVolume::into_profile).collect())
    }

    async fn list_issues(&self, series_id: &str) -> Result<Vec<IssueCandidate>, ProviderError> {
        let url = self.url(
            "issues",
            &[
                ("filter", format!("volume:{}", series_id)),
                ("field_list", "id,issue_number,name,cover_date".to_string()),
            ],
        )?;

        debug!(source = "comicvine", series_id = %series_id, "Listing issues");
        let issues: Vec<CvIssue> = self.get(&url).await?;
        Ok(issues.into_iter().filter_map(CvIssue::into_candidate).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetchError;
    use std::sync::Mutex;

    struct Canned {
        body: String,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpFetcher for Canned {
        async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(self.body.clone())
        }
    }

    fn make_provider(body: &str, api_key: Option<&str>) -> (ComicVineProvider, Arc<Canned>) {
        let fetcher = Arc::new(Canned {
            body: body.to_string(),
            urls: Mutex::new(Vec::new()),
        });
        let provider = ComicVineProvider::new(
            fetcher.clone(),
            Arc::new(RateLimiter::new("comicvine", 60_000)),
            api_key.map(String::from),
        )
        .with_base_url("https://cv.test/api");
        (provider, fetcher)
    }

    #[tokio::test]
    async fn test_search_maps_volumes() {
        let body = r#"{"status_code":1,"error":"OK","results":[
            {"id":42721,"name":"Batman","publisher":{"name":"DC Comics"},"start_year":"2011",
             "count_of_issues":52,"aliases":"Batman (New 52)\nBatman Vol 2","people":[{"name":"Scott Snyder"}]},
            {"id":1,"name":null}
        ]}"#;
        let (provider, fetcher) = make_provider(body, Some("key"));

        let profiles = provider.search_series("Batman").await.unwrap();
        assert_eq!(profiles.len(), 1);
        let batman = &profiles[0];
        assert_eq!(batman.source_id, "42721");
        assert_eq!(batman.publisher.as_deref(), Some("DC Comics"));
        assert_eq!(batman.start_year, Some(2011));
        assert_eq!(batman.issue_count, Some(52));
        assert_eq!(batman.aliases.len(), 2);
        assert_eq!(batman.creators, vec!["Scott Snyder".to_string()]);

        let urls = fetcher.urls.lock().unwrap();
        assert!(urls[0].starts_with("https://cv.test/api/search/?api_key=key"));
        assert!(urls[0].contains("resources=volume"));
    }

    #[tokio::test]
    async fn test_list_issues_parses_cover_dates() {
        let body = r#"{"status_code":1,"results":[
            {"id":1,"issue_number":"1","name":"Knight Terrors","cover_date":"2011-11-01"},
            {"id":2,"issue_number":null}
        ]}"#;
        let (provider, _) = make_provider(body, Some("key"));

        let issues = provider.list_issues("42721").await.unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].cover_date, NaiveDate::from_ymd_opt(2011, 11, 1));
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let (provider, _) = make_provider(r#"{"status_code":100,"error":"Invalid API Key","results":[]}"#, Some("bad"));
        let err = provider.search_series("Batman").await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { .. }));
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_not_configured() {
        let (provider, fetcher) = make_provider("{}", None);
        let err = provider.search_series("Batman").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(MetadataSource::ComicVine)));
        assert!(fetcher.urls.lock().unwrap().is_empty());
    }
}
