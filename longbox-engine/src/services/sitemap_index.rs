//! Sitemap-backed series index
//!
//! Crawls a review site's sitemap once, keeps one entry per
//! `(publisher, series slug)` and answers fuzzy series lookups locally.
//!
//! URL shape: `https://<host>/comic-books/reviews/<publisher>/<series-slug>`.
//! Deeper paths (`.../<series-slug>/<issue>`) are issue pages and are skipped.
//! A sitemap may be an index of further sitemaps; those are followed.
//!
//! The built index is cached wholesale. A failed build caches an empty marker
//! with a short TTL so repeated lookups do not hammer the site.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{self, Cache};
use crate::http::{fetch_limited, FetchError, HttpFetcher};
use crate::models::{SitemapMatch, SitemapSeriesEntry};
use crate::services::publisher_normalizer::{is_imprint_of, publishers_match};
use crate::services::rate_limiter::RateLimiter;
use crate::services::title_normalizer::similarity;

/// Share of the score carried by the name
pub const NAME_WEIGHT: f64 = 0.95;
/// Share of the score carried by the publisher
pub const PUBLISHER_WEIGHT: f64 = 0.05;
/// Publisher bonus when the entry is an imprint of the queried publisher
pub const IMPRINT_BONUS: f64 = 0.8;
/// Lowest score returned by a search
pub const MIN_SCORE: f64 = 0.6;

const CACHE_KEY: &str = "sitemap:series-index";
/// Guard against sitemap index cycles and runaway crawls
const MAX_SITEMAP_DOCUMENTS: usize = 500;

static LOC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<loc>\s*(.*?)\s*</loc>").expect("valid regex"));
static SERIES_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[^/]+/comic-books/reviews/([a-z0-9-]+)/([a-z0-9-]+)/?$")
        .expect("valid regex")
});
static YEAR_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-((?:19|20)\d{2})$").expect("valid regex"));

/// Index lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitemapQuery {
    pub series_name: String,
    pub publisher: Option<String>,
}

impl SitemapQuery {
    pub fn new(series_name: impl Into<String>) -> Self {
        Self {
            series_name: series_name.into(),
            publisher: None,
        }
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedIndex {
    /// False for the short-lived marker written after a failed build
    complete: bool,
    entries: Vec<SitemapSeriesEntry>,
}

#[derive(Debug, Clone)]
pub struct SitemapIndexConfig {
    pub sitemap_urls: Vec<String>,
    pub ttl: Duration,
    pub failure_ttl: Duration,
    pub min_score: f64,
}

impl Default for SitemapIndexConfig {
    fn default() -> Self {
        Self {
            sitemap_urls: vec!["https://comicbookroundup.com/sitemap.xml".to_string()],
            ttl: Duration::from_secs(7 * 24 * 60 * 60),
            failure_ttl: Duration::from_secs(60 * 60),
            min_score: MIN_SCORE,
        }
    }
}

/// Index held in memory, stale once `loaded_at` is a TTL old
struct LoadedIndex {
    entries: Arc<Vec<SitemapSeriesEntry>>,
    loaded_at: Instant,
}

impl LoadedIndex {
    fn new(entries: Arc<Vec<SitemapSeriesEntry>>) -> Self {
        Self {
            entries,
            loaded_at: Instant::now(),
        }
    }
}

/// Cached, rebuild-on-refresh series index
pub struct SitemapSeriesIndex {
    fetcher: Arc<dyn HttpFetcher>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn Cache>,
    config: SitemapIndexConfig,
    /// Last index loaded in this process; replaced whole, never edited
    current: RwLock<Option<LoadedIndex>>,
}

impl SitemapSeriesIndex {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn Cache>,
        config: SitemapIndexConfig,
    ) -> Self {
        Self {
            fetcher,
            limiter,
            cache,
            config,
            current: RwLock::new(None),
        }
    }

    /// Current index, from memory, cache or a fresh crawl
    ///
    /// The in-memory copy is dropped once it is older than the TTL.
    /// Returns an empty index if the crawl fails.
    pub async fn index(&self) -> Arc<Vec<SitemapSeriesEntry>> {
        if let Some(loaded) = self.current.read().await.as_ref() {
            if loaded.loaded_at.elapsed() < self.config.ttl {
                return Arc::clone(&loaded.entries);
            }
        }

        if let Some(cached) = cache::get_json::<CachedIndex>(self.cache.as_ref(), CACHE_KEY).await {
            debug!(entries = cached.entries.len(), complete = cached.complete, "Sitemap index cache hit");
            let index = Arc::new(cached.entries);
            if cached.complete {
                *self.current.write().await = Some(LoadedIndex::new(Arc::clone(&index)));
            }
            return index;
        }

        self.rebuild().await
    }

    /// Drop every cached copy and crawl again
    pub async fn refresh(&self) -> Arc<Vec<SitemapSeriesEntry>> {
        cache::invalidate(self.cache.as_ref(), CACHE_KEY).await;
        *self.current.write().await = None;
        self.rebuild().await
    }

    /// Search the current index
    pub async fn search(&self, query: &SitemapQuery) -> Option<SitemapMatch> {
        let index = self.index().await;
        search_series_index_with_min(query, &index, self.config.min_score)
    }

    async fn rebuild(&self) -> Arc<Vec<SitemapSeriesEntry>> {
        match self.build_index().await {
            Ok(entries) => {
                info!(entries = entries.len(), "Sitemap series index built");
                let cached = CachedIndex {
                    complete: true,
                    entries,
                };
                cache::set_json(self.cache.as_ref(), CACHE_KEY, &cached, self.config.ttl).await;
                let index = Arc::new(cached.entries);
                *self.current.write().await = Some(LoadedIndex::new(Arc::clone(&index)));
                index
            }
            Err(e) => {
                warn!(error = %e, "Sitemap index build failed");
                let marker = CachedIndex {
                    complete: false,
                    entries: Vec::new(),
                };
                cache::set_json(self.cache.as_ref(), CACHE_KEY, &marker, self.config.failure_ttl).await;
                Arc::new(Vec::new())
            }
        }
    }

    /// Crawl every configured sitemap and extract series entries
    ///
    /// Fails only if no document could be fetched at all; a failing child
    /// sitemap is logged and skipped.
    pub async fn build_index(&self) -> Result<Vec<SitemapSeriesEntry>, FetchError> {
        let mut queue: VecDeque<String> = self.config.sitemap_urls.iter().cloned().collect();
        let mut visited = HashSet::new();
        let mut seen_series = HashSet::new();
        let mut entries = Vec::new();
        let mut fetched = 0usize;
        let mut last_error = None;

        while let Some(url) = queue.pop_front() {
            if visited.len() >= MAX_SITEMAP_DOCUMENTS {
                warn!(limit = MAX_SITEMAP_DOCUMENTS, "Sitemap document limit reached");
                break;
            }
            if !visited.insert(url.clone()) {
                continue;
            }

            let body = match fetch_limited(self.fetcher.as_ref(), &self.limiter, &url).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(url = %url, error = %e, "Sitemap fetch failed");
                    last_error = Some(e);
                    continue;
                }
            };
            fetched += 1;

            let nested = is_sitemap_index(&body);
            for loc in extract_locations(&body) {
                if nested {
                    queue.push_back(loc);
                } else if let Some(entry) = parse_series_url(&loc) {
                    if seen_series.insert((entry.publisher.clone(), entry.series_slug.clone())) {
                        entries.push(entry);
                    }
                }
            }
        }

        match (fetched, last_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(entries),
        }
    }
}

fn is_sitemap_index(body: &str) -> bool {
    body.contains("<sitemapindex")
}

/// Every `<loc>` value in a sitemap document
pub fn extract_locations(body: &str) -> Vec<String> {
    LOC.captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().replace("&amp;", "&"))
        .filter(|loc| !loc.is_empty())
        .collect()
}

/// Entry for a series review page, `None` for any other URL
pub fn parse_series_url(url: &str) -> Option<SitemapSeriesEntry> {
    let caps = SERIES_URL.captures(url)?;
    let publisher_slug = caps.get(1)?.as_str();
    let series_slug = caps.get(2)?.as_str();

    Some(SitemapSeriesEntry {
        source_id: url.trim_end_matches('/').to_string(),
        publisher: slug_to_name(publisher_slug),
        series_slug: series_slug.to_string(),
        series_name: slug_to_name(series_slug),
    })
}

/// `"batman-2016"` -> `"Batman (2016)"`, `"saga"` -> `"Saga"`
pub fn slug_to_name(slug: &str) -> String {
    let (stem, year) = match YEAR_SUFFIX.captures(slug) {
        Some(caps) => match (caps.get(0), caps.get(1)) {
            (Some(whole), Some(year)) if whole.start() > 0 => (&slug[..whole.start()], Some(year.as_str())),
            _ => (slug, None),
        },
        None => (slug, None),
    };

    let title = stem
        .split('-')
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    match year {
        Some(year) => format!("{} ({})", title, year),
        None => title,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Score one entry against a query
pub fn score_entry(query: &SitemapQuery, entry: &SitemapSeriesEntry) -> f64 {
    let name_score = similarity(&query.series_name, &entry.series_name);
    let publisher_bonus = match query.publisher.as_deref() {
        Some(publisher) if publishers_match(Some(publisher), Some(&entry.publisher)) => 1.0,
        Some(publisher) if is_imprint_of(&entry.publisher, publisher) => IMPRINT_BONUS,
        _ => 0.0,
    };
    NAME_WEIGHT * name_score + PUBLISHER_WEIGHT * publisher_bonus
}

/// Best entry scoring at least [`MIN_SCORE`]
pub fn search_series_index(query: &SitemapQuery, index: &[SitemapSeriesEntry]) -> Option<SitemapMatch> {
    search_series_index_with_min(query, index, MIN_SCORE)
}

pub fn search_series_index_with_min(
    query: &SitemapQuery,
    index: &[SitemapSeriesEntry],
    min_score: f64,
) -> Option<SitemapMatch> {
    if query.series_name.trim().is_empty() {
        return None;
    }

    let mut best: Option<SitemapMatch> = None;
    for entry in index {
        let confidence = score_entry(query, entry);
        // Ties keep the earlier entry
        if best.as_ref().map_or(true, |b| confidence > b.confidence) {
            best = Some(SitemapMatch {
                entry: entry.clone(),
                confidence,
            });
        }
    }

    best.filter(|m| m.confidence >= min_score)
}
