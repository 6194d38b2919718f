//! Engine configuration
//!
//! Read from the same config.toml as [`longbox_common::config::TomlConfig`];
//! each side ignores the other's keys. Every field has a default, so an
//! absent file or section is fine.
//!
//! The `build_*` methods assemble the matching collaborators (HTTP fetcher,
//! cache, per-source rate limiters, sitemap index, cross-source matcher).
//!
//! Environment overrides (applied after the file):
//! - `LONGBOX_USER_AGENT`: HTTP and sitemap user agent
//! - `LONGBOX_LINKER_CONCURRENCY`: linker worker cap
//! - `LONGBOX_COMICVINE_API_KEY`: ComicVine API key

use longbox_common::config;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cache::{Cache, MemoryCache};
use crate::http::{FetchError, HttpFetcher, ReqwestFetcher};
use crate::models::MetadataSource;
use crate::services::cross_source_matcher::{
    CrossSourceMatcher, MatcherConfig, AUTO_MATCH_THRESHOLD, MIN_MATCH_CONFIDENCE, SEARCH_CACHE_TTL,
};
use crate::services::file_linker::{DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY};
use crate::services::file_scanner::DEFAULT_EXTENSIONS;
use crate::services::issue_number::ISSUE_MATCH_THRESHOLD;
use crate::services::mapping_registry::{MappingRegistry, DEFAULT_UNVERIFIED_TTL_DAYS};
use crate::services::rate_limiter::RateLimiterRegistry;
use crate::services::sitemap_index::{SitemapIndexConfig, SitemapSeriesIndex, MIN_SCORE};
use crate::sources::comicvine::{ComicVineProvider, COMICVINE_BASE_URL};

pub const USER_AGENT_ENV_VAR: &str = "LONGBOX_USER_AGENT";
pub const LINKER_CONCURRENCY_ENV_VAR: &str = "LONGBOX_LINKER_CONCURRENCY";
pub const COMICVINE_API_KEY_ENV_VAR: &str = "LONGBOX_COMICVINE_API_KEY";

const DEFAULT_USER_AGENT: &str = concat!("Longbox/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scanner: ScannerConfig,
    pub linker: LinkerConfig,
    pub sitemap: SitemapConfig,
    pub matching: MatchingConfig,
    /// Requests per minute by source name (`comicvine`, `comicbookroundup`, ...)
    pub rate_limits: HashMap<String, u32>,
    pub cache: CacheConfig,
    pub http: HttpConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub extensions: Vec<String>,
    /// Head/tail window for partial hashing of large files
    pub hash_sample_bytes: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            hash_sample_bytes: crate::providers::file_info::DEFAULT_HASH_SAMPLE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    pub batch_size: usize,
    pub concurrency: usize,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SitemapConfig {
    pub urls: Vec<String>,
    /// Overrides `http.user_agent` for sitemap crawls
    pub user_agent: Option<String>,
    pub requests_per_minute: u32,
    pub ttl_secs: u64,
    pub failure_ttl_secs: u64,
    pub min_score: f64,
}

impl Default for SitemapConfig {
    fn default() -> Self {
        let defaults = SitemapIndexConfig::default();
        Self {
            urls: defaults.sitemap_urls,
            user_agent: None,
            requests_per_minute: 30,
            ttl_secs: defaults.ttl.as_secs(),
            failure_ttl_secs: defaults.failure_ttl.as_secs(),
            min_score: MIN_SCORE,
        }
    }
}

impl SitemapConfig {
    pub fn index_config(&self) -> SitemapIndexConfig {
        SitemapIndexConfig {
            sitemap_urls: self.urls.clone(),
            ttl: Duration::from_secs(self.ttl_secs),
            failure_ttl: Duration::from_secs(self.failure_ttl_secs),
            min_score: self.min_score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub auto_match_threshold: f64,
    pub min_confidence: f64,
    pub issue_threshold: f64,
    pub propagate_transport_errors: bool,
    pub search_cache_ttl_secs: u64,
    /// Age after which an auto-matched mapping is ignored and pruned
    pub unverified_mapping_ttl_days: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            auto_match_threshold: AUTO_MATCH_THRESHOLD,
            min_confidence: MIN_MATCH_CONFIDENCE,
            issue_threshold: ISSUE_MATCH_THRESHOLD,
            propagate_transport_errors: false,
            search_cache_ttl_secs: SEARCH_CACHE_TTL.as_secs(),
            unverified_mapping_ttl_days: DEFAULT_UNVERIFIED_TTL_DAYS,
        }
    }
}

impl MatchingConfig {
    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            auto_match_threshold: self.auto_match_threshold,
            min_confidence: self.min_confidence,
            issue_threshold: self.issue_threshold,
            propagate_transport_errors: self.propagate_transport_errors,
            search_cache_ttl: Duration::from_secs(self.search_cache_ttl_secs),
            ..MatcherConfig::default()
        }
    }

    pub fn mapping_registry(&self) -> MappingRegistry {
        let ttl = chrono::Duration::try_days(self.unverified_mapping_ttl_days).unwrap_or(chrono::Duration::MAX);
        MappingRegistry::with_ttl(ttl)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Used for sources without an entry in `rate_limits`
    pub default_requests_per_minute: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            default_requests_per_minute: 60,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    /// ComicVine is only queried when a key is set
    pub comicvine_api_key: Option<String>,
    pub comicvine_base_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            comicvine_api_key: None,
            comicvine_base_url: COMICVINE_BASE_URL.to_string(),
        }
    }
}

/// Matching collaborators sharing one cache and one limiter per source
pub struct MatchingServices {
    pub matcher: CrossSourceMatcher,
    pub sitemap: SitemapSeriesIndex,
    pub cache: Arc<MemoryCache>,
    pub limiters: Arc<RateLimiterRegistry>,
}

impl EngineConfig {
    /// Load from the resolved config file, then apply environment overrides
    pub fn load(cli_arg: Option<&Path>) -> longbox_common::Result<Self> {
        let mut config: EngineConfig = config::load_or_default(cli_arg)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(agent) = env_value(USER_AGENT_ENV_VAR) {
            info!("User agent loaded from environment variable");
            self.http.user_agent = agent;
        }

        if let Some(raw) = env_value(LINKER_CONCURRENCY_ENV_VAR) {
            match raw.parse::<usize>() {
                Ok(n) if n > 0 => self.linker.concurrency = n,
                _ => warn!(value = %raw, "Ignoring invalid {}", LINKER_CONCURRENCY_ENV_VAR),
            }
        }

        if let Some(key) = env_value(COMICVINE_API_KEY_ENV_VAR) {
            info!("ComicVine API key loaded from environment variable");
            self.sources.comicvine_api_key = Some(key);
        }
    }

    pub fn validate(&self) -> longbox_common::Result<()> {
        let unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(longbox_common::Error::Config(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )))
            }
        };
        unit("matching.auto_match_threshold", self.matching.auto_match_threshold)?;
        unit("matching.min_confidence", self.matching.min_confidence)?;
        unit("matching.issue_threshold", self.matching.issue_threshold)?;
        unit("sitemap.min_score", self.sitemap.min_score)?;

        if self.linker.batch_size == 0 || self.linker.concurrency == 0 {
            return Err(longbox_common::Error::Config(
                "linker.batch_size and linker.concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Rate limits per source, with the sitemap budget under `comicbookroundup`
    pub fn rate_limit_overrides(&self) -> HashMap<String, u32> {
        let mut limits = self.rate_limits.clone();
        limits
            .entry(MetadataSource::ComicBookRoundup.as_str().to_string())
            .or_insert(self.sitemap.requests_per_minute);
        limits
    }

    pub fn build_rate_limiters(&self) -> RateLimiterRegistry {
        RateLimiterRegistry::new(self.http.default_requests_per_minute, self.rate_limit_overrides())
    }

    pub fn build_cache(&self) -> MemoryCache {
        MemoryCache::new(self.cache.capacity)
    }

    pub fn build_fetcher(&self) -> Result<ReqwestFetcher, FetchError> {
        ReqwestFetcher::new(&self.http.user_agent, self.http.timeout())
    }

    /// Sitemap index over `fetcher`, throttled as `comicbookroundup`
    pub fn build_sitemap_index(
        &self,
        fetcher: Arc<dyn HttpFetcher>,
        limiters: &RateLimiterRegistry,
        cache: Arc<dyn Cache>,
    ) -> SitemapSeriesIndex {
        SitemapSeriesIndex::new(
            fetcher,
            limiters.limiter(MetadataSource::ComicBookRoundup.as_str()),
            cache,
            self.sitemap.index_config(),
        )
    }

    /// Cross-source matcher with every source that is configured
    pub fn build_matcher(
        &self,
        fetcher: Arc<dyn HttpFetcher>,
        limiters: &RateLimiterRegistry,
        cache: Arc<dyn Cache>,
    ) -> CrossSourceMatcher {
        let mut matcher = CrossSourceMatcher::new(Arc::new(self.matching.mapping_registry()), self.matching.matcher_config())
            .with_cache(cache);

        match &self.sources.comicvine_api_key {
            Some(key) => {
                let comicvine = ComicVineProvider::new(
                    fetcher,
                    limiters.limiter(MetadataSource::ComicVine.as_str()),
                    Some(key.clone()),
                )
                .with_base_url(self.sources.comicvine_base_url.clone());
                matcher = matcher.with_provider(Arc::new(comicvine));
            }
            None => info!("No ComicVine API key configured, ComicVine matching disabled"),
        }
        matcher
    }

    /// Every matching collaborator over real HTTP
    ///
    /// The sitemap crawl gets its own client when `sitemap.user_agent` differs.
    pub fn build_matching(&self) -> Result<MatchingServices, FetchError> {
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(self.build_fetcher()?);
        let sitemap_fetcher: Arc<dyn HttpFetcher> = match &self.sitemap.user_agent {
            Some(agent) => Arc::new(ReqwestFetcher::new(agent, self.http.timeout())?),
            None => Arc::clone(&fetcher),
        };
        let limiters = Arc::new(self.build_rate_limiters());
        let cache = Arc::new(self.build_cache());

        Ok(MatchingServices {
            matcher: self.build_matcher(fetcher, &limiters, cache.clone()),
            sitemap: self.build_sitemap_index(sitemap_fetcher, &limiters, cache.clone()),
            cache,
            limiters,
        })
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.linker.batch_size, 100);
        assert_eq!(config.linker.concurrency, 8);
        assert_eq!(config.sitemap.ttl_secs, 7 * 24 * 60 * 60);
        assert_eq!(config.sitemap.failure_ttl_secs, 60 * 60);
        assert!((config.matching.auto_match_threshold - 0.95).abs() < f64::EPSILON);
        assert!(config.scanner.extensions.contains(&"cbz".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [linker]
            concurrency = 2

            [rate_limits]
            comicvine = 200

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.linker.concurrency, 2);
        assert_eq!(config.linker.batch_size, 100);
        assert_eq!(config.rate_limits.get("comicvine"), Some(&200));
        assert_eq!(config.rate_limit_overrides().get("comicbookroundup"), Some(&30));
    }

    #[test]
    fn test_matcher_built_from_config() {
        let config: EngineConfig = toml::from_str(
            r#"
            [matching]
            search_cache_ttl_secs = 60

            [sources]
            comicvine_api_key = "key"
            "#,
        )
        .unwrap();
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(config.build_fetcher().unwrap());
        let limiters = config.build_rate_limiters();
        let matcher = config.build_matcher(fetcher, &limiters, Arc::new(config.build_cache()));

        assert_eq!(matcher.config().search_cache_ttl, Duration::from_secs(60));
        assert_eq!(matcher.sources(), vec![MetadataSource::ComicVine]);
        assert_eq!(
            limiters.limiter("comicbookroundup").min_interval(),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_matcher_without_key_has_no_sources() {
        let config = EngineConfig::default();
        let fetcher: Arc<dyn HttpFetcher> = Arc::new(config.build_fetcher().unwrap());
        let matcher = config.build_matcher(fetcher, &config.build_rate_limiters(), Arc::new(config.build_cache()));
        assert!(matcher.sources().is_empty());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = EngineConfig::default();
        config.matching.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var(LINKER_CONCURRENCY_ENV_VAR, "3");
        std::env::set_var(COMICVINE_API_KEY_ENV_VAR, "  secret ");
        std::env::set_var(USER_AGENT_ENV_VAR, "Tester/1.0");

        let mut config = EngineConfig::default();
        config.apply_env_overrides();

        std::env::remove_var(LINKER_CONCURRENCY_ENV_VAR);
        std::env::remove_var(COMICVINE_API_KEY_ENV_VAR);
        std::env::remove_var(USER_AGENT_ENV_VAR);

        assert_eq!(config.linker.concurrency, 3);
        assert_eq!(config.sources.comicvine_api_key.as_deref(), Some("secret"));
        assert_eq!(config.http.user_agent, "Tester/1.0");
    }

    #[test]
    #[serial]
    fn test_invalid_concurrency_env_is_ignored() {
        std::env::set_var(LINKER_CONCURRENCY_ENV_VAR, "zero");
        let mut config = EngineConfig::default();
        config.apply_env_overrides();
        std::env::remove_var(LINKER_CONCURRENCY_ENV_VAR);
        assert_eq!(config.linker.concurrency, 8);
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scanner]\nextensions = [\"cbz\"]\n[http]\ntimeout_secs = 5").unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.scanner.extensions, vec!["cbz".to_string()]);
        assert_eq!(config.http.timeout(), Duration::from_secs(5));
    }
}
