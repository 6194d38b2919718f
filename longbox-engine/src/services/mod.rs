//! Service modules for library reconciliation and series matching
//!
//! Reconcile services (scanner, resolver, linker) work against the
//! [`Store`](crate::store::Store); matching services (normalisers, sitemap
//! index, cross-source matcher, mapping registry) are pure or cache-backed.

pub mod cross_source_matcher;
pub mod file_linker;
pub mod file_scanner;
pub mod issue_number;
pub mod mapping_registry;
pub mod publisher_normalizer;
pub mod rate_limiter;
pub mod series_naming;
pub mod series_resolver;
pub mod sitemap_index;
pub mod title_normalizer;

pub use cross_source_matcher::{CrossSourceMatcher, MatchError, MatcherConfig};
pub use file_linker::{FileLinker, LinkResult, SeriesLookup};
pub use file_scanner::{FileScanner, ScanError};
pub use issue_number::{find_matching_issue, normalize_issue_number, IssueNumber};
pub use mapping_registry::{EntityRef, MappingRegistry, SourceMapping};
pub use publisher_normalizer::{normalize_publisher, publishers_match};
pub use rate_limiter::{RateLimiter, RateLimiterRegistry};
pub use series_resolver::{ResolveResult, SeriesResolver};
pub use sitemap_index::{SitemapIndexConfig, SitemapQuery, SitemapSeriesIndex};
