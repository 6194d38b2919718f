//! Data models for library reconciliation
//!
//! Records persisted through the `Store` (libraries, files, series), transient
//! scan results, and the ephemeral cross-source matching types.

pub mod library;
pub mod matching;
pub mod scan;
pub mod series;

pub use library::{FileMetadata, FileRecord, FileStatus, FileUpdate, Library};
pub use matching::{
    CrossSourceMatch, IssueCandidate, IssueMatch, MatchFactors, MetadataSource, SeriesProfile,
    SitemapMatch, SitemapSeriesEntry, YearMatch,
};
pub use scan::{ChangedFile, DiscoveryResult, MovedFile, OrphanedFile, ScanDiff, ScanIssue, ScannedFile};
pub use series::{fold_name, NewSeries, Series, SeriesDefinition, SeriesIdentityKey, SeriesUpdate};
