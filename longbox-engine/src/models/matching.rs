//! Cross-source matching types
//!
//! Everything here is ephemeral and recomputed on demand; a user-confirmed
//! match is persisted separately by the mapping registry.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// External metadata source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataSource {
    /// Series records of this library
    Local,
    ComicVine,
    Metron,
    Gcd,
    ComicBookRoundup,
    AniList,
    Mal,
}

impl MetadataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataSource::Local => "local",
            MetadataSource::ComicVine => "comicvine",
            MetadataSource::Metron => "metron",
            MetadataSource::Gcd => "gcd",
            MetadataSource::ComicBookRoundup => "comicbookroundup",
            MetadataSource::AniList => "anilist",
            MetadataSource::Mal => "mal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Some(MetadataSource::Local),
            "comicvine" => Some(MetadataSource::ComicVine),
            "metron" => Some(MetadataSource::Metron),
            "gcd" => Some(MetadataSource::Gcd),
            "comicbookroundup" | "cbr" => Some(MetadataSource::ComicBookRoundup),
            "anilist" => Some(MetadataSource::AniList),
            "mal" | "myanimelist" => Some(MetadataSource::Mal),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Series as described by one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesProfile {
    pub source: MetadataSource,
    pub source_id: String,
    pub name: String,
    pub publisher: Option<String>,
    pub start_year: Option<i32>,
    pub issue_count: Option<u32>,
    pub creators: Vec<String>,
    pub aliases: Vec<String>,
}

impl SeriesProfile {
    pub fn new(source: MetadataSource, source_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            name: name.into(),
            publisher: None,
            start_year: None,
            issue_count: None,
            creators: Vec::new(),
            aliases: Vec::new(),
        }
    }
}

/// Start-year agreement bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YearMatch {
    Exact,
    /// Within one year
    Close,
    None,
}

/// Per-factor evidence behind a cross-source confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFactors {
    pub title_similarity: f64,
    pub publisher_match: bool,
    pub year_match: YearMatch,
    pub issue_count_match: bool,
    /// Creator names present on both sides (as spelled by the primary)
    pub creator_overlap: Vec<String>,
    pub alias_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSourceMatch {
    pub source: MetadataSource,
    pub source_id: String,
    pub name: String,
    /// 0.0..=1.0
    pub confidence: f64,
    pub match_factors: MatchFactors,
    pub is_auto_match_candidate: bool,
}

/// One series page discovered in a third-party sitemap
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SitemapSeriesEntry {
    /// Series page URL
    pub source_id: String,
    /// Publisher display name derived from the URL
    pub publisher: String,
    pub series_slug: String,
    pub series_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapMatch {
    pub entry: SitemapSeriesEntry,
    pub confidence: f64,
}

/// Issue as described by a source, for issue-level matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueCandidate {
    pub source_id: String,
    /// Raw issue number text ("001", "½", "Annual")
    pub number: String,
    pub title: Option<String>,
    pub cover_date: Option<NaiveDate>,
}

impl IssueCandidate {
    pub fn new(source_id: impl Into<String>, number: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            number: number.into(),
            title: None,
            cover_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueMatch {
    pub candidate: IssueCandidate,
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_parse_round_trip() {
        for source in [
            MetadataSource::Local,
            MetadataSource::ComicVine,
            MetadataSource::Metron,
            MetadataSource::Gcd,
            MetadataSource::ComicBookRoundup,
            MetadataSource::AniList,
            MetadataSource::Mal,
        ] {
            assert_eq!(MetadataSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(MetadataSource::parse("MyAnimeList"), Some(MetadataSource::Mal));
        assert_eq!(MetadataSource::parse("unknown"), None);
    }
}
