//! Issue number normalisation and issue-level matching
//!
//! The raw issue text is kept alongside the numeric sort key: "001" sorts as
//! 1 but still displays as "001".

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{IssueCandidate, IssueMatch};
use crate::services::title_normalizer;

/// Default minimum confidence for `find_matching_issue`
pub const ISSUE_MATCH_THRESHOLD: f64 = 0.7;

/// Confidence awarded for equal normalised numbers
const NUMBER_MATCH_BASE: f64 = 0.7;
const SAME_MONTH_BOOST: f64 = 0.2;
const NEAR_DATE_BOOST: f64 = 0.1;
const SAME_YEAR_BOOST: f64 = 0.05;
const TITLE_BOOST_WEIGHT: f64 = 0.1;
/// Cover dates within this many days count as "near"
const NEAR_DATE_DAYS: i64 = 62;

static NUMERIC_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+(\.\d+)?").expect("valid regex"));
static ISSUE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(#|no\.\s*|no\s+|issue\s+)").expect("valid regex"));

/// Issue number with its original text and comparable sort key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueNumber {
    pub raw: String,
    /// `None` for non-numeric specials ("Special", "Annual")
    pub sort_key: Option<f64>,
}

impl IssueNumber {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            sort_key: normalize_issue_number(raw),
        }
    }

    /// Equal sort keys, or identical text when neither side is numeric
    pub fn same_issue(&self, other: &IssueNumber) -> bool {
        match (self.sort_key, other.sort_key) {
            (Some(a), Some(b)) => (a - b).abs() < 1e-9,
            (None, None) => {
                let a = self.raw.trim().to_lowercase();
                !a.is_empty() && a == other.raw.trim().to_lowercase()
            }
            _ => false,
        }
    }
}

/// Convert raw issue text into a numeric sort key
///
/// Rules, in order:
/// 1. half-issue tokens ("½", "1/2") -> 0.5, also as a suffix ("5½" -> 5.5)
/// 2. leading numeric prefix ("1a" -> 1, "25 variant" -> 25, "001" -> 1)
/// 3. anything else -> `None`
pub fn normalize_issue_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let text = ISSUE_PREFIX.replace(trimmed, "");
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(half) = half_issue(text) {
        return Some(half);
    }

    NUMERIC_PREFIX
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

fn half_issue(text: &str) -> Option<f64> {
    for token in ["½", "1/2"] {
        if let Some(prefix) = text.strip_suffix(token) {
            let prefix = prefix.trim();
            if prefix.is_empty() {
                return Some(0.5);
            }
            // "5½" or "5 1/2"
            if let Ok(whole) = prefix.parse::<f64>() {
                return Some(whole + 0.5);
            }
        }
    }
    None
}

/// Best candidate with the same issue number, at or above `threshold`
///
/// Number equality is required; cover-date proximity and title similarity
/// only add confidence on top of it.
pub fn find_matching_issue(
    primary: &IssueCandidate,
    candidates: &[IssueCandidate],
    threshold: f64,
) -> Option<IssueMatch> {
    let primary_number = IssueNumber::parse(&primary.number);
    let mut best: Option<IssueMatch> = None;

    for candidate in candidates {
        if !primary_number.same_issue(&IssueNumber::parse(&candidate.number)) {
            continue;
        }

        let confidence = issue_confidence(primary, candidate);
        tracing::debug!(
            primary = %primary.number,
            candidate = %candidate.source_id,
            confidence,
            "Issue candidate scored"
        );

        if confidence < threshold {
            continue;
        }
        if best.as_ref().map_or(true, |b| confidence > b.confidence) {
            best = Some(IssueMatch {
                candidate: candidate.clone(),
                confidence,
            });
        }
    }

    best
}

/// Confidence for two issues already known to share a number
pub fn issue_confidence(primary: &IssueCandidate, candidate: &IssueCandidate) -> f64 {
    let mut confidence = NUMBER_MATCH_BASE;

    if let (Some(a), Some(b)) = (primary.cover_date, candidate.cover_date) {
        confidence += date_boost(a, b);
    }

    if let (Some(a), Some(b)) = (&primary.title, &candidate.title) {
        confidence += TITLE_BOOST_WEIGHT * title_normalizer::similarity(a, b);
    }

    confidence.min(1.0)
}

fn date_boost(a: NaiveDate, b: NaiveDate) -> f64 {
    if a.year() == b.year() && a.month() == b.month() {
        SAME_MONTH_BOOST
    } else if (a - b).num_days().abs() <= NEAR_DATE_DAYS {
        NEAR_DATE_BOOST
    } else if a.year() == b.year() {
        SAME_YEAR_BOOST
    } else {
        0.0
    }
}
