//! Series title normalisation and similarity
//!
//! Similarity tiers:
//! - exact normalised match: 1.0
//! - substring containment (either direction): 0.85
//! - otherwise shared-word ratio `|shared| / max(|words_a|, |words_b|)`

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Score for one normalised title containing the other
pub const SUBSTRING_SIMILARITY: f64 = 0.85;

static LEADING_THE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^the\s+").expect("valid regex"));
static TRAILING_PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\s*\([^()]*\))+\s*$").expect("valid regex"));
static VOLUME_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(vol\.?|volume|v\.)\s*\d+\b").expect("valid regex"));
static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("valid regex"));

/// Normalise a series name for comparison
///
/// "The Batman (2011)" -> "batman", "Saga Vol. 2" -> "saga".
pub fn normalize(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let without_the = LEADING_THE.replace(&lowered, "");
    let without_parens = TRAILING_PARENTHETICAL.replace(&without_the, "");
    let without_volume = VOLUME_MARKER.replace_all(&without_parens, " ");
    NON_ALPHANUMERIC
        .replace_all(&without_volume, " ")
        .trim()
        .to_string()
}

/// Similarity of two series names in `[0, 1]`
pub fn similarity(a: &str, b: &str) -> f64 {
    similarity_normalized(&normalize(a), &normalize(b))
}

/// Similarity of two already-normalised names
pub fn similarity_normalized(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    if a.contains(b) || b.contains(a) {
        return SUBSTRING_SIMILARITY;
    }
    token_overlap(a, b)
}

/// `|shared words| / max(|words_a|, |words_b|)`
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let max = words_a.len().max(words_b.len());
    if max == 0 {
        return 0.0;
    }
    words_a.intersection(&words_b).count() as f64 / max as f64
}
