//! Canonical series records and identity keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::services::publisher_normalizer;

/// Canonical series record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub id: Uuid,
    pub name: String,
    pub publisher: Option<String>,
    pub start_year: Option<i32>,
    pub issue_count: Option<u32>,
    pub aliases: Vec<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    /// Files currently linked to the series (maintained by progress recalculation)
    pub file_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Series {
    pub fn identity_key(&self) -> SeriesIdentityKey {
        SeriesIdentityKey::new(&self.name, self.publisher.as_deref())
    }

    /// Identity keys for the name and every alias
    pub fn all_identity_keys(&self) -> Vec<SeriesIdentityKey> {
        std::iter::once(self.name.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .map(|name| SeriesIdentityKey::new(name, self.publisher.as_deref()))
            .collect()
    }

    /// True if `name` equals the series name or one of its aliases, ignoring case
    pub fn answers_to(&self, name: &str) -> bool {
        let folded = fold_name(name);
        fold_name(&self.name) == folded || self.aliases.iter().any(|a| fold_name(a) == folded)
    }
}

/// Input for `Store::create_series`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewSeries {
    pub name: String,
    pub publisher: Option<String>,
    pub start_year: Option<i32>,
    pub issue_count: Option<u32>,
    pub aliases: Vec<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub summary: Option<String>,
}

impl NewSeries {
    pub fn identity_key(&self) -> SeriesIdentityKey {
        SeriesIdentityKey::new(&self.name, self.publisher.as_deref())
    }

    pub fn into_series(self) -> Series {
        let now = Utc::now();
        Series {
            id: Uuid::new_v4(),
            name: self.name,
            publisher: self.publisher,
            start_year: self.start_year,
            issue_count: self.issue_count,
            aliases: self.aliases,
            genres: self.genres,
            tags: self.tags,
            summary: self.summary,
            file_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied through `Store::update_series`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesUpdate {
    pub publisher: Option<String>,
    pub start_year: Option<i32>,
    pub issue_count: Option<u32>,
    pub aliases: Option<Vec<String>>,
    pub summary: Option<String>,
}

impl SeriesUpdate {
    pub fn is_empty(&self) -> bool {
        *self == SeriesUpdate::default()
    }

    pub fn apply_to(&self, series: &mut Series) {
        if let Some(publisher) = &self.publisher {
            series.publisher = Some(publisher.clone());
        }
        if let Some(start_year) = self.start_year {
            series.start_year = Some(start_year);
        }
        if let Some(issue_count) = self.issue_count {
            series.issue_count = Some(issue_count);
        }
        if let Some(aliases) = &self.aliases {
            series.aliases = aliases.clone();
        }
        if let Some(summary) = &self.summary {
            series.summary = Some(summary.clone());
        }
        series.updated_at = Utc::now();
    }
}

/// Folder-level series definition (`series.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SeriesDefinition {
    pub name: String,
    pub publisher: Option<String>,
    pub start_year: Option<i32>,
    pub issue_count: Option<u32>,
    pub aliases: Vec<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub summary: Option<String>,
}

impl SeriesDefinition {
    pub fn identity_key(&self) -> SeriesIdentityKey {
        SeriesIdentityKey::new(&self.name, self.publisher.as_deref())
    }

    /// True if `name` is the definition's name or one of its aliases
    pub fn covers(&self, name: &str) -> bool {
        let folded = fold_name(name);
        fold_name(&self.name) == folded || self.aliases.iter().any(|a| fold_name(a) == folded)
    }

    pub fn to_new_series(&self) -> NewSeries {
        NewSeries {
            name: self.name.trim().to_string(),
            publisher: self.publisher.clone(),
            start_year: self.start_year,
            issue_count: self.issue_count,
            aliases: self.aliases.clone(),
            genres: self.genres.clone(),
            tags: self.tags.clone(),
            summary: self.summary.clone(),
        }
    }
}

/// Normalised `(name, publisher)` pair used to deduplicate series
///
/// Rendered as `name|publisher`. The name is case-folded with whitespace
/// collapsed; the publisher goes through the canonical publisher table so
/// "DC" and "DC Comics" share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesIdentityKey(String);

impl SeriesIdentityKey {
    pub fn new(name: &str, publisher: Option<&str>) -> Self {
        let publisher = publisher
            .map(publisher_normalizer::normalize_publisher)
            .unwrap_or_default();
        Self(format!("{}|{}", fold_name(name), publisher))
    }

    /// Key with the publisher component left empty
    pub fn name_only(name: &str) -> Self {
        Self::new(name, None)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesIdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, collapse whitespace runs, trim
pub fn fold_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_is_case_insensitive() {
        assert_eq!(
            SeriesIdentityKey::new("Batman", Some("DC Comics")),
            SeriesIdentityKey::new("  BATMAN ", Some("dc comics")),
        );
        assert_eq!(SeriesIdentityKey::new("Batman", None).as_str(), "batman|");
    }

    #[test]
    fn test_identity_key_uses_canonical_publisher() {
        assert_eq!(
            SeriesIdentityKey::new("Saga", Some("Image")),
            SeriesIdentityKey::new("Saga", Some("Image Comics")),
        );
    }

    #[test]
    fn test_identity_key_keeps_volume_years_apart() {
        assert_ne!(
            SeriesIdentityKey::new("Batman (2011)", None),
            SeriesIdentityKey::new("Batman (2016)", None),
        );
    }

    #[test]
    fn test_definition_covers_aliases() {
        let def = SeriesDefinition {
            name: "The Sandman".to_string(),
            aliases: vec!["Sandman".to_string()],
            ..Default::default()
        };
        assert!(def.covers("sandman"));
        assert!(def.covers("The  Sandman"));
        assert!(!def.covers("Sandman Mystery Theatre"));
    }

    #[test]
    fn test_definition_deserialises_camel_case() {
        let def: SeriesDefinition =
            serde_json::from_str(r#"{"name":"Saga","startYear":2012,"aliases":["Saga (2012)"]}"#).unwrap();
        assert_eq!(def.start_year, Some(2012));
        assert_eq!(def.aliases.len(), 1);
    }
}
