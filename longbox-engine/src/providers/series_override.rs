//! Folder-level series definitions
//!
//! A folder may carry a `series.json` naming the series its files belong to.
//! Accepted shapes: one definition object, an array of definitions, or
//! `{ "series": [ ... ] }`.

use serde::Deserialize;
use std::path::Path;

use crate::models::SeriesDefinition;

pub const SERIES_DEFINITION_FILE: &str = "series.json";

pub trait SeriesOverrideProvider: Send + Sync {
    /// Definitions for `folder`, `None` when the folder has none
    fn read_folder_definition(&self, folder: &Path) -> std::io::Result<Option<Vec<SeriesDefinition>>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionFile {
    Wrapped { series: Vec<SeriesDefinition> },
    Many(Vec<SeriesDefinition>),
    Single(SeriesDefinition),
}

/// Reads `series.json` from the folder itself
#[derive(Debug, Clone, Default)]
pub struct JsonSeriesOverrideProvider;

impl JsonSeriesOverrideProvider {
    pub fn new() -> Self {
        Self
    }

    /// Parse a definition file body
    pub fn parse(raw: &str) -> Result<Vec<SeriesDefinition>, serde_json::Error> {
        let definitions = match serde_json::from_str::<DefinitionFile>(raw)? {
            DefinitionFile::Wrapped { series } => series,
            DefinitionFile::Many(many) => many,
            DefinitionFile::Single(one) => vec![one],
        };
        Ok(definitions
            .into_iter()
            .filter(|d| !d.name.trim().is_empty())
            .collect())
    }
}

impl SeriesOverrideProvider for JsonSeriesOverrideProvider {
    fn read_folder_definition(&self, folder: &Path) -> std::io::Result<Option<Vec<SeriesDefinition>>> {
        let path = folder.join(SERIES_DEFINITION_FILE);
        if !path.is_file() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path)?;
        let definitions = Self::parse(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if definitions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(definitions))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_single_object() {
        let defs = JsonSeriesOverrideProvider::parse(r#"{"name":"Saga","publisher":"Image"}"#).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].publisher.as_deref(), Some("Image"));
    }

    #[test]
    fn test_parse_wrapped_list() {
        let raw = r#"{"series":[{"name":"Batman"},{"name":"Detective Comics","aliases":["Detective"]}]}"#;
        let defs = JsonSeriesOverrideProvider::parse(raw).unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[1].aliases, vec!["Detective".to_string()]);
    }

    #[test]
    fn test_parse_drops_unnamed_entries() {
        let defs = JsonSeriesOverrideProvider::parse(r#"[{"name":" "},{"name":"Saga"}]"#).unwrap();
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn test_folder_without_definition() {
        let dir = tempfile::tempdir().unwrap();
        let provider = JsonSeriesOverrideProvider::new();
        assert!(provider.read_folder_definition(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_folder_with_invalid_definition_is_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SERIES_DEFINITION_FILE), "{ nope").unwrap();
        let provider = JsonSeriesOverrideProvider::new();
        assert!(provider.read_folder_definition(dir.path()).is_err());
    }
}
