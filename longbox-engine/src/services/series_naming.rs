//! Which series a file belongs to, before any store lookup
//!
//! The raw series name of a file is its extracted `series` metadata, else its
//! containing folder (relative to the library root), else its filename stem
//! with trailing issue tokens removed.
//!
//! Folder definitions take precedence: a folder with a single definition
//! claims every file in it; a folder with several claims the files whose raw
//! name, or filename stem, matches a definition's name or alias.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::{FileRecord, SeriesDefinition, SeriesIdentityKey};
use crate::providers::SeriesOverrideProvider;

static TRAILING_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[\(\[][^()\[\]]*[\)\]]\s*$").expect("valid regex"));
static TRAILING_ISSUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\s\-]*(#|no\.?\s*|issue\s+)?-?\d+(\.\d+)?[a-z]?(\s+of\s+\d+)?\s*$").expect("valid regex")
});

pub fn raw_series_name(file: &FileRecord) -> Option<String> {
    if let Some(series) = file
        .metadata
        .as_ref()
        .and_then(|m| m.series.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        return Some(series.to_string());
    }

    let mut components: Vec<&str> = file
        .relative_path
        .split(['/', '\\'])
        .filter(|c| !c.is_empty())
        .collect();
    components.pop();
    if let Some(folder) = components.last().map(|f| f.trim()).filter(|f| !f.is_empty()) {
        return Some(folder.to_string());
    }

    name_from_filename(&file.filename)
}

/// `"Batman 001.cbz"` -> `"Batman"`, `"Saga_012_(2014).cbr"` -> `"Saga"`
pub fn name_from_filename(filename: &str) -> Option<String> {
    let stem = match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[..idx],
        _ => filename,
    };
    let mut name = stem.replace('_', " ");

    loop {
        let stripped = TRAILING_GROUP.replace(&name, "").to_string();
        if stripped == name {
            break;
        }
        name = stripped;
    }
    let name = TRAILING_ISSUE.replace(&name, "").trim().to_string();

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Definition claiming a file with this raw name, if any
pub fn definition_for<'a>(definitions: &'a [SeriesDefinition], raw_name: &str) -> Option<&'a SeriesDefinition> {
    definitions.iter().find(|d| d.covers(raw_name)).or(match definitions {
        [only] => Some(only),
        _ => None,
    })
}

/// Identity key and display name a file should resolve to
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesTarget {
    pub name: String,
    pub publisher: Option<String>,
    /// Set when a folder definition claimed the file
    pub definition: Option<SeriesDefinition>,
}

impl SeriesTarget {
    pub fn identity_key(&self) -> SeriesIdentityKey {
        SeriesIdentityKey::new(&self.name, self.publisher.as_deref())
    }
}

/// Folder definitions read at most once per folder per run
pub struct FolderDefinitions {
    provider: Arc<dyn SeriesOverrideProvider>,
    folders: HashMap<String, Option<Arc<Vec<SeriesDefinition>>>>,
}

impl FolderDefinitions {
    pub fn new(provider: Arc<dyn SeriesOverrideProvider>) -> Self {
        Self {
            provider,
            folders: HashMap::new(),
        }
    }

    pub fn is_loaded(&self, folder: &str) -> bool {
        self.folders.contains_key(folder)
    }

    /// Definitions for `folder`
    ///
    /// A read failure is returned once, then remembered as "no definition".
    pub async fn load(&mut self, folder: &str) -> std::io::Result<Option<Arc<Vec<SeriesDefinition>>>> {
        if let Some(cached) = self.folders.get(folder) {
            return Ok(cached.clone());
        }

        let provider = Arc::clone(&self.provider);
        let path = PathBuf::from(folder);
        let result = tokio::task::spawn_blocking(move || provider.read_folder_definition(&path))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(definitions) => {
                let definitions = definitions.map(Arc::new);
                self.folders.insert(folder.to_string(), definitions.clone());
                Ok(definitions)
            }
            Err(e) => {
                self.folders.insert(folder.to_string(), None);
                Err(e)
            }
        }
    }

    /// Target for a file whose folder has already been loaded
    pub fn target(&self, file: &FileRecord) -> Option<SeriesTarget> {
        let raw = raw_series_name(file)?;
        let claimed = self
            .folders
            .get(file.folder())
            .and_then(|defs| defs.as_ref())
            .and_then(|defs| {
                definition_for(defs, &raw).or_else(|| {
                    name_from_filename(&file.filename).and_then(|stem| defs.iter().find(|d| d.covers(&stem)))
                })
            });

        Some(match claimed {
            Some(definition) => SeriesTarget {
                name: definition.name.trim().to_string(),
                publisher: definition.publisher.clone(),
                definition: Some(definition.clone()),
            },
            None => SeriesTarget {
                name: raw,
                publisher: file.publisher().map(String::from),
                definition: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileMetadata, FileStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn file(relative: &str) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4(),
            library_id: Uuid::new_v4(),
            path: format!("/comics/{}", relative),
            relative_path: relative.to_string(),
            filename: relative.rsplit('/').next().unwrap_or(relative).to_string(),
            extension: "cbz".to_string(),
            size: 1,
            modified_at: Utc::now(),
            hash: None,
            status: FileStatus::Pending,
            series_id: None,
            metadata: None,
        }
    }

    fn definition(name: &str, aliases: &[&str]) -> SeriesDefinition {
        SeriesDefinition {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_name_from_filename() {
        assert_eq!(name_from_filename("Batman 001.cbz").as_deref(), Some("Batman"));
        assert_eq!(name_from_filename("Saga_012_(2014).cbr").as_deref(), Some("Saga"));
        assert_eq!(name_from_filename("X-Men - 005 (2019) (Digital).cbz").as_deref(), Some("X-Men"));
        assert_eq!(name_from_filename("Hawkeye #7.cbz").as_deref(), Some("Hawkeye"));
        assert_eq!(name_from_filename("2000 AD 1234.cbz").as_deref(), Some("2000 AD"));
        assert_eq!(name_from_filename("001.cbz"), None);
    }

    #[test]
    fn test_raw_name_precedence() {
        let mut tagged = file("Batman/Batman 001.cbz");
        tagged.metadata = Some(FileMetadata {
            series: Some("Batman (2016)".into()),
            ..Default::default()
        });
        assert_eq!(raw_series_name(&tagged).as_deref(), Some("Batman (2016)"));
        assert_eq!(raw_series_name(&file("Batman/Batman 001.cbz")).as_deref(), Some("Batman"));
        assert_eq!(raw_series_name(&file("Saga 001.cbz")).as_deref(), Some("Saga"));
    }

    #[test]
    fn test_definition_for_single_claims_everything() {
        let defs = vec![definition("Batman", &[])];
        assert_eq!(definition_for(&defs, "Batman (2016)").map(|d| d.name.as_str()), Some("Batman"));
    }

    #[test]
    fn test_definition_for_many_matches_by_alias() {
        let defs = vec![definition("Batman", &[]), definition("Detective Comics", &["Detective"])];
        assert_eq!(
            definition_for(&defs, "detective").map(|d| d.name.as_str()),
            Some("Detective Comics")
        );
        assert!(definition_for(&defs, "Nightwing").is_none());
        assert!(definition_for(&[], "Batman").is_none());
    }

    struct OneFolder;

    impl SeriesOverrideProvider for OneFolder {
        fn read_folder_definition(&self, folder: &std::path::Path) -> std::io::Result<Option<Vec<SeriesDefinition>>> {
            if folder.ends_with("Batman") {
                Ok(Some(vec![SeriesDefinition {
                    name: "Batman".into(),
                    publisher: Some("DC Comics".into()),
                    ..Default::default()
                }]))
            } else if folder.ends_with("Broken") {
                Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad json"))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn test_target_uses_loaded_definition() {
        let mut folders = FolderDefinitions::new(Arc::new(OneFolder));
        let claimed = file("Batman/Batman (2016) 001.cbz");
        let plain = file("Saga/Saga 001.cbz");

        folders.load(claimed.folder()).await.unwrap();
        folders.load(plain.folder()).await.unwrap();

        let target = folders.target(&claimed).unwrap();
        assert_eq!(target.identity_key(), SeriesIdentityKey::new("Batman", Some("DC")));
        assert!(target.definition.is_some());

        let target = folders.target(&plain).unwrap();
        assert_eq!(target.name, "Saga");
        assert!(target.definition.is_none());
    }

    #[tokio::test]
    async fn test_read_failure_reported_once() {
        let mut folders = FolderDefinitions::new(Arc::new(OneFolder));
        assert!(folders.load("/comics/Broken").await.is_err());
        assert!(folders.is_loaded("/comics/Broken"));
        assert!(folders.load("/comics/Broken").await.unwrap().is_none());
    }
}
