//! Series resolution (sequential phase)
//!
//! Walks the distinct series names of a library's unlinked files one at a
//! time, in identity-key order, and makes sure a series exists for each.
//!
//! The lookup-then-create sequence is a check-then-act race, so this phase
//! never runs concurrently with itself for one library. A duplicate-identity
//! conflict that still happens (another library's scan, a manual create)
//! means someone else created the series: it is counted as existing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{FileRecord, NewSeries, Series, SeriesDefinition, SeriesIdentityKey, SeriesUpdate};
use crate::providers::SeriesOverrideProvider;
use crate::services::series_naming::{raw_series_name, FolderDefinitions};
use crate::store::{FileFilter, Store, StoreError};
use crate::workflow::control::ReconcileControl;
use longbox_common::events::ReconcilePhase;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveResult {
    pub created: usize,
    pub existing: usize,
    pub errors: usize,
    pub cancelled: bool,
    /// Series created by this pass, in creation order
    pub created_series: Vec<Series>,
}

/// Outcome of making sure one series exists
enum Ensured {
    Created(Series),
    Existing,
}

/// Files sharing one identity key
struct NameGroup {
    name: String,
    first_file: FileRecord,
    folders: BTreeSet<String>,
    files: Vec<FileRecord>,
}

pub struct SeriesResolver {
    store: Arc<dyn Store>,
    overrides: Arc<dyn SeriesOverrideProvider>,
}

impl SeriesResolver {
    pub fn new(store: Arc<dyn Store>, overrides: Arc<dyn SeriesOverrideProvider>) -> Self {
        Self { store, overrides }
    }

    /// Resolve or create a series for every distinct pending name
    pub async fn create_series_from_files(
        &self,
        library_id: Uuid,
        control: &ReconcileControl,
    ) -> ReconcileResult<ResolveResult> {
        if self.store.find_library(library_id).await?.is_none() {
            return Err(ReconcileError::LibraryNotFound(library_id));
        }

        let pending = self.store.list_files(library_id, &FileFilter::unlinked()).await?;
        let groups = group_by_identity(pending);
        let total = groups.len();
        let mut result = ResolveResult::default();
        let mut folders = FolderDefinitions::new(Arc::clone(&self.overrides));

        info!(library_id = %library_id, names = total, "Resolving series");

        for (processed, (key, group)) in groups.into_iter().enumerate() {
            if control.should_cancel() {
                info!(library_id = %library_id, processed, "Series resolution cancelled");
                result.cancelled = true;
                break;
            }

            // Folder definitions apply once per folder, whichever name reaches them first
            for folder in &group.folders {
                if folders.is_loaded(folder) {
                    continue;
                }
                match folders.load(folder).await {
                    Ok(Some(definitions)) => {
                        for definition in definitions.iter() {
                            self.apply_definition(definition, &mut result).await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(folder = %folder, error = %e, "Unreadable series definition");
                        result.errors += 1;
                    }
                }
            }

            let claimed = group
                .files
                .iter()
                .all(|f| folders.target(f).map_or(false, |t| t.definition.is_some()));
            if claimed {
                debug!(series = %group.name, "Name consumed by folder definition");
                control.report(ReconcilePhase::Resolving, processed + 1, total);
                continue;
            }

            let seed = seed_from_file(&group.name, &group.first_file);
            match self.ensure_series(&seed).await {
                Ok(Ensured::Created(series)) => {
                    result.created += 1;
                    result.created_series.push(series);
                }
                Ok(Ensured::Existing) => result.existing += 1,
                Err(e) => {
                    warn!(series = %group.name, key = %key, error = %e, "Series resolution failed");
                    result.errors += 1;
                }
            }

            control.report(ReconcilePhase::Resolving, processed + 1, total);
        }

        info!(
            library_id = %library_id,
            created = result.created,
            existing = result.existing,
            errors = result.errors,
            cancelled = result.cancelled,
            "Series resolution complete"
        );
        Ok(result)
    }

    /// Look up by identity, create if missing, absorb a lost race
    async fn ensure_series(&self, seed: &NewSeries) -> Result<Ensured, StoreError> {
        if self
            .store
            .find_series_by_identity(&seed.name, seed.publisher.as_deref())
            .await?
            .is_some()
        {
            return Ok(Ensured::Existing);
        }

        match self.store.create_series(seed).await {
            Ok(series) => {
                info!(series = %series.name, id = %series.id, "Created series");
                Ok(Ensured::Created(series))
            }
            Err(e) if e.is_unique_violation() => {
                let winner = self
                    .store
                    .find_series_by_identity(&seed.name, seed.publisher.as_deref())
                    .await
                    .ok()
                    .flatten();
                debug!(
                    series = %seed.name,
                    winner = ?winner.map(|s| s.id),
                    "Series created concurrently, using existing"
                );
                Ok(Ensured::Existing)
            }
            Err(e) => Err(e),
        }
    }

    /// Create the defined series, or fill in what an existing one lacks
    async fn apply_definition(&self, definition: &SeriesDefinition, result: &mut ResolveResult) {
        let seed = definition.to_new_series();
        let existing = self
            .store
            .find_series_by_identity(&seed.name, seed.publisher.as_deref())
            .await;

        let outcome = match existing {
            Ok(Some(series)) => self.sync_definition(&series, definition).await.map(|_| Ensured::Existing),
            Ok(None) => self.ensure_series(&seed).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Ensured::Created(series)) => {
                result.created += 1;
                result.created_series.push(series);
            }
            Ok(Ensured::Existing) => result.existing += 1,
            Err(e) => {
                warn!(series = %definition.name, error = %e, "Series definition failed");
                result.errors += 1;
            }
        }
    }

    async fn sync_definition(&self, series: &Series, definition: &SeriesDefinition) -> Result<(), StoreError> {
        let update = definition_update(series, definition);
        if update.is_empty() {
            return Ok(());
        }
        debug!(series = %series.name, "Syncing series from folder definition");
        self.store.update_series(series.id, &update).await.map(|_| ())
    }
}

fn group_by_identity(files: Vec<FileRecord>) -> BTreeMap<SeriesIdentityKey, NameGroup> {
    let mut groups: BTreeMap<SeriesIdentityKey, NameGroup> = BTreeMap::new();
    for file in files {
        let Some(name) = raw_series_name(&file) else {
            warn!(path = %file.path, "No series name for file");
            continue;
        };
        let key = SeriesIdentityKey::new(&name, file.publisher());
        let group = groups.entry(key).or_insert_with(|| NameGroup {
            name,
            first_file: file.clone(),
            folders: BTreeSet::new(),
            files: Vec::new(),
        });
        group.folders.insert(file.folder().to_string());
        group.files.push(file);
    }
    groups
}

/// New series seeded from the first file's metadata
fn seed_from_file(name: &str, file: &FileRecord) -> NewSeries {
    let metadata = file.metadata.clone().unwrap_or_default();
    NewSeries {
        name: name.to_string(),
        publisher: metadata.publisher,
        start_year: metadata.year,
        genres: metadata.genres,
        tags: metadata.tags,
        ..Default::default()
    }
}

/// Fields the definition supplies that the series does not have yet
fn definition_update(series: &Series, definition: &SeriesDefinition) -> SeriesUpdate {
    let mut update = SeriesUpdate::default();
    if series.start_year.is_none() {
        update.start_year = definition.start_year;
    }
    if series.issue_count.is_none() {
        update.issue_count = definition.issue_count;
    }
    if series.summary.is_none() {
        update.summary = definition.summary.clone();
    }
    if series.publisher.is_none() {
        update.publisher = definition.publisher.clone();
    }

    let missing: Vec<String> = definition
        .aliases
        .iter()
        .filter(|a| !series.answers_to(a))
        .cloned()
        .collect();
    if !missing.is_empty() {
        let mut aliases = series.aliases.clone();
        aliases.extend(missing);
        update.aliases = Some(aliases);
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileMetadata, FileStatus, Library};
    use crate::providers::JsonSeriesOverrideProvider;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn pending(library_id: Uuid, relative: &str, metadata: Option<FileMetadata>) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4(),
            library_id,
            path: format!("/comics/{}", relative),
            relative_path: relative.to_string(),
            filename: relative.rsplit('/').next().unwrap_or(relative).to_string(),
            extension: "cbz".to_string(),
            size: 1,
            modified_at: Utc::now(),
            hash: None,
            status: FileStatus::Pending,
            series_id: None,
            metadata,
        }
    }

    async fn store_with(files: &[FileRecord]) -> (Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let library = Library::new("Comics", "/comics");
        store.create_library(&library).await.unwrap();
        for file in files {
            let mut file = file.clone();
            file.library_id = library.id;
            store.create_file(&file).await.unwrap();
        }
        (store, library.id)
    }

    fn resolver(store: Arc<MemoryStore>) -> SeriesResolver {
        SeriesResolver::new(store, Arc::new(JsonSeriesOverrideProvider::new()))
    }

    #[tokio::test]
    async fn test_creates_one_series_per_identity() {
        let lib = Uuid::nil();
        let (store, library_id) = store_with(&[
            pending(lib, "Batman/Batman 001.cbz", None),
            pending(lib, "Batman/Batman 002.cbz", None),
            pending(lib, "Saga/Saga 001.cbz", None),
        ])
        .await;

        let result = resolver(store.clone())
            .create_series_from_files(library_id, &ReconcileControl::new())
            .await
            .unwrap();

        assert_eq!(result.created, 2);
        assert_eq!(result.existing, 0);
        assert_eq!(result.errors, 0);
        let names: Vec<_> = store.list_series().await.unwrap().into_iter().map(|s| s.name).collect();
        assert!(names.contains(&"Batman".to_string()));
        assert!(names.contains(&"Saga".to_string()));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let lib = Uuid::nil();
        let (store, library_id) = store_with(&[
            pending(lib, "Batman/Batman 001.cbz", None),
            pending(lib, "Saga/Saga 001.cbz", None),
        ])
        .await;
        let resolver = resolver(store);

        resolver
            .create_series_from_files(library_id, &ReconcileControl::new())
            .await
            .unwrap();
        let second = resolver
            .create_series_from_files(library_id, &ReconcileControl::new())
            .await
            .unwrap();

        assert_eq!(second.created, 0);
        assert_eq!(second.existing, 2);
    }

    #[tokio::test]
    async fn test_seeds_from_first_file_metadata() {
        let lib = Uuid::nil();
        let metadata = FileMetadata {
            series: Some("Saga".into()),
            publisher: Some("Image".into()),
            year: Some(2012),
            genres: vec!["Sci-Fi".into()],
            ..Default::default()
        };
        let (store, library_id) = store_with(&[pending(lib, "misc/Saga 001.cbz", Some(metadata))]).await;

        resolver(store.clone())
            .create_series_from_files(library_id, &ReconcileControl::new())
            .await
            .unwrap();

        let saga = store.find_series_by_identity("Saga", Some("Image Comics")).await.unwrap().unwrap();
        assert_eq!(saga.start_year, Some(2012));
        assert_eq!(saga.genres, vec!["Sci-Fi".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_library() {
        let store = Arc::new(MemoryStore::new());
        let err = resolver(store)
            .create_series_from_files(Uuid::new_v4(), &ReconcileControl::new())
            .await
            .unwrap_err();
        assert!(err.is_library_not_found());
    }

    #[tokio::test]
    async fn test_cancel_before_first_name() {
        let lib = Uuid::nil();
        let (store, library_id) = store_with(&[pending(lib, "Batman/Batman 001.cbz", None)]).await;

        let result = resolver(store)
            .create_series_from_files(library_id, &ReconcileControl::new().with_should_cancel(|| true))
            .await
            .unwrap();
        assert!(result.cancelled);
        assert_eq!(result.created, 0);
    }

    #[test]
    fn test_definition_update_only_fills_gaps() {
        let mut series = NewSeries {
            name: "Detective Comics".into(),
            start_year: Some(1937),
            ..Default::default()
        }
        .into_series();
        series.aliases = vec!["Detective".into()];

        let definition = SeriesDefinition {
            name: "Detective Comics".into(),
            start_year: Some(2011),
            issue_count: Some(52),
            aliases: vec!["detective".into(), "'Tec".into()],
            ..Default::default()
        };

        let update = definition_update(&series, &definition);
        assert_eq!(update.start_year, None);
        assert_eq!(update.issue_count, Some(52));
        assert_eq!(update.aliases, Some(vec!["Detective".to_string(), "'Tec".to_string()]));
    }
}
