//! In-memory store
//!
//! Enforces the same unique series identity as the SQLite schema, so race
//! handling in the resolver behaves identically against both backends.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{FileFilter, Store, StoreError, StoreResult};
use crate::models::series::fold_name;
use crate::models::{
    FileRecord, FileStatus, FileUpdate, Library, NewSeries, Series, SeriesIdentityKey, SeriesUpdate,
};

#[derive(Default)]
struct Inner {
    libraries: HashMap<Uuid, Library>,
    files: HashMap<Uuid, FileRecord>,
    series: HashMap<Uuid, Series>,
    series_by_key: HashMap<SeriesIdentityKey, Uuid>,
}

/// Thread-safe in-memory [`Store`]
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one file record
    pub async fn file(&self, id: Uuid) -> Option<FileRecord> {
        self.inner.read().await.files.get(&id).cloned()
    }

    /// Snapshot of every file record, ordered by path
    pub async fn all_files(&self) -> Vec<FileRecord> {
        let inner = self.inner.read().await;
        let mut files: Vec<_> = inner.files.values().cloned().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_library(&self, id: Uuid) -> StoreResult<Option<Library>> {
        Ok(self.inner.read().await.libraries.get(&id).cloned())
    }

    async fn create_library(&self, library: &Library) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.libraries.values().any(|l| l.root_path == library.root_path) {
            return Err(StoreError::UniqueViolation {
                entity: "libraries".to_string(),
                key: library.root_path.clone(),
            });
        }
        inner.libraries.insert(library.id, library.clone());
        Ok(())
    }

    async fn list_files(&self, library_id: Uuid, filter: &FileFilter) -> StoreResult<Vec<FileRecord>> {
        let inner = self.inner.read().await;
        let mut files: Vec<FileRecord> = inner
            .files
            .values()
            .filter(|f| f.library_id == library_id && filter.matches(f))
            .cloned()
            .collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(limit) = filter.limit {
            files.truncate(limit);
        }
        Ok(files)
    }

    async fn create_file(&self, file: &FileRecord) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner
            .files
            .values()
            .any(|f| f.library_id == file.library_id && f.path == file.path)
        {
            return Err(StoreError::UniqueViolation {
                entity: "files".to_string(),
                key: file.path.clone(),
            });
        }
        inner.files.insert(file.id, file.clone());
        Ok(())
    }

    async fn update_file(&self, id: Uuid, update: &FileUpdate) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let library_id = inner
            .files
            .get(&id)
            .map(|f| f.library_id)
            .ok_or_else(|| StoreError::NotFound(format!("file {}", id)))?;
        if let Some(path) = &update.path {
            if inner
                .files
                .values()
                .any(|f| f.id != id && f.library_id == library_id && &f.path == path)
            {
                return Err(StoreError::UniqueViolation {
                    entity: "files".to_string(),
                    key: path.clone(),
                });
            }
        }
        if let Some(file) = inner.files.get_mut(&id) {
            update.apply_to(file);
        }
        Ok(())
    }

    async fn find_series_by_identity(&self, name: &str, publisher: Option<&str>) -> StoreResult<Option<Series>> {
        let inner = self.inner.read().await;
        let key = SeriesIdentityKey::new(name, publisher);

        if let Some(id) = inner.series_by_key.get(&key) {
            return Ok(inner.series.get(id).cloned());
        }

        let folded = fold_name(name);
        let mut candidates: Vec<&Series> = inner
            .series
            .values()
            .filter(|s| match publisher {
                None => s.answers_to(&folded),
                Some(_) => s.all_identity_keys().contains(&key),
            })
            .collect();
        candidates.sort_by_key(|s| s.created_at);
        Ok(candidates.first().map(|s| (*s).clone()))
    }

    async fn create_series(&self, series: &NewSeries) -> StoreResult<Series> {
        let mut inner = self.inner.write().await;
        let key = series.identity_key();
        if inner.series_by_key.contains_key(&key) {
            return Err(StoreError::UniqueViolation {
                entity: "series".to_string(),
                key: key.to_string(),
            });
        }
        let created = series.clone().into_series();
        inner.series_by_key.insert(key, created.id);
        inner.series.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update_series(&self, id: Uuid, update: &SeriesUpdate) -> StoreResult<Series> {
        let mut inner = self.inner.write().await;
        let old_key = inner
            .series
            .get(&id)
            .map(Series::identity_key)
            .ok_or_else(|| StoreError::NotFound(format!("series {}", id)))?;

        let mut updated = inner.series[&id].clone();
        update.apply_to(&mut updated);
        let new_key = updated.identity_key();

        if new_key != old_key {
            if inner.series_by_key.contains_key(&new_key) {
                return Err(StoreError::UniqueViolation {
                    entity: "series".to_string(),
                    key: new_key.to_string(),
                });
            }
            inner.series_by_key.remove(&old_key);
            inner.series_by_key.insert(new_key, id);
        }
        inner.series.insert(id, updated.clone());
        Ok(updated)
    }

    async fn list_series(&self) -> StoreResult<Vec<Series>> {
        let inner = self.inner.read().await;
        let mut series: Vec<_> = inner.series.values().cloned().collect();
        series.sort_by_key(|s| s.created_at);
        Ok(series)
    }

    async fn count_pending(&self, library_id: Uuid) -> StoreResult<usize> {
        let inner = self.inner.read().await;
        Ok(inner
            .files
            .values()
            .filter(|f| f.library_id == library_id && f.series_id.is_none() && f.status != FileStatus::Orphaned)
            .count())
    }

    async fn recalculate_series_progress(&self, series_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let count = inner
            .files
            .values()
            .filter(|f| f.series_id == Some(series_id) && f.status != FileStatus::Orphaned)
            .count() as u32;
        let series = inner
            .series
            .get_mut(&series_id)
            .ok_or_else(|| StoreError::NotFound(format!("series {}", series_id)))?;
        series.file_count = count;
        Ok(())
    }
}
