//! Persistence boundary
//!
//! The engine only talks to storage through [`Store`]. Two implementations
//! ship with the crate: [`MemoryStore`] and [`SqliteStore`].

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{FileRecord, FileStatus, FileUpdate, Library, NewSeries, Series, SeriesUpdate};

/// Store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write (e.g. a concurrent series create)
    #[error("Unique constraint violation on {entity}: {key}")]
    UniqueViolation { entity: String, key: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::UniqueViolation {
                entity: db_err.table().unwrap_or("unknown").to_string(),
                key: db_err.message().to_string(),
            },
            sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

impl From<longbox_common::Error> for StoreError {
    fn from(err: longbox_common::Error) -> Self {
        match err {
            longbox_common::Error::Database(db) => db.into(),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// File listing filter; results are ordered by path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileFilter {
    pub status: Option<FileStatus>,
    /// Only files without a series reference (orphans excluded)
    pub unlinked_only: bool,
    /// Keyset cursor: only paths strictly greater than this
    pub after_path: Option<String>,
    pub limit: Option<usize>,
}

impl FileFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn unlinked() -> Self {
        Self {
            unlinked_only: true,
            ..Default::default()
        }
    }

    pub fn after(mut self, path: Option<String>) -> Self {
        self.after_path = path;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-memory evaluation of everything except paging
    pub fn matches(&self, file: &FileRecord) -> bool {
        if let Some(status) = self.status {
            if file.status != status {
                return false;
            }
        }
        if self.unlinked_only && (file.series_id.is_some() || file.status == FileStatus::Orphaned) {
            return false;
        }
        if let Some(after) = &self.after_path {
            if file.path.as_str() <= after.as_str() {
                return false;
            }
        }
        true
    }
}

/// Storage collaborator consumed by the scanner, resolver and linker
#[async_trait]
pub trait Store: Send + Sync {
    async fn find_library(&self, id: Uuid) -> StoreResult<Option<Library>>;

    async fn create_library(&self, library: &Library) -> StoreResult<()>;

    async fn list_files(&self, library_id: Uuid, filter: &FileFilter) -> StoreResult<Vec<FileRecord>>;

    async fn create_file(&self, file: &FileRecord) -> StoreResult<()>;

    async fn update_file(&self, id: Uuid, update: &FileUpdate) -> StoreResult<()>;

    /// Find a series by identity key, matching the name or any alias
    ///
    /// With `publisher == None` any publisher matches on name alone.
    async fn find_series_by_identity(&self, name: &str, publisher: Option<&str>) -> StoreResult<Option<Series>>;

    /// Create a series; fails with `UniqueViolation` if the identity key exists
    async fn create_series(&self, series: &NewSeries) -> StoreResult<Series>;

    async fn update_series(&self, id: Uuid, update: &SeriesUpdate) -> StoreResult<Series>;

    async fn list_series(&self) -> StoreResult<Vec<Series>>;

    /// Files of the library still waiting for a series link
    async fn count_pending(&self, library_id: Uuid) -> StoreResult<usize>;

    /// Refresh derived per-series counters after linking
    async fn recalculate_series_progress(&self, series_id: Uuid) -> StoreResult<()>;
}
