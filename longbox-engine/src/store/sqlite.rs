//! SQLite store
//!
//! Runtime-checked `sqlx` queries over three tables. Series uniqueness is
//! enforced by a unique index on `identity_key`, which surfaces as
//! `StoreError::UniqueViolation` when two writers race.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

use super::{FileFilter, Store, StoreError, StoreResult};
use crate::models::series::fold_name;
use crate::models::{
    FileMetadata, FileRecord, FileStatus, FileUpdate, Library, NewSeries, Series, SeriesIdentityKey,
    SeriesUpdate,
};
use longbox_common::{time, uuid_utils};

const SERIES_COLUMNS: &str = "id, name, publisher, start_year, issue_count, aliases, genres, tags, \
                              summary, file_count, created_at, updated_at";
const FILE_COLUMNS: &str = "id, library_id, path, relative_path, filename, extension, size, \
                            modified_at, hash, status, series_id, metadata";

/// [`Store`] backed by a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and initialise tables
    pub async fn open(db_path: &Path) -> longbox_common::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // mode=rwc: read, write, create
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        tracing::debug!("Connecting to database: {}", db_url);

        let pool = SqlitePool::connect(&db_url).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and initialise tables
    pub async fn from_pool(pool: SqlitePool) -> longbox_common::Result<Self> {
        init_tables(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Library registered for `root_path`, if any
    pub async fn find_library_by_root(&self, root_path: &str) -> StoreResult<Option<Library>> {
        let row = sqlx::query("SELECT id, name, root_path, created_at FROM libraries WHERE root_path = ?")
            .bind(root_path)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let id: String = row.try_get("id")?;
                let created_at: String = row.try_get("created_at")?;
                Ok(Some(Library {
                    id: uuid_utils::parse_stored("id", &id)?,
                    name: row.try_get("name")?,
                    root_path: row.try_get("root_path")?,
                    created_at: time::parse_rfc3339("created_at", &created_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn series_by_id(&self, id: Uuid) -> StoreResult<Option<Series>> {
        let row = sqlx::query(&format!("SELECT {} FROM series WHERE id = ?", SERIES_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_series(&r)).transpose()
    }
}

/// Create tables and indexes if they don't exist
async fn init_tables(pool: &SqlitePool) -> longbox_common::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS libraries (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            root_path TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS series (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            publisher TEXT,
            identity_key TEXT NOT NULL,
            start_year INTEGER,
            issue_count INTEGER,
            aliases TEXT NOT NULL DEFAULT '[]',
            genres TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            summary TEXT,
            file_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_series_identity ON series(identity_key)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            library_id TEXT NOT NULL REFERENCES libraries(id),
            path TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            filename TEXT NOT NULL,
            extension TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified_at TEXT NOT NULL,
            hash TEXT,
            status TEXT NOT NULL,
            series_id TEXT REFERENCES series(id),
            metadata TEXT,
            UNIQUE(library_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_series ON files(series_id)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (libraries, series, files)");

    Ok(())
}

fn backend<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn json_list(row: &SqliteRow, column: &str) -> StoreResult<Vec<String>> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(backend)
}

fn row_to_series(row: &SqliteRow) -> StoreResult<Series> {
    let id: String = row.try_get("id")?;
    let start_year: Option<i64> = row.try_get("start_year")?;
    let issue_count: Option<i64> = row.try_get("issue_count")?;
    let file_count: i64 = row.try_get("file_count")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Series {
        id: uuid_utils::parse_stored("id", &id)?,
        name: row.try_get("name")?,
        publisher: row.try_get("publisher")?,
        start_year: start_year.map(|y| y as i32),
        issue_count: issue_count.map(|c| c as u32),
        aliases: json_list(row, "aliases")?,
        genres: json_list(row, "genres")?,
        tags: json_list(row, "tags")?,
        summary: row.try_get("summary")?,
        file_count: file_count as u32,
        created_at: time::parse_rfc3339("created_at", &created_at)?,
        updated_at: time::parse_rfc3339("updated_at", &updated_at)?,
    })
}

fn row_to_file(row: &SqliteRow) -> StoreResult<FileRecord> {
    let id: String = row.try_get("id")?;
    let library_id: String = row.try_get("library_id")?;
    let size: i64 = row.try_get("size")?;
    let modified_at: String = row.try_get("modified_at")?;
    let status: String = row.try_get("status")?;
    let series_id: Option<String> = row.try_get("series_id")?;
    let metadata: Option<String> = row.try_get("metadata")?;

    let metadata = match metadata {
        Some(raw) => Some(serde_json::from_str::<FileMetadata>(&raw).map_err(backend)?),
        None => None,
    };

    Ok(FileRecord {
        id: uuid_utils::parse_stored("id", &id)?,
        library_id: uuid_utils::parse_stored("library_id", &library_id)?,
        path: row.try_get("path")?,
        relative_path: row.try_get("relative_path")?,
        filename: row.try_get("filename")?,
        extension: row.try_get("extension")?,
        size: size as u64,
        modified_at: time::parse_rfc3339("modified_at", &modified_at)?,
        hash: row.try_get("hash")?,
        status: FileStatus::parse(&status)
            .ok_or_else(|| StoreError::Backend(format!("Unknown file status '{}'", status)))?,
        series_id: series_id.map(|s| uuid_utils::parse_stored("series_id", &s)).transpose()?,
        metadata,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn find_library(&self, id: Uuid) -> StoreResult<Option<Library>> {
        let row = sqlx::query("SELECT id, name, root_path, created_at FROM libraries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let created_at: String = row.try_get("created_at")?;
                Ok(Some(Library {
                    id,
                    name: row.try_get("name")?,
                    root_path: row.try_get("root_path")?,
                    created_at: time::parse_rfc3339("created_at", &created_at)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn create_library(&self, library: &Library) -> StoreResult<()> {
        sqlx::query("INSERT INTO libraries (id, name, root_path, created_at) VALUES (?, ?, ?, ?)")
            .bind(library.id.to_string())
            .bind(&library.name)
            .bind(&library.root_path)
            .bind(library.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_files(&self, library_id: Uuid, filter: &FileFilter) -> StoreResult<Vec<FileRecord>> {
        let mut sql = format!("SELECT {} FROM files WHERE library_id = ?", FILE_COLUMNS);
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.unlinked_only {
            sql.push_str(" AND series_id IS NULL AND status <> 'orphaned'");
        }
        if filter.after_path.is_some() {
            sql.push_str(" AND path > ?");
        }
        sql.push_str(" ORDER BY path");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql).bind(library_id.to_string());
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(after) = &filter.after_path {
            query = query.bind(after.clone());
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit as i64);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_file).collect()
    }

    async fn create_file(&self, file: &FileRecord) -> StoreResult<()> {
        let metadata = file
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(backend)?;

        sqlx::query(&format!(
            "INSERT INTO files ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            FILE_COLUMNS
        ))
        .bind(file.id.to_string())
        .bind(file.library_id.to_string())
        .bind(&file.path)
        .bind(&file.relative_path)
        .bind(&file.filename)
        .bind(&file.extension)
        .bind(file.size as i64)
        .bind(file.modified_at.to_rfc3339())
        .bind(&file.hash)
        .bind(file.status.as_str())
        .bind(file.series_id.map(|id| id.to_string()))
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_file(&self, id: Uuid, update: &FileUpdate) -> StoreResult<()> {
        let metadata = update
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(backend)?;

        let result = sqlx::query(
            r#"
            UPDATE files SET
                path = COALESCE(?, path),
                relative_path = COALESCE(?, relative_path),
                filename = COALESCE(?, filename),
                size = COALESCE(?, size),
                modified_at = COALESCE(?, modified_at),
                hash = COALESCE(?, hash),
                status = COALESCE(?, status),
                series_id = COALESCE(?, series_id),
                metadata = COALESCE(?, metadata)
            WHERE id = ?
            "#,
        )
        .bind(&update.path)
        .bind(&update.relative_path)
        .bind(&update.filename)
        .bind(update.size.map(|s| s as i64))
        .bind(update.modified_at.map(|t| t.to_rfc3339()))
        .bind(&update.hash)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.series_id.map(|id| id.to_string()))
        .bind(metadata)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("file {}", id)));
        }
        Ok(())
    }

    async fn find_series_by_identity(&self, name: &str, publisher: Option<&str>) -> StoreResult<Option<Series>> {
        let key = SeriesIdentityKey::new(name, publisher);

        let row = sqlx::query(&format!("SELECT {} FROM series WHERE identity_key = ?", SERIES_COLUMNS))
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            return row_to_series(&row).map(Some);
        }

        if publisher.is_none() {
            // Name-only lookup: any publisher
            let prefix = SeriesIdentityKey::name_only(name);
            let row = sqlx::query(&format!(
                "SELECT {} FROM series WHERE substr(identity_key, 1, length(?1)) = ?1 \
                 ORDER BY created_at LIMIT 1",
                SERIES_COLUMNS
            ))
            .bind(prefix.as_str())
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                return row_to_series(&row).map(Some);
            }
        }

        // Aliases live in a JSON column; compare in Rust
        let folded = fold_name(name);
        let found = self.list_series().await?.into_iter().find(|s| match publisher {
            None => s.answers_to(&folded),
            Some(_) => s.all_identity_keys().contains(&key),
        });
        Ok(found)
    }

    async fn create_series(&self, series: &NewSeries) -> StoreResult<Series> {
        let created = series.clone().into_series();
        let to_json = |v: &Vec<String>| serde_json::to_string(v).map_err(backend);

        sqlx::query(
            r#"
            INSERT INTO series (
                id, name, publisher, identity_key, start_year, issue_count,
                aliases, genres, tags, summary, file_count, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(created.id.to_string())
        .bind(&created.name)
        .bind(&created.publisher)
        .bind(created.identity_key().as_str())
        .bind(created.start_year.map(i64::from))
        .bind(created.issue_count.map(i64::from))
        .bind(to_json(&created.aliases)?)
        .bind(to_json(&created.genres)?)
        .bind(to_json(&created.tags)?)
        .bind(&created.summary)
        .bind(created.created_at.to_rfc3339())
        .bind(created.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(created)
    }

    async fn update_series(&self, id: Uuid, update: &SeriesUpdate) -> StoreResult<Series> {
        let mut series = self
            .series_by_id(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("series {}", id)))?;
        update.apply_to(&mut series);

        let aliases = serde_json::to_string(&series.aliases).map_err(backend)?;
        sqlx::query(
            r#"
            UPDATE series SET
                publisher = ?, identity_key = ?, start_year = ?, issue_count = ?,
                aliases = ?, summary = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&series.publisher)
        .bind(series.identity_key().as_str())
        .bind(series.start_year.map(i64::from))
        .bind(series.issue_count.map(i64::from))
        .bind(aliases)
        .bind(&series.summary)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(series)
    }

    async fn list_series(&self) -> StoreResult<Vec<Series>> {
        let rows = sqlx::query(&format!("SELECT {} FROM series ORDER BY created_at", SERIES_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_series).collect()
    }

    async fn count_pending(&self, library_id: Uuid) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM files WHERE library_id = ? AND series_id IS NULL AND status <> 'orphaned'",
        )
        .bind(library_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn recalculate_series_progress(&self, series_id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE series SET
                file_count = (
                    SELECT COUNT(*) FROM files
                    WHERE files.series_id = series.id AND files.status <> 'orphaned'
                ),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(series_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("series {}", series_id)));
        }
        Ok(())
    }
}
