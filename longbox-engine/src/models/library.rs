//! Library and file registry records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::scan::ScannedFile;

/// A library root registered with the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: Uuid,
    pub name: String,
    /// Absolute path of the directory tree to scan
    pub root_path: String,
    pub created_at: DateTime<Utc>,
}

impl Library {
    pub fn new(name: impl Into<String>, root_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            root_path: root_path.into(),
            created_at: Utc::now(),
        }
    }
}

/// Registry status of a comic file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Discovered, not yet linked to a series
    Pending,
    /// Linked to a series
    Indexed,
    /// Path no longer present on disk
    Orphaned,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Indexed => "indexed",
            FileStatus::Orphaned => "orphaned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FileStatus::Pending),
            "indexed" => Some(FileStatus::Indexed),
            "orphaned" => Some(FileStatus::Orphaned),
            _ => None,
        }
    }
}

/// Per-file metadata as read by a [`MetadataProvider`](crate::providers::MetadataProvider)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMetadata {
    pub series: Option<String>,
    pub number: Option<String>,
    pub title: Option<String>,
    pub volume: Option<i32>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub publisher: Option<String>,
    pub writer: Option<String>,
    pub summary: Option<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
}

/// One comic file in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub library_id: Uuid,
    /// Absolute path
    pub path: String,
    /// Path relative to the library root
    pub relative_path: String,
    pub filename: String,
    pub extension: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub hash: Option<String>,
    pub status: FileStatus,
    pub series_id: Option<Uuid>,
    pub metadata: Option<FileMetadata>,
}

impl FileRecord {
    /// Build a pending record for a freshly discovered file
    pub fn from_scanned(library_id: Uuid, file: &ScannedFile) -> Self {
        Self {
            id: Uuid::new_v4(),
            library_id,
            path: file.path.to_string_lossy().to_string(),
            relative_path: file.relative_path.clone(),
            filename: file.filename.clone(),
            extension: file.extension.clone(),
            size: file.size,
            modified_at: file.modified_at,
            hash: file.hash.clone(),
            status: FileStatus::Pending,
            series_id: None,
            metadata: file.metadata.clone(),
        }
    }

    /// Folder containing the file (absolute)
    pub fn folder(&self) -> &str {
        match self.path.rfind(['/', '\\']) {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }

    pub fn publisher(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.publisher.as_deref())
    }
}

/// Partial update applied through `Store::update_file`
///
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileUpdate {
    pub path: Option<String>,
    pub relative_path: Option<String>,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub modified_at: Option<DateTime<Utc>>,
    pub hash: Option<String>,
    pub status: Option<FileStatus>,
    pub series_id: Option<Uuid>,
    pub metadata: Option<FileMetadata>,
}

impl FileUpdate {
    /// Link the file to a series and mark it indexed
    pub fn link(series_id: Uuid) -> Self {
        Self {
            series_id: Some(series_id),
            status: Some(FileStatus::Indexed),
            ..Default::default()
        }
    }

    pub fn status(status: FileStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Apply the update to an in-memory record
    pub fn apply_to(&self, record: &mut FileRecord) {
        if let Some(path) = &self.path {
            record.path = path.clone();
        }
        if let Some(relative_path) = &self.relative_path {
            record.relative_path = relative_path.clone();
        }
        if let Some(filename) = &self.filename {
            record.filename = filename.clone();
        }
        if let Some(size) = self.size {
            record.size = size;
        }
        if let Some(modified_at) = self.modified_at {
            record.modified_at = modified_at;
        }
        if let Some(hash) = &self.hash {
            record.hash = Some(hash.clone());
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(series_id) = self.series_id {
            record.series_id = Some(series_id);
        }
        if let Some(metadata) = &self.metadata {
            record.metadata = Some(metadata.clone());
        }
    }
}
