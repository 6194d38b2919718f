//! Transient scan results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use super::library::FileMetadata;

/// A comic file found on disk during one walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub relative_path: String,
    pub filename: String,
    /// Lowercased, without the dot
    pub extension: String,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    /// Content fingerprint, computed lazily by the scanner
    pub hash: Option<String>,
    /// Read only for files whose record is about to be written
    #[serde(default)]
    pub metadata: Option<FileMetadata>,
}

/// Per-path failure captured during a walk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanIssue {
    pub path: String,
    pub message: String,
}

impl ScanIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Snapshot of one directory walk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub files: Vec<ScannedFile>,
    pub errors: Vec<ScanIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovedFile {
    pub old_path: String,
    pub new_path: String,
    pub file_id: Uuid,
    pub file: ScannedFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedFile {
    pub path: String,
    pub file_id: Uuid,
}

/// Same path, different size or modification time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub file_id: Uuid,
    pub file: ScannedFile,
}

/// Classification of a walk against the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanDiff {
    pub new_files: Vec<ScannedFile>,
    pub moved_files: Vec<MovedFile>,
    pub orphaned_files: Vec<OrphanedFile>,
    pub changed_files: Vec<ChangedFile>,
    /// Previously orphaned records whose path is back on disk
    pub restored_files: Vec<Uuid>,
    pub unchanged_count: usize,
    pub errors: Vec<ScanIssue>,
    pub scan_duration: Duration,
}

impl ScanDiff {
    /// True if applying the diff would not change the registry
    pub fn is_noop(&self) -> bool {
        self.new_files.is_empty()
            && self.moved_files.is_empty()
            && self.orphaned_files.is_empty()
            && self.changed_files.is_empty()
            && self.restored_files.is_empty()
    }
}
