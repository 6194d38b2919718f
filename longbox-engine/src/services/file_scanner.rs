//! Comic archive discovery and registry diffing
//!
//! Two phases, as the walk is cheap and stat/hash is not:
//! - sequential directory traversal, skipping dot entries
//! - parallel stat, then fingerprinting for files that are new, moved or changed
//!
//! Per-path failures are collected into the result; only an unknown library
//! or an invalid root aborts a scan.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::{DirEntry, WalkDir};

use crate::models::{
    ChangedFile, DiscoveryResult, FileRecord, FileStatus, MovedFile, OrphanedFile, ScanDiff, ScanIssue, ScannedFile,
};
use crate::providers::{FileInfoProvider, JsonSidecarMetadataProvider, MetadataProvider};
use crate::store::{FileFilter, Store, StoreError};

pub const DEFAULT_EXTENSIONS: &[&str] = &["cbz", "cbr", "cb7", "cbt", "pdf"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Library not found: {0}")]
    LibraryNotFound(Uuid),

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Blocking scan task panicked or was cancelled
    #[error("Scan task failed: {0}")]
    Join(String),
}

pub struct FileScanner {
    store: Arc<dyn Store>,
    info: Arc<dyn FileInfoProvider>,
    metadata: Arc<dyn MetadataProvider>,
    extensions: Arc<HashSet<String>>,
}

impl FileScanner {
    pub fn new(store: Arc<dyn Store>, info: Arc<dyn FileInfoProvider>) -> Self {
        Self {
            store,
            info,
            metadata: Arc::new(JsonSidecarMetadataProvider::new()),
            extensions: Arc::new(DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect()),
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Replace the recognised extensions (case-insensitive, no dot)
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = Arc::new(
            extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        );
        self
    }

    /// Walk `root` and stat every comic archive under it
    pub fn discover_files(&self, root: &Path) -> Result<DiscoveryResult, ScanError> {
        discover(root, &self.extensions, self.info.as_ref())
    }

    /// Diff the library's root against its registry
    pub async fn scan_library(&self, library_id: Uuid) -> Result<ScanDiff, ScanError> {
        let library = self
            .store
            .find_library(library_id)
            .await?
            .ok_or(ScanError::LibraryNotFound(library_id))?;

        let existing = self.store.list_files(library_id, &FileFilter::all()).await?;
        let root = PathBuf::from(&library.root_path);
        let extensions = Arc::clone(&self.extensions);
        let info = Arc::clone(&self.info);
        let metadata = Arc::clone(&self.metadata);

        info!(library_id = %library_id, root = %root.display(), known = existing.len(), "Scanning library");

        let diff = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let discovery = discover(&root, &extensions, info.as_ref())?;
            let mut diff = classify(&existing, discovery, info.as_ref());
            attach_metadata(&mut diff, metadata.as_ref());
            diff.scan_duration = started.elapsed();
            Ok::<_, ScanError>(diff)
        })
        .await
        .map_err(|e| ScanError::Join(e.to_string()))??;

        info!(
            library_id = %library_id,
            new = diff.new_files.len(),
            moved = diff.moved_files.len(),
            orphaned = diff.orphaned_files.len(),
            changed = diff.changed_files.len(),
            restored = diff.restored_files.len(),
            unchanged = diff.unchanged_count,
            errors = diff.errors.len(),
            duration_ms = diff.scan_duration.as_millis() as u64,
            "Scan complete"
        );
        Ok(diff)
    }
}

fn discover(
    root: &Path,
    extensions: &HashSet<String>,
    info: &dyn FileInfoProvider,
) -> Result<DiscoveryResult, ScanError> {
    if !root.exists() {
        return Err(ScanError::PathNotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    // Phase 1: traversal
    let mut candidates = Vec::new();
    let mut errors = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
                    candidates.push(entry.into_path());
                }
            }
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                warn!(path = %path, error = %e, "Error accessing entry");
                errors.push(ScanIssue::new(path, e.to_string()));
            }
        }
    }

    debug!(candidates = candidates.len(), "Traversal complete");

    // Phase 2: stat
    let stats: Vec<Result<ScannedFile, ScanIssue>> = candidates
        .par_iter()
        .map(|path| {
            let stat = info
                .stat(path)
                .map_err(|e| ScanIssue::new(path.display().to_string(), e.to_string()))?;
            Ok(scanned_file(root, path, stat.size, stat.modified_at))
        })
        .collect();

    let mut files = Vec::with_capacity(stats.len());
    for result in stats {
        match result {
            Ok(file) => files.push(file),
            Err(issue) => {
                warn!(path = %issue.path, error = %issue.message, "Stat failed");
                errors.push(issue);
            }
        }
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(DiscoveryResult { files, errors })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

fn has_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .map(|ext| extensions.contains(&ext.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or(false)
}

fn scanned_file(root: &Path, path: &Path, size: u64, modified_at: DateTime<Utc>) -> ScannedFile {
    let relative_path = path
        .strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/");

    ScannedFile {
        path: path.to_path_buf(),
        relative_path,
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        extension: path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default(),
        size,
        modified_at,
        hash: None,
        metadata: None,
    }
}

/// Classify a walk against the registry
///
/// - path known, same size and mtime: unchanged (or restored when the record was orphaned)
/// - content hash equal to a live record at another path: moved, even when the
///   path itself is known (renames and swaps keep their record)
/// - path known otherwise: changed, plus restored for an orphaned record
/// - path unknown, size + mtime equal to a record whose path vanished: moved
/// - anything else: new
/// - live record neither seen nor moved: orphaned
///
/// Only files that are not unchanged get fingerprinted. A move may only land on
/// a path whose current record is itself moving away.
pub fn classify(existing: &[FileRecord], discovery: DiscoveryResult, info: &dyn FileInfoProvider) -> ScanDiff {
    let by_path: HashMap<&str, &FileRecord> = existing.iter().map(|r| (r.path.as_str(), r)).collect();
    let on_disk: HashSet<String> = discovery
        .files
        .iter()
        .map(|f| f.path.to_string_lossy().to_string())
        .collect();
    let mut settled: HashSet<Uuid> = HashSet::new();
    let mut diff = ScanDiff {
        errors: discovery.errors,
        ..ScanDiff::default()
    };
    let mut unsettled = Vec::new();

    for file in discovery.files {
        let path = file.path.to_string_lossy().to_string();
        match by_path.get(path.as_str()) {
            Some(record) if record.size == file.size && record.modified_at == file.modified_at => {
                settled.insert(record.id);
                if record.status == FileStatus::Orphaned {
                    diff.restored_files.push(record.id);
                } else {
                    diff.unchanged_count += 1;
                }
            }
            _ => unsettled.push(file),
        }
    }

    let mut hashed = Vec::with_capacity(unsettled.len());
    for (file, issue) in fingerprint_all(unsettled, info) {
        if let Some(issue) = issue {
            warn!(path = %issue.path, error = %issue.message, "Fingerprint failed");
            diff.errors.push(issue);
        }
        hashed.push(file);
    }

    // Content hash first
    let mut by_hash: HashMap<&str, Vec<&FileRecord>> = HashMap::new();
    for record in existing
        .iter()
        .filter(|r| r.status != FileStatus::Orphaned && !settled.contains(&r.id))
    {
        if let Some(hash) = record.hash.as_deref() {
            by_hash.entry(hash).or_default().push(record);
        }
    }

    let mut claims: Vec<Option<&FileRecord>> = vec![None; hashed.len()];
    let mut claimed: HashSet<Uuid> = HashSet::new();
    for (slot, file) in claims.iter_mut().zip(&hashed) {
        let Some(hash) = file.hash.as_deref() else {
            continue;
        };
        let path = file.path.to_string_lossy();
        let candidate = by_hash.get(hash).and_then(|records| {
            records
                .iter()
                .find(|r| r.path != path && !claimed.contains(&r.id))
                .copied()
        });
        if let Some(record) = candidate {
            claimed.insert(record.id);
            *slot = Some(record);
        }
    }

    // Drop moves onto a path whose record stays put, until none are left
    loop {
        let mut dropped = false;
        for (slot, file) in claims.iter_mut().zip(&hashed) {
            let Some(record) = *slot else {
                continue;
            };
            let path = file.path.to_string_lossy();
            if let Some(holder) = by_path.get(path.as_ref()) {
                if !claimed.contains(&holder.id) {
                    claimed.remove(&record.id);
                    *slot = None;
                    dropped = true;
                }
            }
        }
        if !dropped {
            break;
        }
    }

    // Path next, for files whose record is not moving away
    let mut seen: HashSet<Uuid> = HashSet::new();
    let mut unknown = Vec::new();
    for (file, claim) in hashed.into_iter().zip(claims) {
        if let Some(record) = claim {
            push_move(&mut diff, record, file);
            continue;
        }
        let path = file.path.to_string_lossy().to_string();
        match by_path.get(path.as_str()) {
            Some(record) if !claimed.contains(&record.id) => {
                seen.insert(record.id);
                if record.status == FileStatus::Orphaned {
                    diff.restored_files.push(record.id);
                }
                diff.changed_files.push(ChangedFile {
                    file_id: record.id,
                    file,
                });
            }
            _ => unknown.push(file),
        }
    }

    // Size + mtime last, only against records whose path vanished
    let mut missing: Vec<&FileRecord> = existing
        .iter()
        .filter(|r| {
            r.status != FileStatus::Orphaned
                && !settled.contains(&r.id)
                && !claimed.contains(&r.id)
                && !seen.contains(&r.id)
        })
        .collect();

    for file in unknown {
        let vanished = missing
            .iter()
            .position(|r| !on_disk.contains(&r.path) && same_fingerprint(r, &file));
        match vanished {
            Some(idx) => {
                let record = missing.swap_remove(idx);
                push_move(&mut diff, record, file);
            }
            None => diff.new_files.push(file),
        }
    }

    missing.sort_by(|a, b| a.path.cmp(&b.path));
    diff.orphaned_files = missing
        .into_iter()
        .map(|r| OrphanedFile {
            path: r.path.clone(),
            file_id: r.id,
        })
        .collect();

    diff
}

fn push_move(diff: &mut ScanDiff, record: &FileRecord, file: ScannedFile) {
    debug!(from = %record.path, to = %file.path.display(), "Detected move");
    diff.moved_files.push(MovedFile {
        old_path: record.path.clone(),
        new_path: file.path.to_string_lossy().to_string(),
        file_id: record.id,
        file,
    });
}

/// Read metadata for every file whose record is about to be written
///
/// Unchanged and restored records keep what they have.
fn attach_metadata(diff: &mut ScanDiff, provider: &dyn MetadataProvider) {
    let files: Vec<&mut ScannedFile> = diff
        .new_files
        .iter_mut()
        .chain(diff.moved_files.iter_mut().map(|m| &mut m.file))
        .chain(diff.changed_files.iter_mut().map(|c| &mut c.file))
        .collect();

    let issues: Vec<ScanIssue> = files
        .into_par_iter()
        .filter_map(|file| match provider.read(&file.path) {
            Ok(metadata) => {
                file.metadata = metadata;
                None
            }
            Err(e) => Some(ScanIssue::new(
                file.path.display().to_string(),
                format!("metadata unreadable: {}", e),
            )),
        })
        .collect();

    for issue in issues {
        warn!(path = %issue.path, error = %issue.message, "Metadata read failed");
        diff.errors.push(issue);
    }
}

/// Hash every file in parallel; order is preserved
fn fingerprint_all(files: Vec<ScannedFile>, info: &dyn FileInfoProvider) -> Vec<(ScannedFile, Option<ScanIssue>)> {
    files
        .into_par_iter()
        .map(|mut file| match info.hash(&file.path) {
            Ok(hash) => {
                file.hash = Some(hash);
                (file, None)
            }
            Err(e) => {
                let issue = ScanIssue::new(file.path.display().to_string(), format!("hash failed: {}", e));
                (file, Some(issue))
            }
        })
        .collect()
}

fn same_fingerprint(record: &FileRecord, file: &ScannedFile) -> bool {
    match (&record.hash, &file.hash) {
        (Some(a), Some(b)) => a == b,
        _ => record.size == file.size && record.modified_at == file.modified_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Library;
    use crate::providers::FsFileInfoProvider;
    use crate::store::MemoryStore;
    use std::fs;

    fn write(root: &Path, relative: &str, contents: &[u8]) -> PathBuf {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    async fn setup(root: &Path) -> (Arc<MemoryStore>, FileScanner, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let library = Library::new("Comics", root.to_string_lossy());
        store.create_library(&library).await.unwrap();
        let scanner = FileScanner::new(store.clone(), Arc::new(FsFileInfoProvider::default()));
        (store, scanner, library.id)
    }

    #[test]
    fn test_discover_skips_hidden_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Saga/Saga 001.cbz", b"a");
        write(dir.path(), "Saga/Saga 002.CBR", b"b");
        write(dir.path(), "Saga/cover.jpg", b"c");
        write(dir.path(), ".hidden/Secret 001.cbz", b"d");
        write(dir.path(), "Saga/.Saga 003.cbz", b"e");

        let scanner = FileScanner::new(Arc::new(MemoryStore::new()), Arc::new(FsFileInfoProvider::default()));
        let result = scanner.discover_files(dir.path()).unwrap();

        let relative: Vec<_> = result.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(relative, vec!["Saga/Saga 001.cbz", "Saga/Saga 002.CBR"]);
        assert_eq!(result.files[1].extension, "cbr");
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_discover_rejects_invalid_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = write(dir.path(), "file.cbz", b"x");
        let scanner = FileScanner::new(Arc::new(MemoryStore::new()), Arc::new(FsFileInfoProvider::default()));

        assert!(matches!(scanner.discover_files(&file), Err(ScanError::NotADirectory(_))));
        assert!(matches!(
            scanner.discover_files(&dir.path().join("missing")),
            Err(ScanError::PathNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fresh_directory_yields_new_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Batman/Batman 001.cbz", b"one");
        write(dir.path(), "Batman/Batman 002.cbz", b"two");
        let (_store, scanner, library_id) = setup(dir.path()).await;

        let diff = scanner.scan_library(library_id).await.unwrap();
        assert_eq!(diff.new_files.len(), 2);
        assert!(diff.orphaned_files.is_empty());
        assert!(diff.errors.is_empty());
        assert!(diff.new_files.iter().all(|f| f.hash.is_some()));
    }

    #[tokio::test]
    async fn test_new_files_carry_sidecar_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "Saga/Saga 001.cbz", b"one");
        write(dir.path(), "Saga/Saga 001.json", br#"{"series": "Saga", "publisher": "Image"}"#);
        write(dir.path(), "Saga/Saga 002.cbz", b"two");
        write(dir.path(), "Saga/Saga 002.json", b"{broken");
        let (_store, scanner, library_id) = setup(dir.path()).await;

        let diff = scanner.scan_library(library_id).await.unwrap();
        let first = diff.new_files.iter().find(|f| f.filename == "Saga 001.cbz").unwrap();
        assert_eq!(first.metadata.as_ref().unwrap().publisher.as_deref(), Some("Image"));

        // Unreadable metadata is reported but the file is still indexed
        let second = diff.new_files.iter().find(|f| f.filename == "Saga 002.cbz").unwrap();
        assert!(second.metadata.is_none());
        assert_eq!(diff.errors.len(), 1);
        assert!(diff.errors[0].path.ends_with("Saga 002.cbz"));
    }

    #[tokio::test]
    async fn test_unknown_library_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, scanner, _) = setup(dir.path()).await;
        let missing = Uuid::new_v4();
        assert!(matches!(
            scanner.scan_library(missing).await,
            Err(ScanError::LibraryNotFound(id)) if id == missing
        ));
    }

    fn record_for(library_id: Uuid, file: &ScannedFile) -> FileRecord {
        let mut record = FileRecord::from_scanned(library_id, file);
        record.status = FileStatus::Indexed;
        record
    }

    #[test]
    fn test_classify_detects_move_by_hash() {
        let dir = tempfile::tempdir().unwrap();
        let old = write(dir.path(), "old/Saga 001.cbz", b"saga one");
        let info = FsFileInfoProvider::default();
        let library_id = Uuid::new_v4();

        let mut before = discover(dir.path(), &["cbz".to_string()].into(), &info).unwrap().files.remove(0);
        before.hash = Some(info.hash(&old).unwrap());
        let record = record_for(library_id, &before);

        fs::create_dir_all(dir.path().join("new")).unwrap();
        fs::rename(&old, dir.path().join("new/Saga 001.cbz")).unwrap();

        let discovery = discover(dir.path(), &["cbz".to_string()].into(), &info).unwrap();
        let diff = classify(&[record.clone()], discovery, &info);

        assert_eq!(diff.moved_files.len(), 1);
        assert_eq!(diff.moved_files[0].file_id, record.id);
        assert!(diff.new_files.is_empty());
        assert!(diff.orphaned_files.is_empty());
    }

    #[test]
    fn test_classify_orphans_missing_and_counts_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.cbz", b"a");
        let info = FsFileInfoProvider::default();
        let library_id = Uuid::new_v4();

        let discovery = discover(dir.path(), &["cbz".to_string()].into(), &info).unwrap();
        let present = record_for(library_id, &discovery.files[0]);
        let mut gone = present.clone();
        gone.id = Uuid::new_v4();
        gone.path = dir.path().join("gone.cbz").to_string_lossy().to_string();
        gone.size = 999;
        gone.hash = Some("deadbeef".into());

        let diff = classify(&[present, gone.clone()], discovery, &info);
        assert_eq!(diff.unchanged_count, 1);
        assert_eq!(diff.orphaned_files.len(), 1);
        assert_eq!(diff.orphaned_files[0].file_id, gone.id);
    }

    #[test]
    fn test_classify_changed_and_restored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.cbz", b"a");
        write(dir.path(), "b.cbz", b"b");
        let info = FsFileInfoProvider::default();
        let library_id = Uuid::new_v4();

        let discovery = discover(dir.path(), &["cbz".to_string()].into(), &info).unwrap();
        let mut changed = record_for(library_id, &discovery.files[0]);
        changed.size += 10;
        let mut orphaned = record_for(library_id, &discovery.files[1]);
        orphaned.status = FileStatus::Orphaned;

        let diff = classify(&[changed.clone(), orphaned.clone()], discovery, &info);
        assert_eq!(diff.changed_files.len(), 1);
        assert_eq!(diff.changed_files[0].file_id, changed.id);
        assert_eq!(diff.restored_files, vec![orphaned.id]);
        assert_eq!(diff.unchanged_count, 0);
        assert!(diff.new_files.is_empty());
    }

    #[test]
    fn test_classify_prefers_fingerprint_over_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.cbz", b"first issue");
        let c = write(dir.path(), "c.cbz", b"second issue, longer");
        let info = FsFileInfoProvider::default();
        let library_id = Uuid::new_v4();

        let mut records = Vec::new();
        for mut file in discover(dir.path(), &["cbz".to_string()].into(), &info).unwrap().files {
            file.hash = Some(info.hash(&file.path).unwrap());
            records.push(record_for(library_id, &file));
        }
        let (record_a, record_c) = (records[0].clone(), records[1].clone());

        fs::rename(&a, dir.path().join("b.cbz")).unwrap();
        fs::rename(&c, &a).unwrap();

        let discovery = discover(dir.path(), &["cbz".to_string()].into(), &info).unwrap();
        let diff = classify(&records, discovery, &info);

        assert_eq!(diff.moved_files.len(), 2);
        assert!(diff.new_files.is_empty());
        assert!(diff.changed_files.is_empty());
        assert!(diff.orphaned_files.is_empty());
        let target = |id: Uuid| {
            diff.moved_files
                .iter()
                .find(|m| m.file_id == id)
                .map(|m| m.new_path.clone())
                .unwrap()
        };
        assert!(target(record_a.id).ends_with("b.cbz"));
        assert!(target(record_c.id).ends_with("a.cbz"));
    }

    #[test]
    fn test_classify_keeps_replaced_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.cbz", b"original");
        let c = write(dir.path(), "c.cbz", b"copy source");
        let info = FsFileInfoProvider::default();
        let library_id = Uuid::new_v4();

        let mut records = Vec::new();
        for mut file in discover(dir.path(), &["cbz".to_string()].into(), &info).unwrap().files {
            file.hash = Some(info.hash(&file.path).unwrap());
            records.push(record_for(library_id, &file));
        }

        // c copied over a: a's record stays, so c cannot move onto it
        fs::copy(&c, &a).unwrap();

        let discovery = discover(dir.path(), &["cbz".to_string()].into(), &info).unwrap();
        let diff = classify(&records, discovery, &info);

        assert!(diff.moved_files.is_empty());
        assert_eq!(diff.changed_files.len(), 1);
        assert_eq!(diff.changed_files[0].file_id, records[0].id);
        assert_eq!(diff.unchanged_count, 1);
    }
}
