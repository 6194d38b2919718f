//! Persist a scan diff into the file registry

use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::control::ReconcileControl;
use crate::models::{FileRecord, FileStatus, FileUpdate, ScanDiff};
use crate::store::{FileFilter, Store, StoreResult};
use longbox_common::events::ReconcilePhase;

/// Items between cancellation checks and progress reports
const APPLY_BATCH: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyResult {
    pub created: usize,
    pub moved: usize,
    pub orphaned: usize,
    pub updated: usize,
    pub restored: usize,
    pub errors: usize,
    pub cancelled: bool,
}

enum Change {
    Create(FileRecord),
    Update {
        id: Uuid,
        update: FileUpdate,
        kind: Kind,
        /// Series whose progress the change affects
        series_id: Option<Uuid>,
    },
}

#[derive(Clone, Copy)]
enum Kind {
    /// Temporary path while another record takes this one's
    Parked,
    Moved,
    Orphaned,
    Changed,
    Restored,
}

/// Create new records as pending, rewrite moved paths, mark orphans,
/// refresh changed stats and revive restored records
///
/// Series that lost or regained a file get their progress recalculated once.
pub async fn apply_scan_diff(
    store: &dyn Store,
    library_id: Uuid,
    diff: &ScanDiff,
    control: &ReconcileControl,
) -> StoreResult<ApplyResult> {
    let changes = plan(store, library_id, diff).await?;
    let total = changes.len();
    let mut result = ApplyResult::default();
    let mut affected: BTreeSet<Uuid> = BTreeSet::new();

    for (index, change) in changes.into_iter().enumerate() {
        if index % APPLY_BATCH == 0 && index > 0 {
            control.report(ReconcilePhase::Applying, index, total);
            if control.should_cancel() {
                info!(library_id = %library_id, applied = index, "Applying scan diff cancelled");
                result.cancelled = true;
                break;
            }
        }

        match change {
            Change::Create(record) => match store.create_file(&record).await {
                Ok(()) => result.created += 1,
                Err(e) if e.is_unique_violation() => {
                    debug!(path = %record.path, "File already registered");
                }
                Err(e) => {
                    warn!(path = %record.path, error = %e, "Failed to register file");
                    result.errors += 1;
                }
            },
            Change::Update {
                id,
                update,
                kind,
                series_id,
            } => match store.update_file(id, &update).await {
                Ok(()) => {
                    match kind {
                        Kind::Parked => {}
                        Kind::Moved => result.moved += 1,
                        Kind::Orphaned => result.orphaned += 1,
                        Kind::Changed => result.updated += 1,
                        Kind::Restored => result.restored += 1,
                    }
                    affected.extend(series_id);
                }
                Err(e) => {
                    warn!(file_id = %id, error = %e, "Failed to update file record");
                    result.errors += 1;
                }
            },
        }
    }

    for series_id in affected {
        if let Err(e) = store.recalculate_series_progress(series_id).await {
            warn!(series_id = %series_id, error = %e, "Progress recalculation failed");
            result.errors += 1;
        }
    }

    if !result.cancelled {
        control.report(ReconcilePhase::Applying, total, total);
    }
    Ok(result)
}

async fn plan(store: &dyn Store, library_id: Uuid, diff: &ScanDiff) -> StoreResult<Vec<Change>> {
    let mut changes = Vec::new();

    // Paths are unique per library, so a record sitting on another move's
    // target steps aside before any move lands
    let targets: HashSet<&str> = diff.moved_files.iter().map(|m| m.new_path.as_str()).collect();
    for moved in diff.moved_files.iter().filter(|m| targets.contains(m.old_path.as_str())) {
        changes.push(Change::Update {
            id: moved.file_id,
            update: FileUpdate {
                path: Some(format!("{}#moving-{}", moved.old_path, moved.file_id)),
                ..Default::default()
            },
            kind: Kind::Parked,
            series_id: None,
        });
    }

    for moved in &diff.moved_files {
        let file = &moved.file;
        changes.push(Change::Update {
            id: moved.file_id,
            update: FileUpdate {
                path: Some(moved.new_path.clone()),
                relative_path: Some(file.relative_path.clone()),
                filename: Some(file.filename.clone()),
                size: Some(file.size),
                modified_at: Some(file.modified_at),
                hash: file.hash.clone(),
                metadata: file.metadata.clone(),
                ..Default::default()
            },
            kind: Kind::Moved,
            series_id: None,
        });
    }

    // New files may take a path a moved record just left
    for file in &diff.new_files {
        changes.push(Change::Create(FileRecord::from_scanned(library_id, file)));
    }

    // Series links of records losing or regaining their file
    let linked: HashMap<Uuid, Option<Uuid>> = if diff.orphaned_files.is_empty() && diff.restored_files.is_empty() {
        HashMap::new()
    } else {
        store
            .list_files(library_id, &FileFilter::all())
            .await?
            .into_iter()
            .map(|r| (r.id, r.series_id))
            .collect()
    };
    let series_of = |id: &Uuid| linked.get(id).copied().flatten();

    for orphan in &diff.orphaned_files {
        changes.push(Change::Update {
            id: orphan.file_id,
            update: FileUpdate::status(FileStatus::Orphaned),
            kind: Kind::Orphaned,
            series_id: series_of(&orphan.file_id),
        });
    }

    for changed in &diff.changed_files {
        changes.push(Change::Update {
            id: changed.file_id,
            update: FileUpdate {
                size: Some(changed.file.size),
                modified_at: Some(changed.file.modified_at),
                hash: changed.file.hash.clone(),
                metadata: changed.file.metadata.clone(),
                ..Default::default()
            },
            kind: Kind::Changed,
            series_id: None,
        });
    }

    // Linked records come back as indexed, the rest wait for the linker
    for id in &diff.restored_files {
        let series_id = series_of(id);
        let status = if series_id.is_some() {
            FileStatus::Indexed
        } else {
            FileStatus::Pending
        };
        changes.push(Change::Update {
            id: *id,
            update: FileUpdate::status(status),
            kind: Kind::Restored,
            series_id,
        });
    }

    Ok(changes)
}
