//! File linking (parallel phase)
//!
//! Runs after series resolution, when every series a pending file needs
//! already exists. The series map is built once; after that the only writes
//! are independent per-file updates, so they run on a bounded pool.

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ReconcileError, ReconcileResult};
use crate::models::{fold_name, FileRecord, FileUpdate, Series, SeriesIdentityKey};
use crate::providers::SeriesOverrideProvider;
use crate::services::series_naming::{FolderDefinitions, SeriesTarget};
use crate::store::{FileFilter, Store};
use crate::workflow::control::ReconcileControl;
use longbox_common::events::ReconcilePhase;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkResult {
    pub linked: usize,
    /// Files with no matching series; left pending
    pub unresolved: usize,
    pub errors: usize,
    pub cancelled: bool,
    /// Series whose progress was recalculated
    pub affected_series: Vec<Uuid>,
}

/// Identity key and name-only lookups over every series
#[derive(Debug, Default)]
pub struct SeriesLookup {
    by_key: HashMap<SeriesIdentityKey, Uuid>,
    by_name: HashMap<String, Uuid>,
}

impl SeriesLookup {
    /// Oldest series wins when two share a key
    pub fn build(series: &[Series]) -> Self {
        let mut ordered: Vec<&Series> = series.iter().collect();
        ordered.sort_by_key(|s| s.created_at);

        let mut lookup = Self::default();
        for s in ordered {
            for key in s.all_identity_keys() {
                lookup.by_key.entry(key).or_insert(s.id);
            }
            for name in std::iter::once(&s.name).chain(s.aliases.iter()) {
                lookup.by_name.entry(fold_name(name)).or_insert(s.id);
            }
        }
        lookup
    }

    /// Exact key first, then the name alone
    pub fn resolve(&self, target: &SeriesTarget) -> Option<Uuid> {
        self.by_key
            .get(&target.identity_key())
            .or_else(|| self.by_name.get(&fold_name(&target.name)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

enum LinkOutcome {
    Linked(Uuid),
    Unresolved,
    Failed,
}

pub struct FileLinker {
    store: Arc<dyn Store>,
    overrides: Arc<dyn SeriesOverrideProvider>,
    batch_size: usize,
    concurrency: usize,
}

impl FileLinker {
    pub fn new(store: Arc<dyn Store>, overrides: Arc<dyn SeriesOverrideProvider>) -> Self {
        Self {
            store,
            overrides,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Link every unlinked file of the library to its series
    pub async fn link_files_to_series(
        &self,
        library_id: Uuid,
        control: &ReconcileControl,
    ) -> ReconcileResult<LinkResult> {
        if self.store.find_library(library_id).await?.is_none() {
            return Err(ReconcileError::LibraryNotFound(library_id));
        }

        let lookup = SeriesLookup::build(&self.store.list_series().await?);
        let total = self.store.count_pending(library_id).await?;
        let mut folders = FolderDefinitions::new(Arc::clone(&self.overrides));
        let mut result = LinkResult::default();
        let mut affected: HashSet<Uuid> = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut processed = 0usize;

        info!(library_id = %library_id, pending = total, series = lookup.len(), "Linking files");

        loop {
            if control.should_cancel() {
                info!(library_id = %library_id, processed, "File linking cancelled");
                result.cancelled = true;
                break;
            }

            let filter = FileFilter::unlinked().after(cursor.clone()).limit(self.batch_size);
            let batch = self.store.list_files(library_id, &filter).await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.path.clone());

            // Read-only planning happens here so the pool only writes
            let mut planned = Vec::with_capacity(batch.len());
            for file in batch {
                let folder = file.folder().to_string();
                if let Err(e) = folders.load(&folder).await {
                    warn!(folder = %folder, error = %e, "Unreadable series definition");
                }
                let series_id = folders.target(&file).and_then(|t| lookup.resolve(&t));
                planned.push((file, series_id));
            }

            let batch_len = planned.len();
            let outcomes: Vec<LinkOutcome> = stream::iter(planned)
                .map(|(file, series_id)| self.link_one(file, series_id))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    LinkOutcome::Linked(series_id) => {
                        result.linked += 1;
                        affected.insert(series_id);
                    }
                    LinkOutcome::Unresolved => result.unresolved += 1,
                    LinkOutcome::Failed => result.errors += 1,
                }
            }

            processed += batch_len;
            control.report(ReconcilePhase::Linking, processed, total);

            if batch_len < self.batch_size {
                break;
            }
        }

        // One recalculation per series, not per file
        let mut affected: Vec<Uuid> = affected.into_iter().collect();
        affected.sort();
        for series_id in &affected {
            if let Err(e) = self.store.recalculate_series_progress(*series_id).await {
                warn!(series_id = %series_id, error = %e, "Progress recalculation failed");
                result.errors += 1;
            }
        }
        result.affected_series = affected;

        info!(
            library_id = %library_id,
            linked = result.linked,
            unresolved = result.unresolved,
            errors = result.errors,
            cancelled = result.cancelled,
            "File linking complete"
        );
        Ok(result)
    }

    async fn link_one(&self, file: FileRecord, series_id: Option<Uuid>) -> LinkOutcome {
        let Some(series_id) = series_id else {
            debug!(path = %file.path, "No series for file");
            return LinkOutcome::Unresolved;
        };

        match self.store.update_file(file.id, &FileUpdate::link(series_id)).await {
            Ok(()) => LinkOutcome::Linked(series_id),
            Err(e) => {
                warn!(path = %file.path, error = %e, "Failed to link file");
                LinkOutcome::Failed
            }
        }
    }
}
