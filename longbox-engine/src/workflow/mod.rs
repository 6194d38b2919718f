//! Library reconcile workflow
//!
//! # Phase Progression
//! SCANNING → APPLYING → RESOLVING → LINKING
//!
//! - **Scanning**: walk the library root and classify files against the registry
//! - **Applying**: persist the diff (new, moved, orphaned, changed, restored)
//! - **Resolving**: create one series per distinct identity among unlinked files
//!   (sequential, so concurrent creates cannot duplicate a series)
//! - **Linking**: attach unlinked files to their series on a bounded pool
//!
//! Cancellation is checked between phases and inside each one; a cancelled
//! pass skips the remaining phases and still emits a completion event.

pub mod apply;
pub mod control;

pub use apply::{apply_scan_diff, ApplyResult};
pub use control::{ProgressUpdate, ReconcileControl};

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::providers::{FileInfoProvider, FsFileInfoProvider, MetadataProvider, SeriesOverrideProvider};
use crate::services::file_linker::{FileLinker, LinkResult};
use crate::services::file_scanner::FileScanner;
use crate::services::series_resolver::{ResolveResult, SeriesResolver};
use crate::store::Store;
use longbox_common::events::{EventBus, LongboxEvent, ReconcilePhase};

/// Counts from the scanning phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanCounts {
    pub new_files: usize,
    pub moved: usize,
    pub orphaned: usize,
    pub changed: usize,
    pub restored: usize,
    pub unchanged: usize,
    pub errors: usize,
}

/// Outcome of one reconcile pass
#[derive(Debug, Clone, Default)]
pub struct ReconcileSummary {
    pub library_id: Uuid,
    pub scan: ScanCounts,
    pub apply: ApplyResult,
    pub resolve: ResolveResult,
    pub link: LinkResult,
    pub cancelled: bool,
    pub duration: Duration,
}

impl ReconcileSummary {
    pub fn new_files(&self) -> usize {
        self.apply.created
    }

    pub fn series_created(&self) -> usize {
        self.resolve.created
    }

    pub fn files_linked(&self) -> usize {
        self.link.linked
    }

    pub fn errors(&self) -> usize {
        self.scan.errors + self.apply.errors + self.resolve.errors + self.link.errors
    }
}

pub struct ReconcileOrchestrator {
    store: Arc<dyn Store>,
    scanner: FileScanner,
    resolver: SeriesResolver,
    linker: FileLinker,
    event_bus: Option<EventBus>,
}

impl ReconcileOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        info: Arc<dyn FileInfoProvider>,
        overrides: Arc<dyn SeriesOverrideProvider>,
    ) -> Self {
        Self {
            scanner: FileScanner::new(Arc::clone(&store), info),
            resolver: SeriesResolver::new(Arc::clone(&store), Arc::clone(&overrides)),
            linker: FileLinker::new(Arc::clone(&store), overrides),
            store,
            event_bus: None,
        }
    }

    /// Orchestrator with scanner and linker tuned from configuration
    pub fn from_config(
        store: Arc<dyn Store>,
        overrides: Arc<dyn SeriesOverrideProvider>,
        config: &EngineConfig,
    ) -> Self {
        let info: Arc<dyn FileInfoProvider> = Arc::new(FsFileInfoProvider::new(config.scanner.hash_sample_bytes));
        let mut orchestrator = Self::new(store, info, overrides);
        orchestrator.scanner = orchestrator
            .scanner
            .with_extensions(config.scanner.extensions.iter().cloned());
        orchestrator.linker = orchestrator
            .linker
            .with_batch_size(config.linker.batch_size)
            .with_concurrency(config.linker.concurrency);
        orchestrator
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataProvider>) -> Self {
        self.scanner = self.scanner.with_metadata(metadata);
        self
    }

    pub fn with_events(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Run every phase for one library
    pub async fn run(&self, library_id: Uuid, control: ReconcileControl) -> ReconcileResult<ReconcileSummary> {
        let started = Instant::now();
        if self.store.find_library(library_id).await?.is_none() {
            return Err(ReconcileError::LibraryNotFound(library_id));
        }

        let control = self.attach_progress_events(library_id, control);
        self.emit(LongboxEvent::ReconcileStarted {
            library_id,
            timestamp: Utc::now(),
        });
        info!(library_id = %library_id, "Reconcile started");

        let mut summary = ReconcileSummary {
            library_id,
            ..Default::default()
        };

        summary.cancelled = self.run_phases(library_id, &control, &mut summary).await?;
        summary.duration = started.elapsed();

        self.emit(LongboxEvent::ReconcileCompleted {
            library_id,
            new_files: summary.new_files(),
            series_created: summary.series_created(),
            files_linked: summary.files_linked(),
            errors: summary.errors(),
            cancelled: summary.cancelled,
            timestamp: Utc::now(),
        });
        info!(
            library_id = %library_id,
            new_files = summary.new_files(),
            series_created = summary.series_created(),
            files_linked = summary.files_linked(),
            errors = summary.errors(),
            cancelled = summary.cancelled,
            duration_ms = summary.duration.as_millis() as u64,
            "Reconcile complete"
        );
        Ok(summary)
    }

    /// Returns true if the pass was cancelled
    async fn run_phases(
        &self,
        library_id: Uuid,
        control: &ReconcileControl,
        summary: &mut ReconcileSummary,
    ) -> ReconcileResult<bool> {
        // Scanning
        if control.should_cancel() {
            return Ok(true);
        }
        control.report(ReconcilePhase::Scanning, 0, 0);
        let diff = self.scanner.scan_library(library_id).await?;
        summary.scan = ScanCounts {
            new_files: diff.new_files.len(),
            moved: diff.moved_files.len(),
            orphaned: diff.orphaned_files.len(),
            changed: diff.changed_files.len(),
            restored: diff.restored_files.len(),
            unchanged: diff.unchanged_count,
            errors: diff.errors.len(),
        };
        for issue in &diff.errors {
            warn!(path = %issue.path, error = %issue.message, "Scan issue");
        }
        let discovered = diff.new_files.len() + diff.unchanged_count + diff.changed_files.len();
        control.report(ReconcilePhase::Scanning, discovered, discovered);

        // Applying
        if control.should_cancel() {
            return Ok(true);
        }
        summary.apply = apply_scan_diff(self.store.as_ref(), library_id, &diff, control).await?;
        if summary.apply.cancelled {
            return Ok(true);
        }

        // Resolving
        if control.should_cancel() {
            return Ok(true);
        }
        summary.resolve = self.resolver.create_series_from_files(library_id, control).await?;
        for series in &summary.resolve.created_series {
            self.emit(LongboxEvent::SeriesCreated {
                library_id,
                series_id: series.id,
                name: series.name.clone(),
                timestamp: Utc::now(),
            });
        }
        if summary.resolve.cancelled {
            return Ok(true);
        }

        // Linking
        if control.should_cancel() {
            return Ok(true);
        }
        summary.link = self.linker.link_files_to_series(library_id, control).await?;
        Ok(summary.link.cancelled)
    }

    fn attach_progress_events(&self, library_id: Uuid, control: ReconcileControl) -> ReconcileControl {
        match &self.event_bus {
            Some(bus) => {
                let bus = bus.clone();
                control.with_progress(move |update| {
                    bus.emit_lossy(LongboxEvent::ReconcileProgress {
                        library_id,
                        phase: update.phase,
                        processed: update.processed,
                        total: update.total,
                        timestamp: Utc::now(),
                    });
                })
            }
            None => control,
        }
    }

    fn emit(&self, event: LongboxEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}
