//! Shared integration test utilities
//!
//! Temporary library trees on disk and an engine wired to the in-memory store.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use longbox_engine::models::Library;
use longbox_engine::providers::{FsFileInfoProvider, JsonSeriesOverrideProvider};
use longbox_engine::store::{MemoryStore, Store};
use longbox_engine::workflow::{ReconcileControl, ReconcileOrchestrator, ReconcileSummary};

/// Library folder in a temp dir; removed on drop
pub struct LibraryTree {
    dir: TempDir,
}

impl LibraryTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    /// Write a comic file; the content doubles as its fingerprint
    pub fn comic(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create folder");
        }
        std::fs::write(&path, content).expect("write comic");
        path
    }

    /// Write `series.json` into `folder`
    pub fn definition(&self, folder: &str, json: &str) {
        let dir = self.path(folder);
        std::fs::create_dir_all(&dir).expect("create folder");
        std::fs::write(dir.join("series.json"), json).expect("write series.json");
    }

    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.path(relative)).expect("remove comic");
    }

    pub fn rename(&self, from: &str, to: &str) {
        let target = self.path(to);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).expect("create folder");
        }
        std::fs::rename(self.path(from), target).expect("rename");
    }

    pub fn library(&self) -> Library {
        Library::new("Comics", self.root().to_string_lossy())
    }
}

/// Register the tree's library in `store`
pub async fn register(store: &dyn Store, tree: &LibraryTree) -> Library {
    let library = tree.library();
    store.create_library(&library).await.expect("create library");
    library
}

pub fn orchestrator(store: Arc<dyn Store>) -> ReconcileOrchestrator {
    ReconcileOrchestrator::new(
        store,
        Arc::new(FsFileInfoProvider::default()),
        Arc::new(JsonSeriesOverrideProvider::new()),
    )
}

/// One full pass with no cancellation
pub async fn reconcile(store: Arc<dyn Store>, library: &Library) -> ReconcileSummary {
    orchestrator(store)
        .run(library.id, ReconcileControl::new())
        .await
        .expect("reconcile")
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}
