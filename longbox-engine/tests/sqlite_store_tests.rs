//! SqliteStore against a temp-file database

mod helpers;

use std::sync::Arc;
use tempfile::TempDir;

use helpers::{reconcile, register, LibraryTree};
use longbox_engine::models::{
    FileMetadata, FileRecord, FileStatus, FileUpdate, Library, NewSeries, ScannedFile, SeriesUpdate,
};
use longbox_engine::store::{FileFilter, SqliteStore, Store, StoreError};

async fn open_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("db/longbox.db")).await.unwrap();
    (dir, store)
}

fn scanned(library_root: &str, relative: &str) -> ScannedFile {
    ScannedFile {
        path: format!("{}/{}", library_root, relative).into(),
        relative_path: relative.to_string(),
        filename: relative.rsplit('/').next().unwrap().to_string(),
        extension: "cbz".to_string(),
        size: 42,
        modified_at: chrono::Utc::now(),
        hash: Some(format!("hash-{}", relative)),
        metadata: None,
    }
}

#[tokio::test]
async fn test_duplicate_series_identity_is_unique_violation() {
    let (_dir, store) = open_store().await;
    let seed = NewSeries {
        name: "Batman".into(),
        publisher: Some("DC Comics".into()),
        ..Default::default()
    };
    store.create_series(&seed).await.unwrap();

    // Same identity once normalised
    let err = store
        .create_series(&NewSeries {
            name: "  batman ".into(),
            publisher: Some("DC".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.is_unique_violation());
}

#[tokio::test]
async fn test_find_series_by_identity() {
    let (_dir, store) = open_store().await;
    let created = store
        .create_series(&NewSeries {
            name: "Detective Comics".into(),
            publisher: Some("DC Comics".into()),
            aliases: vec!["Detective".into()],
            ..Default::default()
        })
        .await
        .unwrap();

    let by_name = store.find_series_by_identity("detective comics", Some("DC")).await.unwrap();
    assert_eq!(by_name.map(|s| s.id), Some(created.id));

    let any_publisher = store.find_series_by_identity("Detective Comics", None).await.unwrap();
    assert_eq!(any_publisher.map(|s| s.id), Some(created.id));

    let by_alias = store.find_series_by_identity("Detective", Some("DC Comics")).await.unwrap();
    assert_eq!(by_alias.map(|s| s.id), Some(created.id));

    assert!(store.find_series_by_identity("Detective Comics", Some("Marvel")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_files_page_by_path_and_link() {
    let (_dir, store) = open_store().await;
    let library = Library::new("Comics", "/comics");
    store.create_library(&library).await.unwrap();
    assert_eq!(
        store.find_library_by_root("/comics").await.unwrap().map(|l| l.id),
        Some(library.id)
    );

    let mut ids = Vec::new();
    for n in 1..=5 {
        let record = FileRecord::from_scanned(library.id, &scanned("/comics", &format!("Saga/Saga {:03}.cbz", n)));
        store.create_file(&record).await.unwrap();
        ids.push(record.id);
    }

    let first = store
        .list_files(library.id, &FileFilter::unlinked().limit(2))
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    let rest = store
        .list_files(library.id, &FileFilter::unlinked().after(Some(first[1].path.clone())))
        .await
        .unwrap();
    assert_eq!(rest.len(), 3);
    assert!(rest[0].path > first[1].path);

    let series = store
        .create_series(&NewSeries {
            name: "Saga".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    store.update_file(ids[0], &FileUpdate::link(series.id)).await.unwrap();
    store.update_file(ids[1], &FileUpdate::status(FileStatus::Orphaned)).await.unwrap();
    store.recalculate_series_progress(series.id).await.unwrap();

    assert_eq!(store.count_pending(library.id).await.unwrap(), 3);
    let refreshed = store.list_series().await.unwrap();
    assert_eq!(refreshed[0].file_count, 1);

    let linked = store.list_files(library.id, &FileFilter::all()).await.unwrap();
    let first_file = linked.iter().find(|f| f.id == ids[0]).unwrap();
    assert_eq!(first_file.series_id, Some(series.id));
    assert_eq!(first_file.status, FileStatus::Indexed);
}

#[tokio::test]
async fn test_update_series_changes_identity() {
    let (_dir, store) = open_store().await;
    let series = store
        .create_series(&NewSeries {
            name: "Saga".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let updated = store
        .update_series(
            series.id,
            &SeriesUpdate {
                publisher: Some("Image Comics".into()),
                aliases: Some(vec!["Saga (2012)".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.publisher.as_deref(), Some("Image Comics"));

    let found = store.find_series_by_identity("Saga (2012)", Some("Image")).await.unwrap();
    assert_eq!(found.map(|s| s.id), Some(series.id));
}

#[tokio::test]
async fn test_reconcile_against_sqlite() {
    let (_dir, store) = open_store().await;
    let store = Arc::new(store);
    let tree = LibraryTree::new();
    tree.comic("Batman/Batman 001.cbz", "b1");
    tree.comic("Batman/Batman 002.cbz", "b2");

    let library = register(store.as_ref(), &tree).await;
    let summary = reconcile(store.clone(), &library).await;
    assert_eq!(summary.new_files(), 2);
    assert_eq!(summary.series_created(), 1);
    assert_eq!(summary.files_linked(), 2);
    assert_eq!(summary.errors(), 0);

    let again = reconcile(store.clone(), &library).await;
    assert_eq!(again.scan.unchanged, 2);
    assert_eq!(again.series_created(), 0);
}

#[tokio::test]
async fn test_file_update_keeps_or_replaces_metadata() {
    let (_dir, store) = open_store().await;
    let library = Library::new("Comics", "/comics");
    store.create_library(&library).await.unwrap();

    let mut file = scanned("/comics", "Saga/Saga 001.cbz");
    file.metadata = Some(FileMetadata {
        publisher: Some("Image".into()),
        ..Default::default()
    });
    let record = FileRecord::from_scanned(library.id, &file);
    store.create_file(&record).await.unwrap();

    store.update_file(record.id, &FileUpdate::status(FileStatus::Indexed)).await.unwrap();
    let kept = &store.list_files(library.id, &FileFilter::all()).await.unwrap()[0];
    assert_eq!(kept.metadata.as_ref().unwrap().publisher.as_deref(), Some("Image"));

    let update = FileUpdate {
        metadata: Some(FileMetadata {
            publisher: Some("Image Comics".into()),
            year: Some(2012),
            ..Default::default()
        }),
        ..Default::default()
    };
    store.update_file(record.id, &update).await.unwrap();
    let replaced = &store.list_files(library.id, &FileFilter::all()).await.unwrap()[0];
    assert_eq!(replaced.metadata.as_ref().unwrap().publisher.as_deref(), Some("Image Comics"));
    assert_eq!(replaced.metadata.as_ref().unwrap().year, Some(2012));
}

#[tokio::test]
async fn test_corrupt_column_names_the_column() {
    let (dir, store) = open_store().await;
    let library = Library::new("Comics", "/comics");
    store.create_library(&library).await.unwrap();
    let record = FileRecord::from_scanned(library.id, &scanned("/comics", "Saga/Saga 001.cbz"));
    store.create_file(&record).await.unwrap();

    let url = format!("sqlite://{}", dir.path().join("db/longbox.db").display());
    let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
    sqlx::query("UPDATE files SET modified_at = 'yesterday' WHERE id = ?")
        .bind(record.id.to_string())
        .execute(&pool)
        .await
        .unwrap();

    let err = store.list_files(library.id, &FileFilter::all()).await.unwrap_err();
    assert!(matches!(&err, StoreError::Backend(msg) if msg.contains("modified_at") && msg.contains("yesterday")));
}
