//! SQLite record store contract tests, including concurrent claims against a
//! file-backed database.

#![cfg(feature = "sqlite")]

use std::collections::HashSet;
use std::sync::Arc;

use courier::*;
use courier_testkit::{document, photo, seed_photos};
use tempfile::TempDir;

async fn file_store(dir: &TempDir, kind: ItemKind) -> SqliteRecordStore {
    let path = dir.path().join("queue.db");
    let config = SqliteStoreConfig::new(format!("sqlite://{}", path.display()));
    SqliteRecordStore::open(&config, kind)
        .await
        .expect("open file store")
}

#[tokio::test]
async fn test_claim_marks_rows_uploading() {
    let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
        .await
        .unwrap();
    seed_photos(&store, 7).await.unwrap();

    let first = store.reserve_pending(5, 5).await.unwrap();
    assert_eq!(first.len(), 5);
    assert!(first.iter().all(|i| i.status == ItemStatus::Uploading));

    let second = store.reserve_pending(5, 5).await.unwrap();
    assert_eq!(second.len(), 2);
    assert!(store.reserve_pending(5, 5).await.unwrap().is_empty());

    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.uploading, 7);
    assert_eq!(counts.pending, 0);
}

#[tokio::test]
async fn test_failed_rows_claimable_until_budget_spent() {
    let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
        .await
        .unwrap();
    let ids = seed_photos(&store, 1).await.unwrap();
    let id = ids[0];

    store.reserve_pending(1, 3).await.unwrap();
    assert_eq!(store.increment_retry_capped(id, 3).await.unwrap(), 1);
    store.mark_failed(id).await.unwrap();

    let claimed = store.reserve_pending(1, 3).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].retries, 1);

    assert_eq!(store.increment_retry_capped(id, 3).await.unwrap(), 2);
    assert_eq!(store.increment_retry_capped(id, 3).await.unwrap(), 3);
    assert_eq!(store.increment_retry_capped(id, 3).await.unwrap(), 3);
    store.mark_failed(id).await.unwrap();
    assert!(store.reserve_pending(1, 3).await.unwrap().is_empty());

    assert_eq!(store.reset_failed().await.unwrap(), 1);
    let item = store.get(id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert_eq!(item.retries, 0);
}

#[tokio::test]
async fn test_uploaded_rows_keep_server_id() {
    let store = SqliteRecordStore::open_in_memory(ItemKind::File)
        .await
        .unwrap();
    let id = store.insert(document("report.pdf", 10)).await.unwrap();
    store.reserve_pending(1, 5).await.unwrap();

    store.mark_uploaded(id, "srv-42").await.unwrap();
    // Same id again is idempotent; a different one is refused.
    store.mark_uploaded(id, "srv-42").await.unwrap();
    assert!(store.mark_uploaded(id, "srv-99").await.is_err());

    let item = store.get(id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Uploaded);
    assert_eq!(item.server_id.as_deref(), Some("srv-42"));
    assert!(store.reserve_pending(5, 5).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_payload_and_metadata_survive_round_trip() {
    let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
        .await
        .unwrap();
    let new = photo("IMG_0042.jpg", 1_234).with_owner(7, "river");
    let id = store.insert(new.clone()).await.unwrap();

    let item = store.get(id).await.unwrap().unwrap();
    assert_eq!(item, new.into_item(id, ItemKind::Asset));

    let by_owner = store.list_by_owner(7).await.unwrap();
    assert_eq!(by_owner.len(), 1);
    assert!(store.list_by_owner(8).await.unwrap().is_empty());

    let files = store.with_kind(ItemKind::File);
    let doc = files.insert(document("scan.pdf", 5)).await.unwrap();
    let item = files.get(doc).await.unwrap().unwrap();
    assert!(matches!(item.payload, Payload::Path { .. }));
    assert_eq!(item.file_size_bytes, Some(2_048));
    assert!(store.get(doc).await.unwrap().is_none());
}

#[tokio::test]
async fn test_requeue_interrupted_returns_claims() {
    let store = SqliteRecordStore::open_in_memory(ItemKind::Asset)
        .await
        .unwrap();
    seed_photos(&store, 3).await.unwrap();
    store.reserve_pending(2, 5).await.unwrap();

    assert_eq!(store.count_pending().await.unwrap(), 1);
    assert_eq!(store.requeue_interrupted().await.unwrap(), 2);
    assert_eq!(store.count_pending().await.unwrap(), 3);
}

#[tokio::test]
async fn test_rows_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let ids = {
        let store = file_store(&dir, ItemKind::Asset).await;
        let ids = seed_photos(&store, 2).await.unwrap();
        store.reserve_pending(1, 5).await.unwrap();
        store.pool().close().await;
        ids
    };

    let store = file_store(&dir, ItemKind::Asset).await;
    let counts = store.status_counts().await.unwrap();
    assert_eq!(counts.total(), 2);
    assert_eq!(counts.uploading, 1);

    assert_eq!(store.requeue_interrupted().await.unwrap(), 1);
    let claimed = store.reserve_pending(5, 5).await.unwrap();
    let claimed: Vec<ItemId> = claimed.iter().map(|i| i.id).collect();
    assert_eq!(claimed, ids);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_never_overlap() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(file_store(&dir, ItemKind::Asset).await);
    let seeded: HashSet<ItemId> =
        seed_photos(&*store, 60).await.unwrap().into_iter().collect();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = store.reserve_pending(5, 5).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.into_iter().map(|i| i.id));
            }
            mine
        }));
    }

    let mut claimed = Vec::new();
    for handle in futures::future::join_all(handles).await {
        claimed.extend(handle.unwrap());
    }

    let unique: HashSet<ItemId> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), unique.len(), "an item was claimed twice");
    assert_eq!(unique, seeded);
}
