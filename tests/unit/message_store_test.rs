use super::message;
use chat_digest::models::internal::{DayKey, PartitionKey};
use chat_digest::storage::{BlobStore, FsBlobStore, MemoryBlobStore, MessageStore, StorageError};
use chrono::NaiveDate;
use std::sync::Arc;
use tempfile::TempDir;

fn day(conversation_id: i64, raw: &str) -> DayKey {
    DayKey::new(
        conversation_id,
        NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap(),
    )
}

#[tokio::test]
async fn test_append_creates_slice_zero() {
    let dir = TempDir::new().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
    let store = MessageStore::new(blobs, 100);

    let key = store
        .append(&message(-100, 1, "2024-01-01 10:00:00", "hello"))
        .await
        .unwrap();

    assert_eq!(key.slice, 0);
    assert_eq!(key.storage_key(), "chat_-100_20240101");
    assert!(dir
        .path()
        .join("messages")
        .join("chat_-100_20240101.json")
        .is_file());
}

#[tokio::test]
async fn test_append_partitions_by_message_date() {
    let dir = TempDir::new().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
    let store = MessageStore::new(blobs, 100);

    store
        .append(&message(1, 1, "2024-01-01 23:59:59", "late"))
        .await
        .unwrap();
    let key = store
        .append(&message(1, 2, "2024-01-02 00:00:00", "early"))
        .await
        .unwrap();

    assert_eq!(key.day, day(1, "2024-01-02"));
    assert_eq!(store.partitions_for(&day(1, "2024-01-01")).await.unwrap().len(), 1);
    assert_eq!(store.partitions_for(&day(1, "2024-01-02")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_full_partition_rolls_to_next_slice() {
    let dir = TempDir::new().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
    let store = MessageStore::new(blobs, 2);

    let mut keys = Vec::new();
    for i in 0..5 {
        let ts = format!("2024-01-01 10:00:0{}", i);
        keys.push(store.append(&message(1, i, &ts, "m")).await.unwrap());
    }

    let slices: Vec<u32> = keys.iter().map(|k| k.slice).collect();
    assert_eq!(slices, vec![0, 0, 1, 1, 2]);

    let partitions = store.partitions_for(&day(1, "2024-01-01")).await.unwrap();
    assert_eq!(
        partitions.iter().map(PartitionKey::storage_key).collect::<Vec<_>>(),
        vec!["chat_1_20240101", "chat_1_20240101_001", "chat_1_20240101_002"]
    );
}

#[tokio::test]
async fn test_corrupt_latest_slice_is_left_untouched() {
    let dir = TempDir::new().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
    blobs
        .put("messages", "chat_1_20240101", b"{not json")
        .await
        .unwrap();
    let store = MessageStore::new(blobs.clone(), 100);

    let key = store
        .append(&message(1, 1, "2024-01-01 12:00:00", "after corruption"))
        .await
        .unwrap();

    assert_eq!(key.slice, 1);
    let corrupt = blobs.get("messages", "chat_1_20240101").await.unwrap();
    assert_eq!(corrupt.as_deref(), Some(&b"{not json"[..]));
}

#[tokio::test]
async fn test_conversations_on_date() {
    let dir = TempDir::new().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(dir.path()));
    let store = MessageStore::new(blobs, 100);

    for (id, ts) in [
        (3, "2024-01-01 09:00:00"),
        (-5, "2024-01-01 10:00:00"),
        (3, "2024-01-01 11:00:00"),
        (7, "2024-01-02 09:00:00"),
    ] {
        store.append(&message(id, 1, ts, "x")).await.unwrap();
    }

    let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    assert_eq!(store.conversations_on(date).await.unwrap(), vec![-5, 3]);
}

#[tokio::test]
async fn test_append_rejects_dates_outside_key_range() {
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
    let store = MessageStore::new(blobs.clone(), 100);

    let mut far_future = message(1, 1, "2024-01-01 10:00:00", "first");
    far_future.timestamp = NaiveDate::from_ymd_opt(10000, 1, 1)
        .unwrap()
        .and_hms_opt(10, 0, 0)
        .unwrap();

    for _ in 0..2 {
        let result = store.append(&far_future).await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
    assert!(blobs.keys("messages", "").await.unwrap().is_empty());

    // Ordinary days are unaffected.
    let key = store
        .append(&message(1, 2, "9999-12-31 23:59:59", "last day"))
        .await
        .unwrap();
    assert_eq!(key.storage_key(), "chat_1_99991231");
    assert_eq!(store.partitions_for(&key.day).await.unwrap(), vec![key]);
}
