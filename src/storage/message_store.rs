use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::internal::{ConversationId, DayKey, Message, PartitionKey};
use crate::storage::blob_store::{BlobStore, StorageError};

pub const MESSAGES_NAMESPACE: &str = "messages";

/// Append-only, day-partitioned message log.
pub struct MessageStore {
    blobs: Arc<dyn BlobStore>,
    max_messages_per_partition: usize,
    append_lock: Mutex<()>,
}

impl MessageStore {
    pub fn new(blobs: Arc<dyn BlobStore>, max_messages_per_partition: usize) -> Self {
        Self {
            blobs,
            max_messages_per_partition: max_messages_per_partition.max(1),
            append_lock: Mutex::new(()),
        }
    }

    /// Appends `message` to the latest slice of its timestamp's day, starting
    /// a new slice when the latest one is full. Returns the slice written.
    pub async fn append(&self, message: &Message) -> Result<PartitionKey, StorageError> {
        let _guard = self.append_lock.lock().await;
        let day = message.day_key();

        let (target, mut messages) = match self.partitions_for(&day).await?.pop() {
            None => (PartitionKey::new(day, 0), Vec::new()),
            Some(latest) => match self.load_for_append(&latest).await {
                Some(existing) if existing.len() < self.max_messages_per_partition => {
                    (latest, existing)
                }
                Some(_) => {
                    tracing::info!(
                        "Partition {} reached {} messages, starting slice {}",
                        latest.storage_key(),
                        self.max_messages_per_partition,
                        latest.slice + 1
                    );
                    (PartitionKey::new(day, latest.slice + 1), Vec::new())
                }
                // Never overwrite a slice we cannot read back.
                None => (PartitionKey::new(day, latest.slice + 1), Vec::new()),
            },
        };

        let key = target.storage_key();
        // A key that does not parse back is invisible to listing.
        if PartitionKey::parse(&key) != Some(target) {
            return Err(StorageError::InvalidKey(key));
        }

        messages.push(serde_json::to_value(message)?);
        let bytes = serde_json::to_vec_pretty(&messages)?;
        self.blobs.put(MESSAGES_NAMESPACE, &key, &bytes).await?;

        tracing::debug!("Stored message {} in {}", message.message_id, key);
        Ok(target)
    }

    /// Raw records of a slice, or `None` if it is unreadable. Records are kept
    /// as JSON values so that one undecodable message is preserved verbatim.
    async fn load_for_append(&self, key: &PartitionKey) -> Option<Vec<serde_json::Value>> {
        let bytes = match self.read_partition(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Some(Vec::new()),
            Err(e) => {
                tracing::warn!("Cannot read partition {}: {}", key.storage_key(), e);
                return None;
            }
        };
        match serde_json::from_slice::<Vec<serde_json::Value>>(&bytes) {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!(
                    "Partition {} is corrupt ({}), leaving it untouched",
                    key.storage_key(),
                    e
                );
                None
            }
        }
    }

    /// Slices of `day` in ascending slice order.
    pub async fn partitions_for(&self, day: &DayKey) -> Result<Vec<PartitionKey>, StorageError> {
        let mut keys: Vec<PartitionKey> = self
            .blobs
            .keys(MESSAGES_NAMESPACE, &PartitionKey::day_prefix(day))
            .await?
            .iter()
            .filter_map(|k| PartitionKey::parse(k))
            .filter(|k| k.day == *day)
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub async fn read_partition(&self, key: &PartitionKey) -> Result<Option<Vec<u8>>, StorageError> {
        self.blobs.get(MESSAGES_NAMESPACE, &key.storage_key()).await
    }

    /// Conversations with at least one partition tagged `date`, ascending.
    pub async fn conversations_on(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<ConversationId>, StorageError> {
        let ids: BTreeSet<ConversationId> = self
            .blobs
            .keys(MESSAGES_NAMESPACE, PartitionKey::all_prefix())
            .await?
            .iter()
            .filter_map(|k| PartitionKey::parse(k))
            .filter(|k| k.day.date == date)
            .map(|k| k.day.conversation_id)
            .collect();
        Ok(ids.into_iter().collect())
    }
}
