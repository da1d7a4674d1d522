use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::Arc;

use crate::models::internal::{ConversationId, DayKey, Message, PartitionKey};
use crate::storage::blob_store::StorageError;
use crate::storage::message_store::MessageStore;

/// Rebuilds calendar-day and rolling-24h message sets from day partitions.
///
/// Retrieval never fails: unreadable partitions and undecodable messages are
/// logged and skipped.
pub struct WindowRetriever {
    store: Arc<MessageStore>,
}

impl WindowRetriever {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }

    /// Messages whose own timestamp falls on `date`, ascending by timestamp.
    pub async fn by_calendar_date(
        &self,
        conversation_id: ConversationId,
        date: NaiveDate,
    ) -> Vec<Message> {
        let mut messages = self
            .load_day(&DayKey::new(conversation_id, date))
            .await;
        // The partition tag can disagree with the embedded timestamp.
        messages.retain(|m| m.timestamp.date() == date && m.conversation_id == conversation_id);
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    /// Messages in the closed interval `[now - 24h, now]`, ascending.
    pub async fn by_rolling_24h(
        &self,
        conversation_id: ConversationId,
        now: NaiveDateTime,
    ) -> Vec<Message> {
        let start = now - Duration::hours(24);

        let mut dates = vec![start.date(), now.date()];
        dates.dedup();

        let mut messages = Vec::new();
        for date in dates {
            messages.extend(self.load_day(&DayKey::new(conversation_id, date)).await);
        }
        messages.retain(|m| {
            m.timestamp >= start && m.timestamp <= now && m.conversation_id == conversation_id
        });
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    /// Conversations whose message count on `date` reaches `threshold`,
    /// restricted to `allow_list` when it is non-empty.
    pub async fn active_conversations(
        &self,
        date: NaiveDate,
        threshold: usize,
        allow_list: &[ConversationId],
    ) -> Result<Vec<(ConversationId, usize)>, StorageError> {
        let mut active = Vec::new();
        for conversation_id in self.store.conversations_on(date).await? {
            if !allow_list.is_empty() && !allow_list.contains(&conversation_id) {
                continue;
            }
            let count = self.by_calendar_date(conversation_id, date).await.len();
            if count >= threshold {
                active.push((conversation_id, count));
            } else {
                tracing::debug!(
                    "Conversation {} has {} messages on {}, below threshold {}",
                    conversation_id,
                    count,
                    date,
                    threshold
                );
            }
        }
        Ok(active)
    }

    /// Every decodable message of every slice of `day`, in storage order.
    async fn load_day(&self, day: &DayKey) -> Vec<Message> {
        let partitions = match self.store.partitions_for(day).await {
            Ok(partitions) => partitions,
            Err(e) => {
                tracing::warn!("Failed to list partitions for {}: {}", day, e);
                return Vec::new();
            }
        };

        let mut messages = Vec::new();
        for key in partitions {
            messages.extend(self.load_partition(&key).await);
        }
        messages
    }

    async fn load_partition(&self, key: &PartitionKey) -> Vec<Message> {
        let bytes = match self.store.read_partition(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!("Skipping unreadable partition {}: {}", key.storage_key(), e);
                return Vec::new();
            }
        };

        let records: Vec<serde_json::Value> = match serde_json::from_slice(&bytes) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Skipping corrupt partition {}: {}", key.storage_key(), e);
                return Vec::new();
            }
        };

        records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| match serde_json::from_value::<Message>(record) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(
                        "Skipping message #{} in {}: {}",
                        index,
                        key.storage_key(),
                        e
                    );
                    None
                }
            })
            .collect()
    }
}
