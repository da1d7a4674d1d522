use chrono::NaiveDate;
use std::sync::Arc;

use crate::models::internal::{
    ConversationId, DayKey, SummaryArtifact, SummaryKey, SummaryOptions,
};
use crate::services::clock::Clock;
use crate::storage::blob_store::{BlobStore, StorageError};

pub const SUMMARIES_NAMESPACE: &str = "summaries";

/// Summary artifacts keyed by (conversation, date). Saving the same key again
/// replaces the previous artifact.
pub struct SummaryArchive {
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    options: SummaryOptions,
}

impl SummaryArchive {
    pub fn new(blobs: Arc<dyn BlobStore>, clock: Arc<dyn Clock>, options: SummaryOptions) -> Self {
        Self {
            blobs,
            clock,
            options,
        }
    }

    pub async fn save(
        &self,
        conversation_id: ConversationId,
        date: NaiveDate,
        text: &str,
        message_count: usize,
    ) -> Result<SummaryArtifact, StorageError> {
        let key = SummaryKey(DayKey::new(conversation_id, date));
        let storage_key = key.storage_key();
        if SummaryKey::parse(&storage_key) != Some(key) {
            return Err(StorageError::InvalidKey(storage_key));
        }

        let artifact = SummaryArtifact {
            conversation_id,
            date,
            generated_at: self.clock.now(),
            message_count,
            summary: text.to_string(),
            options: self.options.clone(),
        };

        let bytes = serde_json::to_vec_pretty(&artifact)?;
        self.blobs
            .put(SUMMARIES_NAMESPACE, &storage_key, &bytes)
            .await?;

        tracing::info!("Saved summary for {} ({} messages)", key.0, message_count);
        Ok(artifact)
    }

    pub async fn get(
        &self,
        conversation_id: ConversationId,
        date: NaiveDate,
    ) -> Result<Option<SummaryArtifact>, StorageError> {
        let key = SummaryKey(DayKey::new(conversation_id, date)).storage_key();
        match self.blobs.get(SUMMARIES_NAMESPACE, &key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Most recent artifacts first, at most `limit`. Corrupt entries are
    /// skipped.
    pub async fn history(
        &self,
        conversation_id: ConversationId,
        limit: usize,
    ) -> Result<Vec<SummaryArtifact>, StorageError> {
        let keys = self
            .blobs
            .keys(
                SUMMARIES_NAMESPACE,
                &SummaryKey::conversation_prefix(conversation_id),
            )
            .await?;

        let mut artifacts = Vec::with_capacity(keys.len());
        for key in keys {
            if SummaryKey::parse(&key).is_none() {
                continue;
            }
            let bytes = match self.blobs.get(SUMMARIES_NAMESPACE, &key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Skipping unreadable summary {}: {}", key, e);
                    continue;
                }
            };
            match serde_json::from_slice::<SummaryArtifact>(&bytes) {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => tracing::warn!("Skipping corrupt summary {}: {}", key, e),
            }
        }

        artifacts.sort_by(|a, b| b.date.cmp(&a.date));
        artifacts.truncate(limit);
        Ok(artifacts)
    }

    /// Number of stored artifacts across all conversations.
    pub async fn count(&self) -> Result<usize, StorageError> {
        Ok(self
            .blobs
            .keys(SUMMARIES_NAMESPACE, SummaryKey::all_prefix())
            .await?
            .iter()
            .filter(|k| SummaryKey::parse(k).is_some())
            .count())
    }
}
