pub mod formatter;
pub mod leases;
pub mod scheduler;

use chrono::NaiveDate;
use std::sync::Arc;

use crate::models::internal::{ConversationId, DayKey, Message, SummaryArtifact};
use crate::services::clock::Clock;
use crate::services::summary_provider::{ProviderError, SummaryProvider};
use crate::storage::{StorageError, SummaryArchive, WindowRetriever};

pub use formatter::format_summary;
pub use leases::KeyLeases;
pub use scheduler::{BatchReport, ScheduleSettings, SchedulerStats, SummaryScheduler};

#[derive(Debug, thiserror::Error)]
pub enum SummaryError {
    #[error("Summary provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("Failed to persist summary: {0}")]
    Persistence(#[from] StorageError),
}

/// Result of one retrieve→summarize→persist attempt.
#[derive(Debug, Clone)]
pub enum SummaryOutcome {
    Generated {
        artifact: SummaryArtifact,
        title: String,
    },
    /// Fewer messages than the configured minimum; nothing was persisted.
    Skipped {
        message_count: usize,
        threshold: usize,
    },
    /// Another caller in this process is generating the same key.
    InProgress,
}

impl SummaryOutcome {
    pub fn is_generated(&self) -> bool {
        matches!(self, SummaryOutcome::Generated { .. })
    }

    pub fn artifact(&self) -> Option<&SummaryArtifact> {
        match self {
            SummaryOutcome::Generated { artifact, .. } => Some(artifact),
            _ => None,
        }
    }
}

/// Per-conversation summary work unit shared by the scheduler and manual
/// triggers.
pub struct SummaryOrchestrator {
    retriever: Arc<WindowRetriever>,
    provider: Arc<dyn SummaryProvider>,
    archive: Arc<SummaryArchive>,
    clock: Arc<dyn Clock>,
    min_messages: usize,
    leases: KeyLeases,
}

impl SummaryOrchestrator {
    pub fn new(
        retriever: Arc<WindowRetriever>,
        provider: Arc<dyn SummaryProvider>,
        archive: Arc<SummaryArchive>,
        clock: Arc<dyn Clock>,
        min_messages: usize,
    ) -> Self {
        Self {
            retriever,
            provider,
            archive,
            clock,
            min_messages,
            leases: KeyLeases::default(),
        }
    }

    /// Summarizes the calendar day `date` of one conversation.
    pub async fn summarize_date(
        &self,
        conversation_id: ConversationId,
        date: NaiveDate,
    ) -> Result<SummaryOutcome, SummaryError> {
        let key = DayKey::new(conversation_id, date);
        let Some(_lease) = self.leases.try_acquire(key) else {
            tracing::info!("Summary for {} already in progress, not starting another", key);
            return Ok(SummaryOutcome::InProgress);
        };

        let messages = self.retriever.by_calendar_date(conversation_id, date).await;
        self.summarize_and_save(key, &messages).await
    }

    /// Summarizes the 24 hours ending now; the artifact is stored under
    /// today's date.
    pub async fn summarize_last_24h(
        &self,
        conversation_id: ConversationId,
    ) -> Result<SummaryOutcome, SummaryError> {
        let now = self.clock.now();
        let key = DayKey::new(conversation_id, now.date());
        let Some(_lease) = self.leases.try_acquire(key) else {
            tracing::info!("Summary for {} already in progress, not starting another", key);
            return Ok(SummaryOutcome::InProgress);
        };

        let messages = self.retriever.by_rolling_24h(conversation_id, now).await;
        self.summarize_and_save(key, &messages).await
    }

    async fn summarize_and_save(
        &self,
        key: DayKey,
        messages: &[Message],
    ) -> Result<SummaryOutcome, SummaryError> {
        if messages.len() < self.min_messages {
            tracing::info!(
                "Not enough messages for {} ({} < {}), skipping summary",
                key,
                messages.len(),
                self.min_messages
            );
            return Ok(SummaryOutcome::Skipped {
                message_count: messages.len(),
                threshold: self.min_messages,
            });
        }

        let title = conversation_title(key.conversation_id, messages);
        let summary = self.provider.generate_summary(messages, &title).await?;
        let artifact = self
            .archive
            .save(key.conversation_id, key.date, &summary, messages.len())
            .await?;

        tracing::info!("Generated summary: {} - {}", title, key.date);
        Ok(SummaryOutcome::Generated { artifact, title })
    }

    pub fn retriever(&self) -> &Arc<WindowRetriever> {
        &self.retriever
    }

    pub fn archive(&self) -> &Arc<SummaryArchive> {
        &self.archive
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn min_messages(&self) -> usize {
        self.min_messages
    }
}

/// Title carried by the messages, or `Chat <id>`.
pub fn conversation_title(conversation_id: ConversationId, messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| m.conversation_title.as_deref())
        .map(str::trim)
        .find(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Chat {}", conversation_id))
}
