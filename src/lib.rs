//! chat-digest - daily AI summaries of chat conversations

pub mod api;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod storage;

// Re-export main types for convenience
pub use crate::api::routes::{create_router, AppState};
pub use crate::config::Config;
pub use crate::models::internal::{
    ConversationId, DayKey, Message, MessageKind, PartitionKey, SummaryArtifact, SummaryKey,
    SummaryOptions,
};
pub use crate::orchestrator::{
    SummaryError, SummaryOrchestrator, SummaryOutcome, SummaryScheduler,
};
pub use crate::storage::{MessageStore, SummaryArchive, WindowRetriever};
