use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::models::internal::{
    ConversationId, Message, MessageKind, SummaryArtifact, TIME_FORMAT,
};

// ==================== REQUEST DTOs ====================

/// A message as delivered by the transport adapter.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct MessageDto {
    pub message_id: i64,
    pub conversation_id: ConversationId,
    pub conversation_title: Option<String>,
    pub author_id: i64,
    pub display_name: String,
    pub username: Option<String>,
    #[serde(default)]
    pub text: String,
    /// text, photo, video, document, audio, voice, sticker or other
    #[serde(default = "default_kind")]
    pub kind: String,
    /// `YYYY-MM-DD HH:MM:SS`, local time
    pub timestamp: String,
}

fn default_kind() -> String {
    "text".to_string()
}

impl MessageDto {
    pub fn into_message(self) -> Result<Message, String> {
        let timestamp = NaiveDateTime::parse_from_str(self.timestamp.trim(), TIME_FORMAT)
            .map_err(|e| format!("Invalid timestamp '{}': {}", self.timestamp, e))?;
        check_year(timestamp.date(), &self.timestamp)?;
        let kind: MessageKind = serde_json::from_value(serde_json::Value::String(self.kind))
            .unwrap_or(MessageKind::Other);
        Ok(Message {
            message_id: self.message_id,
            conversation_id: self.conversation_id,
            conversation_title: self.conversation_title,
            author_id: self.author_id,
            display_name: self.display_name,
            username: self.username,
            text: self.text,
            kind,
            timestamp,
        })
    }
}

impl From<&Message> for MessageDto {
    fn from(m: &Message) -> Self {
        let kind = serde_json::to_value(m.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(default_kind);
        Self {
            message_id: m.message_id,
            conversation_id: m.conversation_id,
            conversation_title: m.conversation_title.clone(),
            author_id: m.author_id,
            display_name: m.display_name.clone(),
            username: m.username.clone(),
            text: m.text.clone(),
            kind,
            timestamp: m.timestamp.format(TIME_FORMAT).to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ManualSummaryRequest {
    /// `YYYY-MM-DD`; defaults to yesterday
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub date: Option<String>,
    pub window: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("Invalid date '{}': {}", raw, e))?;
    check_year(date, raw)?;
    Ok(date)
}

/// Storage keys carry the date as `YYYYMMDD`.
fn check_year(date: NaiveDate, raw: &str) -> Result<(), String> {
    if (0..=9999).contains(&date.year()) {
        Ok(())
    } else {
        Err(format!("Date '{}' is outside years 0000-9999", raw.trim()))
    }
}

// ==================== RESPONSE DTOs ====================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageStoredResponse {
    pub message_id: i64,
    pub partition: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessagesResponse {
    pub conversation_id: ConversationId,
    pub count: usize,
    pub messages: Vec<MessageDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SummaryDto {
    pub conversation_id: ConversationId,
    pub date: String,
    pub generated_at: String,
    pub message_count: usize,
    pub summary: String,
    pub provider: String,
    pub model: String,
    pub language: String,
    pub length: String,
    pub style: String,
}

impl From<&SummaryArtifact> for SummaryDto {
    fn from(a: &SummaryArtifact) -> Self {
        Self {
            conversation_id: a.conversation_id,
            date: a.date.to_string(),
            generated_at: a.generated_at.format(TIME_FORMAT).to_string(),
            message_count: a.message_count,
            summary: a.summary.clone(),
            provider: a.options.provider.clone(),
            model: a.options.model.clone(),
            language: a.options.language.clone(),
            length: a.options.length.clone(),
            style: a.options.style.clone(),
        }
    }
}

/// Outcome of a manual trigger. `status` is `generated`, `skipped` or
/// `in_progress`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SummaryResponse {
    pub status: String,
    pub conversation_id: ConversationId,
    pub message_count: usize,
    pub threshold: Option<usize>,
    pub summary: Option<SummaryDto>,
    pub formatted: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub conversation_id: ConversationId,
    pub summaries: Vec<SummaryDto>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

#[derive(OpenApi)]
#[openapi(components(schemas(
    MessageDto,
    ManualSummaryRequest,
    MessageStoredResponse,
    MessagesResponse,
    SummaryDto,
    SummaryResponse,
    HistoryResponse,
    ErrorResponse
)))]
pub struct ApiDoc;
