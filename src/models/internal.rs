use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire format for message timestamps and artifact generation times.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format embedded in storage keys.
pub const KEY_DATE_FORMAT: &str = "%Y%m%d";

pub type ConversationId = i64;

/// Content type tag attached by the transport adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Sticker,
    #[serde(other)]
    Other,
}

/// A recorded chat message. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub conversation_id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_title: Option<String>,
    pub author_id: i64,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
}

impl Message {
    /// Author label used in prompts: `Display Name (@username)`.
    pub fn author_label(&self) -> String {
        match &self.username {
            Some(username) if !username.is_empty() => {
                format!("{} (@{})", self.display_name.trim(), username)
            }
            _ => self.display_name.trim().to_string(),
        }
    }

    pub fn day_key(&self) -> DayKey {
        DayKey::new(self.conversation_id, self.timestamp.date())
    }
}

/// Composite key: one conversation on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayKey {
    pub conversation_id: ConversationId,
    pub date: NaiveDate,
}

impl DayKey {
    pub fn new(conversation_id: ConversationId, date: NaiveDate) -> Self {
        Self {
            conversation_id,
            date,
        }
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.conversation_id, self.date)
    }
}

/// One slice of a day's message log. Slice 0 is created by the first message
/// of the day; later slices begin whenever the previous one is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub day: DayKey,
    pub slice: u32,
}

impl PartitionKey {
    const PREFIX: &'static str = "chat_";

    pub fn new(day: DayKey, slice: u32) -> Self {
        Self { day, slice }
    }

    /// Prefix shared by every slice of `day`.
    pub fn day_prefix(day: &DayKey) -> String {
        format!(
            "{}{}_{}",
            Self::PREFIX,
            day.conversation_id,
            day.date.format(KEY_DATE_FORMAT)
        )
    }

    /// Prefix shared by every partition in the store.
    pub fn all_prefix() -> &'static str {
        Self::PREFIX
    }

    pub fn storage_key(&self) -> String {
        if self.slice == 0 {
            Self::day_prefix(&self.day)
        } else {
            format!("{}_{:03}", Self::day_prefix(&self.day), self.slice)
        }
    }

    /// Inverse of [`PartitionKey::storage_key`]. Returns `None` for anything
    /// that is not a well-formed partition key.
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(Self::PREFIX)?;
        let mut parts = rest.split('_');
        let conversation_id = parts.next()?.parse::<ConversationId>().ok()?;
        let date_part = parts.next()?;
        if date_part.len() != 8 {
            return None;
        }
        let date = NaiveDate::parse_from_str(date_part, KEY_DATE_FORMAT).ok()?;
        let slice = match parts.next() {
            None => 0,
            Some(s) if s.len() >= 3 && s.bytes().all(|b| b.is_ascii_digit()) => {
                s.parse::<u32>().ok()?
            }
            Some(_) => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(DayKey::new(conversation_id, date), slice))
    }
}

/// Storage key of the summary artifact for a [`DayKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SummaryKey(pub DayKey);

impl SummaryKey {
    const PREFIX: &'static str = "summary_chat_";

    pub fn conversation_prefix(conversation_id: ConversationId) -> String {
        format!("{}{}_", Self::PREFIX, conversation_id)
    }

    pub fn all_prefix() -> &'static str {
        Self::PREFIX
    }

    pub fn storage_key(&self) -> String {
        format!(
            "{}{}",
            Self::conversation_prefix(self.0.conversation_id),
            self.0.date.format(KEY_DATE_FORMAT)
        )
    }

    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(Self::PREFIX)?;
        let (id, date) = rest.rsplit_once('_')?;
        if date.len() != 8 {
            return None;
        }
        let conversation_id = id.parse::<ConversationId>().ok()?;
        let date = NaiveDate::parse_from_str(date, KEY_DATE_FORMAT).ok()?;
        Some(Self(DayKey::new(conversation_id, date)))
    }
}

/// Generation settings recorded alongside each artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryOptions {
    pub provider: String,
    #[serde(default)]
    pub model: String,
    pub language: String,
    pub length: String,
    pub style: String,
}

/// A persisted summary, unique per (conversation, date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryArtifact {
    pub conversation_id: ConversationId,
    pub date: NaiveDate,
    #[serde(with = "timestamp_format")]
    pub generated_at: NaiveDateTime,
    pub message_count: usize,
    pub summary: String,
    pub options: SummaryOptions,
}

impl SummaryArtifact {
    pub fn key(&self) -> SummaryKey {
        SummaryKey(DayKey::new(self.conversation_id, self.date))
    }
}

pub mod timestamp_format {
    use super::TIME_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(TIME_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(raw.trim(), TIME_FORMAT).map_err(serde::de::Error::custom)
    }
}
