use chrono::NaiveTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

use crate::models::internal::{ConversationId, SummaryOptions};

/// Fire time used when `auto_summary_time` cannot be parsed.
pub const DEFAULT_FIRE_TIME: (u32, u32) = (23, 30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("Unsupported AI provider: {0}")]
    UnsupportedProvider(String),
    #[error("AI provider '{provider}' requires {setting} to be set")]
    MissingCredentials {
        provider: String,
        setting: &'static str,
    },
    #[error("Unsupported storage backend: {0}")]
    UnsupportedStorage(String),
}

/// Main configuration for chat-digest
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct Config {
    /// HTTP server port
    #[validate(range(min = 1024, max = 65535))]
    pub server_port: u16,

    /// Log level (e.g., info, debug, trace)
    pub log_level: String,

    /// Root directory for message partitions and summaries
    pub data_dir: PathBuf,

    /// `fs` or `memory`
    pub storage_backend: String,

    /// A partition slice never grows beyond this many messages
    #[validate(range(min = 1))]
    pub max_messages_per_partition: usize,

    /// Whether summarization (scheduled and manual) is enabled
    pub summarization_enabled: bool,

    /// Provider name: `openai`, `claude` or `local`
    pub ai_provider: String,

    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,

    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,

    /// Summary language option (`zh`, `en`, `ja`)
    pub summary_language: String,
    /// Summary length option (`short`, `medium`, `long`)
    pub summary_length: String,
    /// Summary style option (`bullet`, `paragraph`, `structured`)
    pub summary_style: String,

    /// Daily fire time, `HH:MM` in local time
    pub auto_summary_time: String,

    /// Conversations with fewer messages than this are skipped
    #[validate(range(min = 1))]
    pub min_messages_for_summary: usize,

    /// Eligible conversations; empty means all
    pub allowed_conversations: Vec<ConversationId>,

    /// Whether generated summaries are delivered outward
    pub send_summary_to_chat: bool,

    /// Deliver every summary to this conversation instead of its source
    pub summary_report_chat_id: Option<ConversationId>,

    /// Endpoint receiving delivered summaries
    pub delivery_webhook_url: Option<String>,

    /// Pause between conversations in a scheduled batch
    pub inter_conversation_delay_secs: u64,

    /// Pause before retrying after the daily loop itself fails
    #[validate(range(min = 1))]
    pub error_backoff_secs: u64,

    /// Manual summary triggers per client IP per minute
    #[validate(range(min = 1))]
    pub manual_rate_limit_per_minute: u32,

    /// Key rate limits by `X-Forwarded-For`; set only behind a proxy that
    /// overwrites the header
    pub trust_forwarded_for: bool,
}

impl Config {
    /// Loads defaults, then `~/.chat-digest/config`, then `CHAT_DIGEST__*`
    /// environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::load_from(&home.join(".chat-digest").join("config"), false)
    }

    /// Same as [`Config::load`] with an explicit file. When `required` is
    /// false a missing file is ignored.
    pub fn load_from(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .set_default("server_port", 8090)?
            .set_default("log_level", "info")?
            .set_default("data_dir", "./data")?
            .set_default("storage_backend", "fs")?
            .set_default("max_messages_per_partition", 10_000)?
            .set_default("summarization_enabled", false)?
            .set_default("ai_provider", "openai")?
            .set_default("openai_model", "gpt-4o-mini")?
            .set_default("openai_base_url", "https://api.openai.com/v1")?
            .set_default("anthropic_model", "claude-3-sonnet-20240229")?
            .set_default("summary_language", "zh")?
            .set_default("summary_length", "medium")?
            .set_default("summary_style", "bullet")?
            .set_default("auto_summary_time", "23:30")?
            .set_default("min_messages_for_summary", 10)?
            .set_default("allowed_conversations", Vec::<i64>::new())?
            .set_default("send_summary_to_chat", false)?
            .set_default("inter_conversation_delay_secs", 2)?
            .set_default("error_backoff_secs", 3600)?
            .set_default("manual_rate_limit_per_minute", 30)?
            .set_default("trust_forwarded_for", false)?
            .add_source(config::File::from(path).required(required))
            // CHAT_DIGEST__SERVER_PORT, CHAT_DIGEST__ALLOWED_CONVERSATIONS=-100,-200, ...
            .add_source(
                config::Environment::with_prefix("CHAT_DIGEST")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_conversations"),
            )
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parsed daily fire time. An unparseable value is logged and replaced by
    /// 23:30.
    pub fn fire_time(&self) -> NaiveTime {
        parse_fire_time(&self.auto_summary_time).unwrap_or_else(|| {
            tracing::error!(
                "Invalid auto_summary_time '{}', falling back to {:02}:{:02}",
                self.auto_summary_time,
                DEFAULT_FIRE_TIME.0,
                DEFAULT_FIRE_TIME.1
            );
            default_fire_time()
        })
    }

    /// `ai_provider` trimmed and lowercased.
    pub fn provider_name(&self) -> String {
        self.ai_provider.trim().to_ascii_lowercase()
    }

    /// Model name of the configured provider, recorded in artifacts.
    pub fn provider_model(&self) -> String {
        match self.provider_name().as_str() {
            "openai" => self.openai_model.clone(),
            "claude" => self.anthropic_model.clone(),
            _ => String::new(),
        }
    }

    pub fn summary_options(&self) -> SummaryOptions {
        SummaryOptions {
            provider: self.provider_name(),
            model: self.provider_model(),
            language: self.summary_language.clone(),
            length: self.summary_length.clone(),
            style: self.summary_style.clone(),
        }
    }

    pub fn inter_conversation_delay(&self) -> Duration {
        Duration::from_secs(self.inter_conversation_delay_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_port: 8090,
            log_level: "info".to_string(),
            data_dir: PathBuf::from("./data"),
            storage_backend: "fs".to_string(),
            max_messages_per_partition: 10_000,
            summarization_enabled: false,
            ai_provider: "openai".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4o-mini".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            anthropic_api_key: None,
            anthropic_model: "claude-3-sonnet-20240229".to_string(),
            summary_language: "zh".to_string(),
            summary_length: "medium".to_string(),
            summary_style: "bullet".to_string(),
            auto_summary_time: "23:30".to_string(),
            min_messages_for_summary: 10,
            allowed_conversations: Vec::new(),
            send_summary_to_chat: false,
            summary_report_chat_id: None,
            delivery_webhook_url: None,
            inter_conversation_delay_secs: 2,
            error_backoff_secs: 3600,
            manual_rate_limit_per_minute: 30,
            trust_forwarded_for: false,
        }
    }
}

pub fn parse_fire_time(raw: &str) -> Option<NaiveTime> {
    let (hour, minute) = raw.trim().split_once(':')?;
    NaiveTime::from_hms_opt(hour.trim().parse().ok()?, minute.trim().parse().ok()?, 0)
}

fn default_fire_time() -> NaiveTime {
    NaiveTime::from_hms_opt(DEFAULT_FIRE_TIME.0, DEFAULT_FIRE_TIME.1, 0).unwrap_or(NaiveTime::MIN)
}
