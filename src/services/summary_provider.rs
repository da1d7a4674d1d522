// src/services/summary_provider.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::models::internal::{Message, SummaryOptions};
use crate::services::prompt;

/// Provider-specific errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Provider '{0}' is not supported yet")]
    Unsupported(String),
    #[error("Provider failure: {0}")]
    Other(String),
}

/// Trait for summarization backends (OpenAI-compatible, Claude, local models).
///
/// One call, no retries. Whether a summary should be produced at all is
/// decided by the caller.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    /// Name recorded in artifacts and shown in formatted summaries.
    fn name(&self) -> &str;

    async fn generate_summary(
        &self,
        messages: &[Message],
        conversation_title: &str,
    ) -> Result<String, ProviderError>;
}

type ProviderConstructor = fn(&Config) -> Result<Arc<dyn SummaryProvider>, ConfigError>;

const PROVIDERS: &[(&str, ProviderConstructor)] = &[
    ("openai", OpenAiProvider::from_config),
    ("claude", ClaudeProvider::from_config),
    ("local", LocalProvider::from_config),
];

/// Instantiates the provider named by `config.ai_provider`.
pub fn build_provider(config: &Config) -> Result<Arc<dyn SummaryProvider>, ConfigError> {
    let name = config.provider_name();
    let (_, constructor) = PROVIDERS
        .iter()
        .find(|(key, _)| *key == name)
        .ok_or_else(|| ConfigError::UnsupportedProvider(config.ai_provider.clone()))?;
    constructor(config)
}

fn require_key(value: &Option<String>, provider: &str, setting: &'static str) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(ConfigError::MissingCredentials {
            provider: provider.to_string(),
            setting,
        }),
    }
}

// ============================================
// OPENAI-COMPATIBLE PROVIDER
// ============================================

const MAX_OUTPUT_TOKENS: u32 = 2000;
const TEMPERATURE: f64 = 0.3;

#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    options: SummaryOptions,
}

impl OpenAiProvider {
    pub fn new(base_url: String, api_key: String, model: String, options: SummaryOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            options,
        }
    }

    fn from_config(config: &Config) -> Result<Arc<dyn SummaryProvider>, ConfigError> {
        let api_key = require_key(&config.openai_api_key, "openai", "openai_api_key")?;
        Ok(Arc::new(Self::new(
            config.openai_base_url.clone(),
            api_key,
            config.openai_model.clone(),
            config.summary_options(),
        )))
    }

    fn build_request(&self, prompt: String) -> ChatCompletionRequest {
        // gpt-5 models reject max_tokens and a custom temperature.
        let is_gpt5 = self.model.to_lowercase().contains("gpt-5");
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            max_completion_tokens: is_gpt5.then_some(MAX_OUTPUT_TOKENS),
            max_tokens: (!is_gpt5).then_some(MAX_OUTPUT_TOKENS),
            temperature: (!is_gpt5).then_some(TEMPERATURE),
        }
    }
}

#[async_trait]
impl SummaryProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate_summary(
        &self,
        messages: &[Message],
        conversation_title: &str,
    ) -> Result<String, ProviderError> {
        let request = self.build_request(prompt::build_prompt(
            messages,
            conversation_title,
            &self.options,
        ));

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let completion: ChatCompletionResponse = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("no choices returned".to_string()))?;

        Ok(content.trim().to_string())
    }
}

// ============================================
// PLACEHOLDER PROVIDERS
// ============================================

/// Anthropic Claude. Credentials are checked, calls are not implemented.
pub struct ClaudeProvider {
    #[allow(dead_code)]
    api_key: String,
}

impl ClaudeProvider {
    fn from_config(config: &Config) -> Result<Arc<dyn SummaryProvider>, ConfigError> {
        let api_key = require_key(&config.anthropic_api_key, "claude", "anthropic_api_key")?;
        Ok(Arc::new(Self { api_key }))
    }
}

#[async_trait]
impl SummaryProvider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
    }

    async fn generate_summary(&self, _: &[Message], _: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported("claude".to_string()))
    }
}

/// Local model server (e.g. Ollama). Not implemented.
pub struct LocalProvider;

impl LocalProvider {
    fn from_config(_config: &Config) -> Result<Arc<dyn SummaryProvider>, ConfigError> {
        Ok(Arc::new(Self))
    }
}

#[async_trait]
impl SummaryProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate_summary(&self, _: &[Message], _: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Unsupported("local".to_string()))
    }
}

// ============================================
// MOCK PROVIDER
// ============================================

/// Mock provider for testing
pub struct MockProvider {
    pub response: Result<String, String>,
    pub call_count: Arc<std::sync::atomic::AtomicUsize>,
}

impl MockProvider {
    /// Create a mock provider that always returns `summary`
    pub fn new_success(summary: &str) -> Self {
        Self {
            response: Ok(summary.to_string()),
            call_count: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    /// Create a mock provider that always fails
    pub fn new_error(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            call_count: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.call_count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_summary(&self, _: &[Message], _: &str) -> Result<String, ProviderError> {
        self.call_count
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.response.clone().map_err(ProviderError::Other)
    }
}

// Request/Response Models
#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
