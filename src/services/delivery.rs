use async_trait::async_trait;
use serde::Serialize;

use crate::models::internal::ConversationId;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Delivery endpoint returned {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Posts formatted summaries back into a conversation.
#[async_trait]
pub trait SummaryDelivery: Send + Sync {
    async fn deliver(&self, target: ConversationId, text: &str) -> Result<(), DeliveryError>;
}

/// Forwards summaries to a transport adapter listening on `url`.
#[derive(Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    url: String,
}

impl WebhookDelivery {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[derive(Serialize)]
struct DeliveryPayload<'a> {
    conversation_id: ConversationId,
    text: &'a str,
    parse_mode: &'static str,
}

#[async_trait]
impl SummaryDelivery for WebhookDelivery {
    async fn deliver(&self, target: ConversationId, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(&DeliveryPayload {
                conversation_id: target,
                text,
                parse_mode: "Markdown",
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Rejected {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}
