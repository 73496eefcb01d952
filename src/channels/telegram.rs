use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{DeliveryChannel, DeliveryError, Receipt};
use crate::config::TelegramConfig;
use crate::models::Payload;

/// Telegram Bot API `sendMessage`. The recipient is the chat id.
pub struct TelegramChannel {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("Failed to build Telegram client: {e}"))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.bot_token
            ),
        })
    }
}

fn interpret(body: &str) -> Result<Option<String>, DeliveryError> {
    let parsed: ApiResponse = serde_json::from_str(body)
        .map_err(|e| DeliveryError::from(format!("Unreadable Telegram response: {e}")))?;

    if !parsed.ok {
        return Err(DeliveryError::from(
            parsed
                .description
                .unwrap_or_else(|| "Failed to send Telegram message".to_string()),
        ));
    }

    Ok(parsed.result.map(|m| m.message_id.to_string()))
}

#[async_trait]
impl DeliveryChannel for TelegramChannel {
    fn id(&self) -> &str {
        "telegram"
    }

    async fn attempt_delivery(
        &self,
        recipient: &str,
        payload: &Payload,
    ) -> Result<Receipt, DeliveryError> {
        let text = payload
            .plain_text()
            .ok_or_else(|| DeliveryError::from("Telegram needs a text body"))?;

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "chat_id": recipient,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await
            .map_err(|e| DeliveryError::from(format!("Telegram request failed: {e}")))?;

        // The Bot API reports errors in the body, usually alongside a 4xx status.
        let body = resp.text().await.unwrap_or_default();
        let message_id = interpret(&body)?;

        Ok(Receipt {
            channel: self.id().to_string(),
            message_id,
        })
    }
}
