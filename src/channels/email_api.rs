use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{DeliveryChannel, DeliveryError, Receipt, snippet};
use crate::config::EmailApiConfig;
use crate::models::Payload;

/// Transactional mail provider reached over a JSON HTTP API
/// (`{from, to, subject, html, text}` with a bearer key).
pub struct EmailApiChannel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    from: String,
}

#[derive(Deserialize)]
struct SendResponse {
    id: Option<String>,
}

impl EmailApiChannel {
    pub fn new(config: &EmailApiConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("Failed to build email API client: {e}"))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl DeliveryChannel for EmailApiChannel {
    fn id(&self) -> &str {
        "email-api"
    }

    async fn attempt_delivery(
        &self,
        recipient: &str,
        payload: &Payload,
    ) -> Result<Receipt, DeliveryError> {
        let Payload::Email {
            subject,
            html_content,
            text_content,
        } = payload
        else {
            return Err(DeliveryError::from("Email API needs an email payload"));
        };

        let mut body = json!({
            "from": &self.from,
            "to": [recipient],
            "subject": subject,
            "html": html_content,
        });
        if let Some(text) = text_content {
            body["text"] = json!(text);
        }

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::from(format!("Email API request failed: {e}")))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(DeliveryError::from(format!(
                "Email API rejected message ({}): {}",
                status.as_u16(),
                snippet(&text)
            )));
        }

        let message_id = serde_json::from_str::<SendResponse>(&text)
            .ok()
            .and_then(|r| r.id);

        Ok(Receipt {
            channel: self.id().to_string(),
            message_id,
        })
    }
}
