use async_trait::async_trait;
use serde::Deserialize;

use super::{DeliveryChannel, DeliveryError, Receipt, snippet};
use crate::config::SmsConfig;
use crate::models::Payload;

/// Twilio-compatible messages endpoint: form-encoded `To`/`From`/`Body`,
/// basic auth with account id and token.
pub struct SmsGatewayChannel {
    client: reqwest::Client,
    url: String,
    account: String,
    token: String,
    from: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    sid: Option<String>,
}

impl SmsGatewayChannel {
    pub fn new(config: &SmsConfig) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| format!("Failed to build SMS client: {e}"))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            account: config.account.clone(),
            token: config.token.clone(),
            from: config.from.clone(),
        })
    }
}

#[async_trait]
impl DeliveryChannel for SmsGatewayChannel {
    fn id(&self) -> &str {
        "sms-gateway"
    }

    async fn attempt_delivery(
        &self,
        recipient: &str,
        payload: &Payload,
    ) -> Result<Receipt, DeliveryError> {
        let body = payload
            .plain_text()
            .ok_or_else(|| DeliveryError::from("SMS needs a text body"))?;

        let resp = self
            .client
            .post(&self.url)
            .basic_auth(&self.account, Some(&self.token))
            .form(&[("To", recipient), ("From", self.from.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| DeliveryError::from(format!("SMS request failed: {e}")))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(DeliveryError::from(format!(
                "SMS gateway rejected message ({}): {}",
                status.as_u16(),
                snippet(&text)
            )));
        }

        let message_id = serde_json::from_str::<MessageResponse>(&text)
            .ok()
            .and_then(|r| r.sid);

        Ok(Receipt {
            channel: self.id().to_string(),
            message_id,
        })
    }
}
