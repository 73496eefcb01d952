use async_trait::async_trait;

use super::{DeliveryChannel, DeliveryError, Receipt};
use crate::models::Payload;

/// Writes the message to the application log and reports success.
/// Stands in for a provider in development.
pub struct LogChannel {
    id: String,
}

impl LogChannel {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

#[async_trait]
impl DeliveryChannel for LogChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn attempt_delivery(
        &self,
        recipient: &str,
        payload: &Payload,
    ) -> Result<Receipt, DeliveryError> {
        let body = match payload {
            Payload::Email { html_content, .. } => html_content.as_str(),
            Payload::Text { message_content } => message_content.as_str(),
        };
        let preview: String = body.chars().take(200).collect();

        match payload.subject() {
            Some(subject) => {
                tracing::info!("[{}] to {recipient}, subject {subject:?}: {preview}", self.id)
            }
            None => tracing::info!("[{}] to {recipient}: {preview}", self.id),
        }

        Ok(Receipt {
            channel: self.id.clone(),
            message_id: None,
        })
    }
}
