use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{DeliveryChannel, DeliveryError, Receipt};
use crate::config::SmtpConfig;
use crate::models::Payload;

pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpChannel {
    pub fn new(config: &SmtpConfig) -> Result<Self, String> {
        let creds = Credentials::new(config.user.clone(), config.pass.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| format!("SMTP error: {e}"))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            transport,
            from: config.from.clone(),
        })
    }
}

fn build_message(from: &str, to: &str, payload: &Payload) -> Result<Message, DeliveryError> {
    let Payload::Email {
        subject,
        html_content,
        text_content,
    } = payload
    else {
        return Err(DeliveryError::from("SMTP needs an email payload"));
    };

    let builder = Message::builder()
        .from(
            from.parse()
                .map_err(|e| DeliveryError::from(format!("Invalid from address: {e}")))?,
        )
        .to(to
            .parse()
            .map_err(|e| DeliveryError::from(format!("Invalid to address: {e}")))?)
        .subject(subject);

    let message = match text_content {
        Some(text) => builder.multipart(MultiPart::alternative_plain_html(
            text.clone(),
            html_content.clone(),
        )),
        None => builder
            .header(ContentType::TEXT_HTML)
            .body(html_content.clone()),
    };

    message.map_err(|e| DeliveryError::from(format!("Failed to build email: {e}")))
}

#[async_trait]
impl DeliveryChannel for SmtpChannel {
    fn id(&self) -> &str {
        "smtp"
    }

    async fn attempt_delivery(
        &self,
        recipient: &str,
        payload: &Payload,
    ) -> Result<Receipt, DeliveryError> {
        let message = build_message(&self.from, recipient, payload)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::from(format!("Failed to send email: {e}")))?;

        Ok(Receipt {
            channel: self.id().to_string(),
            message_id: response.first_line().map(str::to_string),
        })
    }
}
