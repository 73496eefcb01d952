pub mod email_api;
pub mod log;
pub mod sms;
pub mod smtp;
pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::Payload;

use email_api::EmailApiChannel;
use log::LogChannel;
use sms::SmsGatewayChannel;
use smtp::SmtpChannel;
use telegram::TelegramChannel;

/// What a channel hands back after accepting a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Receipt {
    pub channel: String,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryError {
    pub message: String,
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<String> for DeliveryError {
    fn from(s: String) -> Self {
        DeliveryError { message: s }
    }
}

impl From<&str> for DeliveryError {
    fn from(s: &str) -> Self {
        DeliveryError {
            message: s.to_string(),
        }
    }
}

/// One transport. Implementations make exactly one transmission per call and
/// never retry; retries belong to the queue.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn id(&self) -> &str;

    async fn attempt_delivery(
        &self,
        recipient: &str,
        payload: &Payload,
    ) -> Result<Receipt, DeliveryError>;
}

/// Channels tried in order until one accepts the message.
#[derive(Clone)]
pub struct ChannelChain {
    channels: Vec<Arc<dyn DeliveryChannel>>,
    call_timeout: Duration,
}

impl ChannelChain {
    pub fn new(channels: Vec<Arc<dyn DeliveryChannel>>, call_timeout: Duration) -> Self {
        Self {
            channels,
            call_timeout,
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.id()).collect()
    }

    /// Deliver through the first channel that succeeds. When every channel
    /// fails the last error wins.
    pub async fn deliver(&self, recipient: &str, payload: &Payload) -> Result<Receipt, DeliveryError> {
        let mut last_error = DeliveryError::from("No delivery channel configured");

        for channel in &self.channels {
            let outcome = tokio::time::timeout(
                self.call_timeout,
                channel.attempt_delivery(recipient, payload),
            )
            .await;

            match outcome {
                Ok(Ok(receipt)) => return Ok(receipt),
                Ok(Err(e)) => {
                    tracing::warn!("Channel {} failed for {recipient}: {e}", channel.id());
                    last_error = e;
                }
                Err(_) => {
                    tracing::warn!("Channel {} timed out for {recipient}", channel.id());
                    last_error = DeliveryError::from(format!(
                        "{} timed out after {}ms",
                        channel.id(),
                        self.call_timeout.as_millis()
                    ));
                }
            }
        }

        Err(last_error)
    }
}

/// HTTP API first, SMTP as fallback. The log sink is appended when asked for,
/// or used alone when no real provider is configured.
pub fn email_chain(config: &Config) -> Result<ChannelChain, String> {
    let mut channels: Vec<Arc<dyn DeliveryChannel>> = Vec::new();

    if let Some(api) = &config.email_api {
        channels.push(Arc::new(EmailApiChannel::new(api)?));
        tracing::info!("Email API channel configured");
    }

    if let Some(smtp) = &config.smtp {
        match SmtpChannel::new(smtp) {
            Ok(channel) => {
                tracing::info!("SMTP channel configured");
                channels.push(Arc::new(channel));
            }
            Err(e) => tracing::warn!("SMTP channel not available: {e}"),
        }
    }

    if channels.is_empty() {
        tracing::warn!("No email provider configured, email will only be logged");
        channels.push(Arc::new(LogChannel::new("email-log")));
    } else if config.log_fallback {
        channels.push(Arc::new(LogChannel::new("email-log")));
    }

    Ok(ChannelChain::new(channels, config.channel_timeout))
}

pub fn sms_chain(config: &Config) -> Result<ChannelChain, String> {
    let channel: Arc<dyn DeliveryChannel> = match &config.sms {
        Some(sms) => Arc::new(SmsGatewayChannel::new(sms)?),
        None => {
            tracing::warn!("No SMS gateway configured, SMS will only be logged");
            Arc::new(LogChannel::new("sms-log"))
        }
    };
    Ok(ChannelChain::new(vec![channel], config.channel_timeout))
}

pub fn telegram_chain(config: &Config) -> Result<ChannelChain, String> {
    let channel: Arc<dyn DeliveryChannel> = match &config.telegram {
        Some(telegram) => Arc::new(TelegramChannel::new(telegram)?),
        None => {
            tracing::warn!("No Telegram bot configured, Telegram messages will only be logged");
            Arc::new(LogChannel::new("telegram-log"))
        }
    };
    Ok(ChannelChain::new(vec![channel], config.channel_timeout))
}

/// Truncated response body for error messages.
pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(1024).collect()
}
