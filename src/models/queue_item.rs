use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The outbox a queue item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    Email,
    Sms,
    Telegram,
}

impl Pipeline {
    /// Name used inside sentences.
    pub fn label(&self) -> &'static str {
        match self {
            Pipeline::Email => "email",
            Pipeline::Sms => "SMS",
            Pipeline::Telegram => "Telegram",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Pipeline::Email => "Email",
            Pipeline::Sms => "SMS",
            Pipeline::Telegram => "Telegram",
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Pipeline::Email => "email",
            Pipeline::Sms => "sms",
            Pipeline::Telegram => "telegram",
        };
        write!(f, "{s}")
    }
}

/// Delivery state of a queue item.
///
/// `Processing` marks an item claimed by a running batch. It is never terminal:
/// the claiming batch moves it on, or an expired lease releases it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
        }
    }

    /// Status after a failed attempt, given the already-incremented attempt count.
    pub fn after_failure(attempts: i32, max_attempts: i32) -> QueueStatus {
        if attempts >= max_attempts {
            QueueStatus::Failed
        } else {
            QueueStatus::Pending
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "sent" => Ok(QueueStatus::Sent),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(format!("Unknown queue status: {other}")),
        }
    }
}

/// Rendered content of a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Email {
        subject: String,
        html_content: String,
        text_content: Option<String>,
    },
    Text {
        message_content: String,
    },
}

impl Payload {
    /// Plain-text body, if the payload carries one.
    pub fn plain_text(&self) -> Option<&str> {
        match self {
            Payload::Email { text_content, .. } => text_content.as_deref(),
            Payload::Text { message_content } => Some(message_content),
        }
    }

    pub fn subject(&self) -> Option<&str> {
        match self {
            Payload::Email { subject, .. } => Some(subject),
            Payload::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub recipient: String,
    #[serde(flatten)]
    pub payload: Payload,
    pub template_name: Option<String>,
    pub status: QueueStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    /// Whether a batch running at `now` may attempt this item.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending
            && self.attempts < self.max_attempts
            && self.scheduled_at <= now
    }
}
