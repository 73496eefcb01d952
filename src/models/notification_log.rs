use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A text notification row. For Telegram rows `recipient_phone` holds the chat id.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationLogRow {
    pub id: Uuid,
    pub notification_type: String,
    pub recipient_phone: String,
    pub message_content: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub scheduled_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
