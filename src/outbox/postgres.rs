use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewItem, OutboxStore, QueueStats, StoreError, TemplateStore};
use crate::db;
use crate::db::email_queue::NewEmail;
use crate::models::{
    EmailQueueRow, EmailTemplate, NotificationLogRow, Payload, Pipeline, QueueItem,
};

impl TryFrom<EmailQueueRow> for QueueItem {
    type Error = StoreError;

    fn try_from(row: EmailQueueRow) -> Result<Self, Self::Error> {
        Ok(QueueItem {
            id: row.id,
            recipient: row.to_email,
            payload: Payload::Email {
                subject: row.subject,
                html_content: row.html_content,
                text_content: row.text_content,
            },
            template_name: row.template_name,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            scheduled_at: row.scheduled_at,
            claimed_at: row.claimed_at,
            sent_at: row.sent_at,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

impl TryFrom<NotificationLogRow> for QueueItem {
    type Error = StoreError;

    fn try_from(row: NotificationLogRow) -> Result<Self, Self::Error> {
        Ok(QueueItem {
            id: row.id,
            recipient: row.recipient_phone,
            payload: Payload::Text {
                message_content: row.message_content,
            },
            template_name: None,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            scheduled_at: row.scheduled_at,
            claimed_at: row.claimed_at,
            sent_at: row.sent_at,
            error_message: row.error_message,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R>(rows: Vec<R>) -> Result<Vec<QueueItem>, StoreError>
where
    QueueItem: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(QueueItem::try_from).collect()
}

fn expect_row(id: Uuid, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::LeaseLost(id))
    } else {
        Ok(())
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// The `email_queue` table.
pub struct PgEmailOutbox {
    pool: PgPool,
}

impl PgEmailOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxStore for PgEmailOutbox {
    async fn select_eligible(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let rows = db::email_queue::select_eligible(&self.pool, sql_limit(limit)).await?;
        convert_all(rows)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        db::email_queue::claim(&self.pool, id)
            .await?
            .map(QueueItem::try_from)
            .transpose()
    }

    async fn mark_sent(&self, id: Uuid, attempt: i32, at: DateTime<Utc>) -> Result<(), StoreError> {
        let n = db::email_queue::mark_sent(&self.pool, id, attempt, at).await?;
        expect_row(id, n)
    }

    async fn mark_failed(&self, id: Uuid, attempt: i32, reason: &str) -> Result<(), StoreError> {
        let n = db::email_queue::mark_failed(&self.pool, id, attempt, reason).await?;
        expect_row(id, n)
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempt: i32,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let n = db::email_queue::mark_retry(&self.pool, id, attempt, reason, retry_at).await?;
        expect_row(id, n)
    }

    async fn release_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(db::email_queue::release_expired(&self.pool, cutoff).await?)
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let counts = db::email_queue::count_by_status(&self.pool).await?;
        Ok(QueueStats::from_counts(counts))
    }

    async fn enqueue(&self, item: NewItem) -> Result<QueueItem, StoreError> {
        let Payload::Email {
            subject,
            html_content,
            text_content,
        } = &item.payload
        else {
            return Err(StoreError::InvalidPayload(
                "email queue needs subject and html_content".to_string(),
            ));
        };

        let row = db::email_queue::enqueue(
            &self.pool,
            &NewEmail {
                to_email: &item.recipient,
                subject,
                html_content,
                text_content: text_content.as_deref(),
                template_name: item.template_name.as_deref(),
                max_attempts: item.max_attempts,
                scheduled_at: item.scheduled_at,
            },
        )
        .await?;
        QueueItem::try_from(row)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let rows = db::email_queue::list_recent(&self.pool, sql_limit(limit)).await?;
        convert_all(rows)
    }
}

/// `notification_logs` rows of one notification type (`sms` or `telegram`).
pub struct PgNotificationOutbox {
    pool: PgPool,
    notification_type: &'static str,
}

impl PgNotificationOutbox {
    pub fn new(pool: PgPool, pipeline: Pipeline) -> Result<Self, String> {
        let notification_type = match pipeline {
            Pipeline::Sms => "sms",
            Pipeline::Telegram => "telegram",
            Pipeline::Email => return Err("email is stored in email_queue".to_string()),
        };
        Ok(Self {
            pool,
            notification_type,
        })
    }
}

#[async_trait]
impl OutboxStore for PgNotificationOutbox {
    async fn select_eligible(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let rows = db::notification_logs::select_eligible(
            &self.pool,
            self.notification_type,
            sql_limit(limit),
        )
        .await?;
        convert_all(rows)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        db::notification_logs::claim(&self.pool, id)
            .await?
            .map(QueueItem::try_from)
            .transpose()
    }

    async fn mark_sent(&self, id: Uuid, attempt: i32, at: DateTime<Utc>) -> Result<(), StoreError> {
        let n = db::notification_logs::mark_sent(&self.pool, id, attempt, at).await?;
        expect_row(id, n)
    }

    async fn mark_failed(&self, id: Uuid, attempt: i32, reason: &str) -> Result<(), StoreError> {
        let n = db::notification_logs::mark_failed(&self.pool, id, attempt, reason).await?;
        expect_row(id, n)
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempt: i32,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let n =
            db::notification_logs::mark_retry(&self.pool, id, attempt, reason, retry_at).await?;
        expect_row(id, n)
    }

    async fn release_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(
            db::notification_logs::release_expired(&self.pool, self.notification_type, cutoff)
                .await?,
        )
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let counts =
            db::notification_logs::count_by_status(&self.pool, self.notification_type).await?;
        Ok(QueueStats::from_counts(counts))
    }

    async fn enqueue(&self, item: NewItem) -> Result<QueueItem, StoreError> {
        let message = item.payload.plain_text().ok_or_else(|| {
            StoreError::InvalidPayload(format!(
                "{} notifications need message_content",
                self.notification_type
            ))
        })?;

        let row = db::notification_logs::enqueue(
            &self.pool,
            self.notification_type,
            &item.recipient,
            message,
            item.max_attempts,
            item.scheduled_at,
        )
        .await?;
        QueueItem::try_from(row)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let rows = db::notification_logs::list_recent(
            &self.pool,
            self.notification_type,
            sql_limit(limit),
        )
        .await?;
        convert_all(rows)
    }
}

pub struct PgTemplates {
    pool: PgPool,
}

impl PgTemplates {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateStore for PgTemplates {
    async fn find_active(&self, name: &str) -> Result<Option<EmailTemplate>, StoreError> {
        Ok(db::email_templates::find_active(&self.pool, name).await?)
    }
}
