use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::NotificationLogRow;

pub async fn enqueue(
    pool: &PgPool,
    notification_type: &str,
    recipient: &str,
    message: &str,
    max_attempts: i32,
    scheduled_at: Option<DateTime<Utc>>,
) -> Result<NotificationLogRow, sqlx::Error> {
    sqlx::query_as::<_, NotificationLogRow>(
        "INSERT INTO notification_logs
             (id, notification_type, recipient_phone, message_content, max_attempts, scheduled_at)
         VALUES ($1, $2, $3, $4, $5, COALESCE($6, now()))
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(notification_type)
    .bind(recipient)
    .bind(message)
    .bind(max_attempts)
    .bind(scheduled_at)
    .fetch_one(pool)
    .await
}

pub async fn select_eligible(
    pool: &PgPool,
    notification_type: &str,
    limit: i64,
) -> Result<Vec<NotificationLogRow>, sqlx::Error> {
    sqlx::query_as::<_, NotificationLogRow>(
        "SELECT * FROM notification_logs
         WHERE notification_type = $1
           AND status = 'pending'
           AND attempts < max_attempts
           AND scheduled_at <= now()
         ORDER BY created_at ASC, id ASC
         LIMIT $2",
    )
    .bind(notification_type)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn claim(pool: &PgPool, id: Uuid) -> Result<Option<NotificationLogRow>, sqlx::Error> {
    sqlx::query_as::<_, NotificationLogRow>(
        "UPDATE notification_logs
         SET status = 'processing', attempts = attempts + 1, claimed_at = now()
         WHERE id = $1
           AND status = 'pending'
           AND attempts < max_attempts
           AND scheduled_at <= now()
         RETURNING *",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Mark updates only land while the row still carries the claim's attempt
/// number. A batch whose lease expired and was re-claimed gets 0 rows back.
pub async fn mark_sent(
    pool: &PgPool,
    id: Uuid,
    attempt: i32,
    at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE notification_logs
         SET status = 'sent', sent_at = $3, error_message = NULL, claimed_at = NULL
         WHERE id = $1 AND attempts = $2 AND status = 'processing'",
    )
    .bind(id)
    .bind(attempt)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_retry(
    pool: &PgPool,
    id: Uuid,
    attempt: i32,
    error: &str,
    retry_at: Option<DateTime<Utc>>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE notification_logs
         SET status = 'pending',
             error_message = $3,
             scheduled_at = COALESCE($4, scheduled_at),
             claimed_at = NULL
         WHERE id = $1 AND attempts = $2 AND status = 'processing'",
    )
    .bind(id)
    .bind(attempt)
    .bind(error)
    .bind(retry_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_failed(
    pool: &PgPool,
    id: Uuid,
    attempt: i32,
    error: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE notification_logs
         SET status = 'failed', error_message = $3, claimed_at = NULL
         WHERE id = $1 AND attempts = $2 AND status = 'processing'",
    )
    .bind(id)
    .bind(attempt)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn release_expired(
    pool: &PgPool,
    notification_type: &str,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE notification_logs
         SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
             error_message = 'Delivery lease expired before completion',
             claimed_at = NULL
         WHERE notification_type = $1 AND status = 'processing' AND claimed_at < $2",
    )
    .bind(notification_type)
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn count_by_status(
    pool: &PgPool,
    notification_type: &str,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM notification_logs
         WHERE notification_type = $1
         GROUP BY status",
    )
    .bind(notification_type)
    .fetch_all(pool)
    .await
}

pub async fn list_recent(
    pool: &PgPool,
    notification_type: &str,
    limit: i64,
) -> Result<Vec<NotificationLogRow>, sqlx::Error> {
    sqlx::query_as::<_, NotificationLogRow>(
        "SELECT * FROM notification_logs
         WHERE notification_type = $1
         ORDER BY created_at DESC, id DESC
         LIMIT $2",
    )
    .bind(notification_type)
    .bind(limit)
    .fetch_all(pool)
    .await
}
