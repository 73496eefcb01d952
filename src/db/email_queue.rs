use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::EmailQueueRow;

pub struct NewEmail<'a> {
    pub to_email: &'a str,
    pub subject: &'a str,
    pub html_content: &'a str,
    pub text_content: Option<&'a str>,
    pub template_name: Option<&'a str>,
    pub max_attempts: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

pub async fn enqueue(pool: &PgPool, email: &NewEmail<'_>) -> Result<EmailQueueRow, sqlx::Error> {
    sqlx::query_as::<_, EmailQueueRow>(
        "INSERT INTO email_queue
             (id, to_email, subject, html_content, text_content, template_name,
              max_attempts, scheduled_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, COALESCE($8, now()))
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(email.to_email)
    .bind(email.subject)
    .bind(email.html_content)
    .bind(email.text_content)
    .bind(email.template_name)
    .bind(email.max_attempts)
    .bind(email.scheduled_at)
    .fetch_one(pool)
    .await
}

/// Oldest-first eligible rows: pending, attempts left, schedule reached.
pub async fn select_eligible(pool: &PgPool, limit: i64) -> Result<Vec<EmailQueueRow>, sqlx::Error> {
    sqlx::query_as::<_, EmailQueueRow>(
        "SELECT * FROM email_queue
         WHERE status = 'pending'
           AND attempts < max_attempts
           AND scheduled_at <= now()
         ORDER BY created_at ASC, id ASC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Count an attempt and take the lease in one conditional update.
/// Returns `None` when the row stopped being eligible (another batch claimed it).
pub async fn claim(pool: &PgPool, id: Uuid) -> Result<Option<EmailQueueRow>, sqlx::Error> {
    sqlx::query_as::<_, EmailQueueRow>(
        "UPDATE email_queue
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
        "UPDATE email_queue
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
        "UPDATE email_queue
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
        "UPDATE email_queue
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

/// Return rows whose lease started before `cutoff` to the queue, or fail them
/// when no attempts are left.
pub async fn release_expired(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE email_queue
         SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
             error_message = 'Delivery lease expired before completion',
             claimed_at = NULL
         WHERE status = 'processing' AND claimed_at < $1",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn count_by_status(pool: &PgPool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM email_queue GROUP BY status",
    )
    .fetch_all(pool)
    .await
}

pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<EmailQueueRow>, sqlx::Error> {
    sqlx::query_as::<_, EmailQueueRow>(
        "SELECT * FROM email_queue ORDER BY created_at DESC, id DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
