//! Store tests against a real Postgres. Skipped when `DATABASE_URL` is unset.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use uuid::Uuid;

use outboxer::config::QueueConfig;
use outboxer::models::{Payload, Pipeline, QueueStatus};
use outboxer::outbox::postgres::{PgEmailOutbox, PgNotificationOutbox, PgTemplates};
use outboxer::outbox::{NewItem, OutboxStore, Processor, RetryPolicy, StoreError, TemplateStore};

fn email(to: &str) -> NewItem {
    NewItem {
        recipient: to.to_string(),
        payload: Payload::Email {
            subject: "Welcome".into(),
            html_content: "<p>Welcome</p>".into(),
            text_content: Some("Welcome".into()),
        },
        template_name: None,
        max_attempts: 3,
        scheduled_at: None,
    }
}

fn text(to: &str, max_attempts: i32) -> NewItem {
    NewItem {
        recipient: to.to_string(),
        payload: Payload::Text {
            message_content: "Your code is 1234".into(),
        },
        template_name: None,
        max_attempts,
        scheduled_at: None,
    }
}

#[tokio::test]
async fn email_claim_is_conditional() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let store = PgEmailOutbox::new(db.pool.clone());

    let item = store.enqueue(email("alice@example.com")).await.unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.attempts, 0);

    let claimed = store.claim(item.id).await.unwrap().unwrap();
    assert_eq!(claimed.status, QueueStatus::Processing);
    assert_eq!(claimed.attempts, 1);
    assert!(claimed.claimed_at.is_some());

    assert!(store.claim(item.id).await.unwrap().is_none());
    assert!(store.select_eligible(10).await.unwrap().is_empty());

    store.mark_sent(item.id, 1, Utc::now()).await.unwrap();
    let err = store.mark_sent(item.id, 1, Utc::now()).await.unwrap_err();
    assert!(matches!(err, StoreError::LeaseLost(id) if id == item.id));

    let recent = store.recent(10).await.unwrap();
    assert_eq!(recent[0].status, QueueStatus::Sent);
    assert_eq!(recent[0].attempts, 1);
    assert!(recent[0].sent_at.is_some());
    assert!(recent[0].claimed_at.is_none());

    common::cleanup(db).await;
}

#[tokio::test]
async fn eligibility_honors_schedule_and_order() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let store = PgEmailOutbox::new(db.pool.clone());

    let first = store.enqueue(email("first@example.com")).await.unwrap();
    let mut later = email("later@example.com");
    later.scheduled_at = Some(Utc::now() + TimeDelta::hours(1));
    store.enqueue(later).await.unwrap();
    let second = store.enqueue(email("second@example.com")).await.unwrap();

    let eligible = store.select_eligible(10).await.unwrap();
    let ids: Vec<Uuid> = eligible.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);

    assert_eq!(store.select_eligible(1).await.unwrap().len(), 1);

    common::cleanup(db).await;
}

#[tokio::test]
async fn retry_and_failure_are_recorded() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let store = PgNotificationOutbox::new(db.pool.clone(), Pipeline::Sms).unwrap();
    let item = store.enqueue(text("+15550001", 2)).await.unwrap();

    store.claim(item.id).await.unwrap().unwrap();
    let retry_at = Utc::now() + TimeDelta::minutes(5);
    store
        .mark_retry(item.id, 1, "gateway timeout", Some(retry_at))
        .await
        .unwrap();

    // Backed off, so not eligible yet.
    assert!(store.select_eligible(10).await.unwrap().is_empty());
    sqlx::query("UPDATE notification_logs SET scheduled_at = now() WHERE id = $1")
        .bind(item.id)
        .execute(&db.pool)
        .await
        .unwrap();

    let claimed = store.claim(item.id).await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 2);
    assert_eq!(claimed.error_message.as_deref(), Some("gateway timeout"));
    store.mark_failed(item.id, 2, "gateway down").await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.status_counts.get("failed"), Some(&1));
    assert!(store.claim(item.id).await.unwrap().is_none());

    common::cleanup(db).await;
}

#[tokio::test]
async fn expired_leases_are_released() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let store = PgNotificationOutbox::new(db.pool.clone(), Pipeline::Telegram).unwrap();

    let retryable = store.enqueue(text("1001", 3)).await.unwrap();
    let exhausted = store.enqueue(text("1002", 1)).await.unwrap();
    store.claim(retryable.id).await.unwrap().unwrap();
    store.claim(exhausted.id).await.unwrap().unwrap();

    sqlx::query("UPDATE notification_logs SET claimed_at = now() - interval '1 hour'")
        .execute(&db.pool)
        .await
        .unwrap();

    let released = store
        .release_expired(Utc::now() - TimeDelta::minutes(5))
        .await
        .unwrap();
    assert_eq!(released, 2);

    let recent = store.recent(10).await.unwrap();
    let status_of = |id: Uuid| recent.iter().find(|i| i.id == id).unwrap().status;
    assert_eq!(status_of(retryable.id), QueueStatus::Pending);
    assert_eq!(status_of(exhausted.id), QueueStatus::Failed);

    common::cleanup(db).await;
}

#[tokio::test]
async fn marks_from_a_released_claim_are_refused() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let store = PgEmailOutbox::new(db.pool.clone());
    let item = store.enqueue(email("alice@example.com")).await.unwrap();

    let stale = store.claim(item.id).await.unwrap().unwrap();
    sqlx::query("UPDATE email_queue SET claimed_at = now() - interval '1 hour'")
        .execute(&db.pool)
        .await
        .unwrap();
    store
        .release_expired(Utc::now() - TimeDelta::minutes(5))
        .await
        .unwrap();
    let fresh = store.claim(item.id).await.unwrap().unwrap();
    assert_eq!(fresh.attempts, stale.attempts + 1);

    let err = store
        .mark_sent(item.id, stale.attempts, Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::LeaseLost(id) if id == item.id));
    assert!(
        store
            .mark_failed(item.id, stale.attempts, "late")
            .await
            .is_err()
    );

    store
        .mark_sent(item.id, fresh.attempts, Utc::now())
        .await
        .unwrap();
    assert_eq!(store.recent(1).await.unwrap()[0].status, QueueStatus::Sent);

    common::cleanup(db).await;
}

#[tokio::test]
async fn notification_types_are_separate_queues() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let sms = PgNotificationOutbox::new(db.pool.clone(), Pipeline::Sms).unwrap();
    let telegram = PgNotificationOutbox::new(db.pool.clone(), Pipeline::Telegram).unwrap();

    sms.enqueue(text("+15550001", 3)).await.unwrap();
    sms.enqueue(text("+15550002", 3)).await.unwrap();
    telegram.enqueue(text("2001", 3)).await.unwrap();

    assert_eq!(sms.stats().await.unwrap().total, 2);
    assert_eq!(telegram.stats().await.unwrap().total, 1);
    assert_eq!(telegram.select_eligible(10).await.unwrap().len(), 1);
    assert_eq!(telegram.recent(10).await.unwrap()[0].recipient, "2001");

    assert!(PgNotificationOutbox::new(db.pool.clone(), Pipeline::Email).is_err());

    common::cleanup(db).await;
}

#[tokio::test]
async fn processor_drains_postgres_outbox() {
    let Some(db) = common::test_db().await else {
        return;
    };
    let store = Arc::new(PgEmailOutbox::new(db.pool.clone()));
    let primary = common::ScriptedChannel::new("email-primary");
    primary.set_failing(true);
    let fallback = common::ScriptedChannel::new("email-fallback");

    let processor = Processor::new(
        Pipeline::Email,
        store.clone(),
        common::chain(&[primary.clone(), fallback.clone()]),
        RetryPolicy::from_config(&QueueConfig {
            lease_duration: Duration::from_secs(60),
            ..QueueConfig::default()
        }),
    );

    store.enqueue(email("a@example.com")).await.unwrap();
    store.enqueue(email("b@example.com")).await.unwrap();

    let report = processor.process_batch(10).await.unwrap();
    assert_eq!(report.processed, 2);
    assert!(report.results.iter().all(|r| r.status == QueueStatus::Sent));
    assert_eq!(fallback.seen(), vec!["a@example.com", "b@example.com"]);

    let stats = processor.stats().await;
    assert_eq!(stats.status_counts.get("sent"), Some(&2));

    let report = processor.process_batch(10).await.unwrap();
    assert_eq!(report.processed, 0);

    common::cleanup(db).await;
}

#[tokio::test]
async fn only_active_templates_are_found() {
    let Some(db) = common::test_db().await else {
        return;
    };
    sqlx::query(
        "INSERT INTO email_templates (template_name, subject, html_content, is_active)
         VALUES ('family_invitation', 'Join {family_name}', '<p>{invitation_url}</p>', true),
                ('legacy_welcome', 'Welcome', '<p>Hi</p>', false)",
    )
    .execute(&db.pool)
    .await
    .unwrap();

    let templates = PgTemplates::new(db.pool.clone());
    let found = templates.find_active("family_invitation").await.unwrap().unwrap();
    assert_eq!(found.subject, "Join {family_name}");
    assert!(templates.find_active("legacy_welcome").await.unwrap().is_none());
    assert!(templates.find_active("missing").await.unwrap().is_none());

    common::cleanup(db).await;
}
