#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use outboxer::channels::{ChannelChain, DeliveryChannel, DeliveryError, Receipt};
use outboxer::config::{Config, QueueConfig};
use outboxer::models::{Payload, Pipeline, QueueItem};
use outboxer::outbox::memory::{MemoryOutbox, MemoryTemplates};
use outboxer::outbox::{
    NewItem, OutboxStore, Processor, QueueRegistry, QueueStats, RetryPolicy, StoreError,
};

/// A channel whose outcome the test controls. Records every recipient.
pub struct ScriptedChannel {
    id: String,
    failing: AtomicBool,
    seen: Mutex<Vec<String>>,
}

impl ScriptedChannel {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            failing: AtomicBool::new(false),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for ScriptedChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn attempt_delivery(
        &self,
        recipient: &str,
        _payload: &Payload,
    ) -> Result<Receipt, DeliveryError> {
        self.seen.lock().unwrap().push(recipient.to_string());
        if self.failing.load(Ordering::SeqCst) {
            Err(DeliveryError::from(format!("{} unavailable", self.id)))
        } else {
            Ok(Receipt {
                channel: self.id.clone(),
                message_id: Some(format!("{}-{}", self.id, recipient)),
            })
        }
    }
}

/// A store whose database is unreachable. Counts attempted claims, marks and
/// inserts; lease release fails like a read.
#[derive(Default)]
pub struct OfflineOutbox {
    pub writes: AtomicUsize,
}

impl OfflineOutbox {
    fn down<T>(&self) -> Result<T, StoreError> {
        Err(StoreError::Database(sqlx::Error::PoolTimedOut))
    }

    fn write<T>(&self) -> Result<T, StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.down()
    }
}

#[async_trait]
impl OutboxStore for OfflineOutbox {
    async fn select_eligible(&self, _limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        self.down()
    }

    async fn claim(&self, _id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        self.write()
    }

    async fn mark_sent(&self, _id: Uuid, _attempt: i32, _at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write()
    }

    async fn mark_failed(&self, _id: Uuid, _attempt: i32, _reason: &str) -> Result<(), StoreError> {
        self.write()
    }

    async fn mark_retry(
        &self,
        _id: Uuid,
        _attempt: i32,
        _reason: &str,
        _retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.write()
    }

    async fn release_expired(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.down()
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        self.down()
    }

    async fn enqueue(&self, _item: NewItem) -> Result<QueueItem, StoreError> {
        self.write()
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        self.down()
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        max_body_size: 262_144,
        log_level: "warn".to_string(),
        queue: QueueConfig::default(),
        channel_timeout: Duration::from_secs(2),
        log_fallback: false,
        email_api: None,
        smtp: None,
        sms: None,
        telegram: None,
    }
}

pub fn chain(channels: &[Arc<ScriptedChannel>]) -> ChannelChain {
    let channels: Vec<Arc<dyn DeliveryChannel>> = channels
        .iter()
        .map(|c| c.clone() as Arc<dyn DeliveryChannel>)
        .collect();
    ChannelChain::new(channels, Duration::from_secs(2))
}

/// A running server backed by in-memory outboxes and scripted channels.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub email_store: Arc<MemoryOutbox>,
    pub sms_store: Arc<MemoryOutbox>,
    pub telegram_store: Arc<MemoryOutbox>,
    pub templates: Arc<MemoryTemplates>,
    pub email_primary: Arc<ScriptedChannel>,
    pub email_fallback: Arc<ScriptedChannel>,
    pub sms_channel: Arc<ScriptedChannel>,
    pub telegram_channel: Arc<ScriptedChannel>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn get(&self, path: &str) -> (Value, StatusCode) {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("get request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> (Value, StatusCode) {
        let mut req = self.client.post(self.url(path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.expect("post request failed");
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(json!(null));
        (body, status)
    }

    /// Trigger one batch for a pipeline.
    pub async fn process(&self, pipeline: &str) -> (Value, StatusCode) {
        self.post(&format!("/api/v1/queues/{pipeline}"), None).await
    }

    pub async fn stats(&self, pipeline: &str) -> Value {
        let (body, status) = self.get(&format!("/api/v1/queues/{pipeline}")).await;
        assert_eq!(status, StatusCode::OK, "stats non-200: {body}");
        body
    }

    /// Queue an email, return the created item.
    pub async fn enqueue_email(&self, to: &str, subject: &str) -> Value {
        let (body, status) = self
            .post(
                "/api/v1/queues/email/items",
                Some(&json!({
                    "to_email": to,
                    "subject": subject,
                    "html_content": format!("<p>{subject}</p>"),
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "enqueue email failed: {body}");
        body["item"].clone()
    }

    /// Queue a text message on `sms` or `telegram`, return the created item.
    pub async fn enqueue_text(&self, pipeline: &str, to: &str, message: &str, max_attempts: i32) -> Value {
        let (body, status) = self
            .post(
                &format!("/api/v1/queues/{pipeline}/items"),
                Some(&json!({
                    "recipient_phone": to,
                    "message_content": message,
                    "max_attempts": max_attempts,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "enqueue {pipeline} failed: {body}");
        body["item"].clone()
    }
}

/// Spawn the app on a random port with fresh in-memory outboxes.
pub async fn spawn_app() -> TestApp {
    let email_store = Arc::new(MemoryOutbox::new());
    spawn_with_email_outbox(email_store.clone(), email_store).await
}

/// Like [`spawn_app`], but the email pipeline runs on `outbox`.
/// `TestApp::email_store` is then a detached, empty store.
pub async fn spawn_app_with_email_outbox(outbox: Arc<dyn OutboxStore>) -> TestApp {
    spawn_with_email_outbox(outbox, Arc::new(MemoryOutbox::new())).await
}

async fn spawn_with_email_outbox(
    email_outbox: Arc<dyn OutboxStore>,
    email_store: Arc<MemoryOutbox>,
) -> TestApp {
    let sms_store = Arc::new(MemoryOutbox::new());
    let telegram_store = Arc::new(MemoryOutbox::new());
    let templates = Arc::new(MemoryTemplates::new());

    let email_primary = ScriptedChannel::new("email-primary");
    let email_fallback = ScriptedChannel::new("email-fallback");
    let sms_channel = ScriptedChannel::new("sms-gateway");
    let telegram_channel = ScriptedChannel::new("telegram");

    let config = test_config();
    let policy = RetryPolicy::from_config(&config.queue);

    let queues = QueueRegistry::new(
        Processor::new(
            Pipeline::Email,
            email_outbox,
            chain(&[email_primary.clone(), email_fallback.clone()]),
            policy.clone(),
        ),
        Processor::new(
            Pipeline::Sms,
            sms_store.clone(),
            chain(&[sms_channel.clone()]),
            policy.clone(),
        ),
        Processor::new(
            Pipeline::Telegram,
            telegram_store.clone(),
            chain(&[telegram_channel.clone()]),
            policy,
        ),
    );

    let app = outboxer::build_app(config, queues, templates.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Server failed");
    });

    TestApp {
        addr,
        client: Client::new(),
        email_store,
        sms_store,
        telegram_store,
        templates,
        email_primary,
        email_fallback,
        sms_channel,
        telegram_channel,
    }
}

/// A throwaway Postgres database with migrations applied.
pub struct TestDb {
    pub pool: PgPool,
    pub db_name: String,
    admin_url: String,
}

/// Create a fresh database when `DATABASE_URL` is set. Returns `None` otherwise,
/// so database tests are skipped on machines without Postgres.
pub async fn test_db() -> Option<TestDb> {
    let _ = dotenvy::dotenv();

    let Ok(base_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres test");
        return None;
    };

    let db_name = format!("outboxer_test_{}", Uuid::now_v7().simple());

    let admin_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/postgres"))
        .unwrap_or_else(|| base_url.clone());

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&admin_url)
        .await
        .expect("Failed to connect to postgres for test DB creation");

    sqlx::query(&format!("CREATE DATABASE \"{db_name}\""))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test database");

    admin_pool.close().await;

    let test_url = base_url
        .rsplit_once('/')
        .map(|(base, _)| format!("{base}/{db_name}"))
        .unwrap_or_else(|| base_url.clone());

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&test_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations on test database");

    Some(TestDb {
        pool,
        db_name,
        admin_url,
    })
}

/// Drop the test database.
pub async fn cleanup(db: TestDb) {
    db.pool.close().await;

    let admin_pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&db.admin_url)
        .await
        .expect("Failed to connect for cleanup");

    let _ = sqlx::query(&format!(
        "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
        db.db_name
    ))
    .execute(&admin_pool)
    .await;

    admin_pool.close().await;
}
