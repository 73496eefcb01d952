//! Outbox storage and the batch processor that drains it.
//!
//! Every pipeline (email, SMS, Telegram) owns one [`OutboxStore`]. The store
//! only promises per-row atomic updates; the processor builds the delivery
//! state machine on top of them:
//!
//! ```text
//! pending --claim--> processing --delivered--> sent
//!    ^                   |
//!    +----attempts left--+--exhausted--> failed
//! ```
//!
//! A claim counts the attempt and takes a lease in a single conditional
//! update, so two overlapping batches never claim the same item at once.
//! Leases that outlive a crashed batch are released at the start of the next
//! one. The attempt number doubles as the claim token: marks from a batch
//! whose lease was released and re-claimed no longer match and are refused.
//! The lease must outlast a full pass through the channel chain, which
//! `Config::from_env` enforces.

pub mod memory;
pub mod postgres;
pub mod processor;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{EmailTemplate, Payload, Pipeline, QueueItem};

pub use processor::{BatchReport, ItemOutcome, Processor, RetryPolicy};

#[derive(Debug)]
pub enum StoreError {
    Database(sqlx::Error),
    Corrupt(String),
    InvalidPayload(String),
    LeaseLost(Uuid),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(err) => write!(f, "Database error: {err}"),
            StoreError::Corrupt(msg) => write!(f, "Corrupt queue row: {msg}"),
            StoreError::InvalidPayload(msg) => write!(f, "Invalid payload: {msg}"),
            StoreError::LeaseLost(id) => write!(f, "Item {id} is no longer claimed by this batch"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err)
    }
}

/// A notification a producer wants delivered.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub recipient: String,
    pub payload: Payload,
    pub template_name: Option<String>,
    pub max_attempts: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewItem {
    pub fn validate(&self) -> Result<(), String> {
        if self.recipient.trim().is_empty() {
            return Err("Recipient is required".to_string());
        }
        if self.max_attempts < 1 {
            return Err("max_attempts must be at least 1".to_string());
        }
        match &self.payload {
            Payload::Email {
                subject,
                html_content,
                ..
            } => {
                if subject.trim().is_empty() {
                    return Err("Subject is required".to_string());
                }
                if html_content.trim().is_empty() {
                    return Err("html_content is required".to_string());
                }
            }
            Payload::Text { message_content } => {
                if message_content.trim().is_empty() {
                    return Err("message_content is required".to_string());
                }
            }
        }
        Ok(())
    }
}

/// Item counts by status, as shown to operators.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct QueueStats {
    pub total: i64,
    #[serde(rename = "statusCounts")]
    pub status_counts: BTreeMap<String, i64>,
}

impl QueueStats {
    pub fn from_counts(counts: impl IntoIterator<Item = (String, i64)>) -> Self {
        let status_counts: BTreeMap<String, i64> = counts.into_iter().collect();
        let total = status_counts.values().sum();
        Self {
            total,
            status_counts,
        }
    }
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Up to `limit` eligible items, oldest first.
    async fn select_eligible(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError>;

    /// Increment `attempts` and take the lease. `None` if the item is no longer eligible.
    async fn claim(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError>;

    /// The mark operations take the `attempts` value returned by [`claim`]
    /// and fail with [`StoreError::LeaseLost`] once that claim is gone.
    ///
    /// [`claim`]: OutboxStore::claim
    async fn mark_sent(&self, id: Uuid, attempt: i32, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn mark_failed(&self, id: Uuid, attempt: i32, reason: &str) -> Result<(), StoreError>;

    /// Back to `pending`. `retry_at` pushes `scheduled_at` forward when set.
    async fn mark_retry(
        &self,
        id: Uuid,
        attempt: i32,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Release leases taken before `cutoff`. Returns the number of items released.
    async fn release_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn stats(&self) -> Result<QueueStats, StoreError>;

    async fn enqueue(&self, item: NewItem) -> Result<QueueItem, StoreError>;

    /// Newest items first.
    async fn recent(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError>;
}

#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn find_active(&self, name: &str) -> Result<Option<EmailTemplate>, StoreError>;
}

/// One processor per pipeline.
pub struct QueueRegistry {
    email: Arc<Processor>,
    sms: Arc<Processor>,
    telegram: Arc<Processor>,
}

impl QueueRegistry {
    pub fn new(email: Processor, sms: Processor, telegram: Processor) -> Self {
        Self {
            email: Arc::new(email),
            sms: Arc::new(sms),
            telegram: Arc::new(telegram),
        }
    }

    pub fn get(&self, pipeline: Pipeline) -> &Arc<Processor> {
        match pipeline {
            Pipeline::Email => &self.email,
            Pipeline::Sms => &self.sms,
            Pipeline::Telegram => &self.telegram,
        }
    }
}
