use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{NewItem, OutboxStore, QueueStats, StoreError, TemplateStore};
use crate::models::{EmailTemplate, QueueItem, QueueStatus};

/// Process-local outbox. Rows keep insertion order, so equal `created_at`
/// values still drain first-in first-out.
#[derive(Default)]
pub struct MemoryOutbox {
    items: Mutex<Vec<QueueItem>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fully formed item as-is.
    pub async fn insert(&self, item: QueueItem) {
        self.items.lock().await.push(item);
    }

    pub async fn get(&self, id: Uuid) -> Option<QueueItem> {
        self.items.lock().await.iter().find(|i| i.id == id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<QueueItem> {
        self.items.lock().await.clone()
    }

    async fn update_claimed<F>(&self, id: Uuid, attempt: i32, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut QueueItem),
    {
        let mut items = self.items.lock().await;
        let item = items
            .iter_mut()
            .find(|i| {
                i.id == id && i.attempts == attempt && i.status == QueueStatus::Processing
            })
            .ok_or(StoreError::LeaseLost(id))?;
        apply(item);
        item.claimed_at = None;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryOutbox {
    async fn select_eligible(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let now = Utc::now();
        let items = self.items.lock().await;
        let mut eligible: Vec<QueueItem> =
            items.iter().filter(|i| i.is_eligible(now)).cloned().collect();
        eligible.sort_by_key(|i| i.created_at);
        eligible.truncate(limit);
        Ok(eligible)
    }

    async fn claim(&self, id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        let now = Utc::now();
        let mut items = self.items.lock().await;
        let Some(item) = items.iter_mut().find(|i| i.id == id) else {
            return Ok(None);
        };
        if !item.is_eligible(now) {
            return Ok(None);
        }
        item.attempts += 1;
        item.status = QueueStatus::Processing;
        item.claimed_at = Some(now);
        Ok(Some(item.clone()))
    }

    async fn mark_sent(&self, id: Uuid, attempt: i32, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update_claimed(id, attempt, |item| {
            item.status = QueueStatus::Sent;
            item.sent_at = Some(at);
            item.error_message = None;
        })
        .await
    }

    async fn mark_failed(&self, id: Uuid, attempt: i32, reason: &str) -> Result<(), StoreError> {
        self.update_claimed(id, attempt, |item| {
            item.status = QueueStatus::Failed;
            item.error_message = Some(reason.to_string());
        })
        .await
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempt: i32,
        reason: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.update_claimed(id, attempt, |item| {
            item.status = QueueStatus::Pending;
            item.error_message = Some(reason.to_string());
            if let Some(at) = retry_at {
                item.scheduled_at = at;
            }
        })
        .await
    }

    async fn release_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut items = self.items.lock().await;
        let mut released = 0;
        for item in items.iter_mut() {
            let expired = item.status == QueueStatus::Processing
                && item.claimed_at.is_some_and(|at| at < cutoff);
            if expired {
                item.status = QueueStatus::after_failure(item.attempts, item.max_attempts);
                item.error_message = Some("Delivery lease expired before completion".to_string());
                item.claimed_at = None;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn stats(&self) -> Result<QueueStats, StoreError> {
        let items = self.items.lock().await;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for item in items.iter() {
            *counts.entry(item.status.as_str().to_string()).or_default() += 1;
        }
        Ok(QueueStats::from_counts(counts))
    }

    async fn enqueue(&self, item: NewItem) -> Result<QueueItem, StoreError> {
        let now = Utc::now();
        let queued = QueueItem {
            id: Uuid::now_v7(),
            recipient: item.recipient,
            payload: item.payload,
            template_name: item.template_name,
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: item.max_attempts,
            scheduled_at: item.scheduled_at.unwrap_or(now),
            claimed_at: None,
            sent_at: None,
            error_message: None,
            created_at: now,
        };
        self.items.lock().await.push(queued.clone());
        Ok(queued)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<QueueItem>, StoreError> {
        let items = self.items.lock().await;
        let mut recent: Vec<QueueItem> = items.iter().rev().cloned().collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit);
        Ok(recent)
    }
}

#[derive(Default)]
pub struct MemoryTemplates {
    templates: Mutex<HashMap<String, EmailTemplate>>,
}

impl MemoryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, template: EmailTemplate) {
        self.templates
            .lock()
            .await
            .insert(template.template_name.clone(), template);
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplates {
    async fn find_active(&self, name: &str) -> Result<Option<EmailTemplate>, StoreError> {
        Ok(self
            .templates
            .lock()
            .await
            .get(name)
            .filter(|t| t.is_active)
            .cloned())
    }
}
