use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::{OutboxStore, QueueStats, StoreError};
use crate::channels::{ChannelChain, Receipt};
use crate::config::QueueConfig;
use crate::models::{Pipeline, QueueItem, QueueStatus};

/// Lease and backoff rules applied by a [`Processor`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub lease: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            lease: config.lease_duration,
            backoff_base: config.retry_backoff_base,
            backoff_max: config.retry_backoff_max,
        }
    }

    /// When an item that just failed its `attempts`-th try may run again.
    /// `None` keeps the current schedule.
    pub fn retry_at(&self, attempts: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.backoff_base.is_zero() {
            return None;
        }
        let exponent = u32::try_from(attempts.saturating_sub(1)).unwrap_or(0).min(20);
        let delay = self
            .backoff_base
            .saturating_mul(2u32.pow(exponent))
            .min(self.backoff_max);
        Some(now.checked_add_signed(to_delta(delay)).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or_else(|_| TimeDelta::days(365 * 100))
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub id: Uuid,
    pub recipient: String,
    pub status: QueueStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Receipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub message: String,
    pub processed: usize,
    pub skipped: usize,
    pub results: Vec<ItemOutcome>,
}

/// Drains one outbox through one channel chain.
pub struct Processor {
    pipeline: Pipeline,
    store: Arc<dyn OutboxStore>,
    chain: ChannelChain,
    policy: RetryPolicy,
}

impl Processor {
    pub fn new(
        pipeline: Pipeline,
        store: Arc<dyn OutboxStore>,
        chain: ChannelChain,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            pipeline,
            store,
            chain,
            policy,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        self.pipeline
    }

    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    pub fn chain(&self) -> &ChannelChain {
        &self.chain
    }

    /// Attempt up to `batch_size` eligible items, oldest first, one at a time.
    ///
    /// Only a failure to read the queue is returned as an error. Delivery and
    /// per-item write failures end up in the report.
    pub async fn process_batch(&self, batch_size: usize) -> Result<BatchReport, StoreError> {
        let label = self.pipeline.label();
        let cutoff = Utc::now()
            .checked_sub_signed(to_delta(self.policy.lease))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match self.store.release_expired(cutoff).await {
            Ok(0) => {}
            Ok(n) => tracing::warn!("Released {n} expired {label} lease(s)"),
            Err(e) => tracing::error!("Failed to release expired {label} leases: {e}"),
        }

        let items = self.store.select_eligible(batch_size).await?;

        if items.is_empty() {
            return Ok(BatchReport {
                message: format!("No pending {label} notifications"),
                processed: 0,
                skipped: 0,
                results: Vec::new(),
            });
        }

        tracing::info!("Processing {} {label} item(s)", items.len());

        let mut results = Vec::with_capacity(items.len());
        let mut skipped = 0;

        for item in items {
            match self.process_item(item).await {
                Some(outcome) => results.push(outcome),
                None => skipped += 1,
            }
        }

        Ok(BatchReport {
            message: format!("{} processing completed", self.pipeline.title()),
            processed: results.len(),
            skipped,
            results,
        })
    }

    /// `None` when another batch claimed the item first.
    async fn process_item(&self, item: QueueItem) -> Option<ItemOutcome> {
        let claimed = match self.store.claim(item.id).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                tracing::debug!("Queue item {} was claimed elsewhere, skipping", item.id);
                return None;
            }
            Err(e) => {
                tracing::error!("Failed to claim queue item {}: {e}", item.id);
                return Some(ItemOutcome {
                    id: item.id,
                    recipient: item.recipient,
                    status: item.status,
                    result: None,
                    error: Some(format!("Failed to record attempt: {e}")),
                });
            }
        };

        tracing::debug!(
            "Delivering queue item {} (attempt {}/{})",
            claimed.id,
            claimed.attempts,
            claimed.max_attempts
        );

        match self.chain.deliver(&claimed.recipient, &claimed.payload).await {
            Ok(receipt) => {
                // The message went out either way; a refused mark is reported
                // next to the receipt.
                let error = match self
                    .store
                    .mark_sent(claimed.id, claimed.attempts, Utc::now())
                    .await
                {
                    Ok(()) => None,
                    Err(e) => {
                        tracing::error!(
                            "Delivered queue item {} but failed to mark it sent: {e}",
                            claimed.id
                        );
                        Some(format!("Delivered but not recorded: {e}"))
                    }
                };
                Some(ItemOutcome {
                    id: claimed.id,
                    recipient: claimed.recipient,
                    status: QueueStatus::Sent,
                    result: Some(receipt),
                    error,
                })
            }
            Err(err) => {
                let status = QueueStatus::after_failure(claimed.attempts, claimed.max_attempts);
                let persisted = match status {
                    QueueStatus::Failed => {
                        tracing::warn!(
                            "Queue item {} failed permanently after {} attempt(s): {err}",
                            claimed.id,
                            claimed.attempts
                        );
                        self.store
                            .mark_failed(claimed.id, claimed.attempts, &err.message)
                            .await
                    }
                    _ => {
                        let retry_at = self.policy.retry_at(claimed.attempts, Utc::now());
                        self.store
                            .mark_retry(claimed.id, claimed.attempts, &err.message, retry_at)
                            .await
                    }
                };
                let error = match persisted {
                    Ok(()) => err.message,
                    Err(e) => {
                        tracing::error!("Failed to record failure of queue item {}: {e}", claimed.id);
                        format!("{}; not recorded: {e}", err.message)
                    }
                };
                Some(ItemOutcome {
                    id: claimed.id,
                    recipient: claimed.recipient,
                    status,
                    result: None,
                    error: Some(error),
                })
            }
        }
    }

    /// Counts by status. Read errors degrade to empty stats.
    pub async fn stats(&self) -> QueueStats {
        match self.store.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Failed to read {} queue stats: {e}", self.pipeline.label());
                QueueStats::default()
            }
        }
    }
}
