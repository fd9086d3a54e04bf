//! Delivery dispatcher
//!
//! Claims due queue entries and routes each to its channel transport.
//! Failures retry with exponential backoff until the attempt budget runs
//! out; every attempt outcome lands in the write-once log.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use procura_database::NotificationQueueStore;
use procura_models::{
    retry_backoff, DeliveryOutcome, NotificationChannel, NotificationLog,
    NotificationQueueEntry,
};
use procura_utils::ProcuraResult;

use crate::smtp_client::NotificationTransport;

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct DispatchSummary {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

pub struct Dispatcher {
    queue: Arc<dyn NotificationQueueStore>,
    transports: HashMap<NotificationChannel, Arc<dyn NotificationTransport>>,
    backoff_base_seconds: u64,
    batch_size: usize,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn NotificationQueueStore>,
        transports: Vec<Arc<dyn NotificationTransport>>,
        backoff_base_seconds: u64,
        batch_size: usize,
    ) -> Self {
        let transports = transports
            .into_iter()
            .map(|t| (t.channel(), t))
            .collect();
        Self {
            queue,
            transports,
            backoff_base_seconds,
            batch_size,
        }
    }

    /// One dispatch cycle: claim due entries, deliver, settle each outcome.
    pub async fn run_once(&self, now: DateTime<Utc>) -> ProcuraResult<DispatchSummary> {
        let batch = self.queue.claim_batch(self.batch_size, now).await?;
        let mut summary = DispatchSummary {
            claimed: batch.len(),
            ..Default::default()
        };

        for entry in batch {
            match self.deliver(&entry).await {
                Ok(detail) => {
                    self.queue.mark_sent(entry.queue_id).await?;
                    self.queue
                        .append_log(NotificationLog::for_entry(
                            &entry,
                            DeliveryOutcome::Sent,
                            Some(detail),
                        ))
                        .await?;
                    summary.sent += 1;
                    tracing::info!(
                        queue_id = %entry.queue_id,
                        recipient = %entry.recipient_email,
                        channel = %entry.channel,
                        "Notification delivered"
                    );
                }
                Err(error) => {
                    let message = format!("{error:#}");
                    self.queue
                        .append_log(NotificationLog::for_entry(
                            &entry,
                            DeliveryOutcome::Failed,
                            Some(message.clone()),
                        ))
                        .await?;

                    let attempt = entry.attempts + 1;
                    if attempt >= entry.max_attempts {
                        self.queue.mark_failed(entry.queue_id, &message).await?;
                        summary.failed += 1;
                        tracing::error!(
                            queue_id = %entry.queue_id,
                            recipient = %entry.recipient_email,
                            attempt,
                            error = %message,
                            "Notification failed terminally"
                        );
                    } else {
                        let retry_at = now + retry_backoff(self.backoff_base_seconds, attempt);
                        self.queue
                            .release_for_retry(entry.queue_id, &message, retry_at)
                            .await?;
                        summary.retried += 1;
                        tracing::warn!(
                            queue_id = %entry.queue_id,
                            recipient = %entry.recipient_email,
                            attempt,
                            retry_at = %retry_at,
                            error = %message,
                            "Notification delivery failed, scheduled retry"
                        );
                    }
                }
            }
        }

        Ok(summary)
    }

    async fn deliver(&self, entry: &NotificationQueueEntry) -> anyhow::Result<String> {
        let transport = self
            .transports
            .get(&entry.channel)
            .ok_or_else(|| anyhow::anyhow!("no transport registered for channel {}", entry.channel))?;
        transport.deliver(entry).await
    }
}
