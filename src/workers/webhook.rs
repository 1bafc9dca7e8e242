//! Webhook worker: delivers queued operator notifications
//!
//! Due events are claimed with a conditional pending -> processing update,
//! so several workers can share a store without double delivery. Failed
//! attempts back off on a fixed schedule; an event older than the expiry
//! window fails terminally whatever its retry count.

use super::{TickReport, Worker};
use crate::events::EventBus;
use crate::metrics::SettlementMetrics;
use crate::models::{Operator, WebhookEvent};
use crate::store::Store;
use crate::webhook::{next_retry_delay, WebhookSender};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const WEBHOOK_DELIVERED_EVENT: &str = "webhook.delivered";
pub const WEBHOOK_RETRY_EVENT: &str = "webhook.retry";
pub const WEBHOOK_FAILED_EVENT: &str = "webhook.failed";

pub const RETRY_WINDOW_EXCEEDED: &str = "retry window exceeded";

pub struct WebhookWorker {
    store: Arc<dyn Store>,
    sender: Arc<dyn WebhookSender>,
    bus: EventBus,
    metrics: Arc<SettlementMetrics>,
    interval: Duration,
    expiry: chrono::Duration,
}

enum Delivery {
    Delivered,
    Retry(String),
    Failed(String),
}

impl WebhookWorker {
    pub fn new(
        store: Arc<dyn Store>,
        sender: Arc<dyn WebhookSender>,
        bus: EventBus,
        metrics: Arc<SettlementMetrics>,
        interval: Duration,
        expiry: chrono::Duration,
    ) -> Self {
        Self {
            store,
            sender,
            bus,
            metrics,
            interval,
            expiry,
        }
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let due = match self.store.due_webhook_events(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "Failed to load due webhook events");
                return report;
            }
        };

        for candidate in due {
            let event = match self.store.claim_webhook_event(candidate.id).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    debug!(event_id = candidate.id, "Webhook event claimed elsewhere");
                    continue;
                }
                Err(e) => {
                    error!(event_id = candidate.id, error = %e, "Failed to claim webhook event");
                    continue;
                }
            };

            report.attempted += 1;
            match self.deliver(&event, now).await {
                Delivery::Delivered => {
                    report.succeeded += 1;
                    self.complete(&event).await;
                }
                Delivery::Retry(reason) => {
                    report.failed += 1;
                    self.reschedule(&event, now, &reason).await;
                }
                Delivery::Failed(reason) => {
                    report.failed += 1;
                    self.fail(&event, &reason).await;
                }
            }
        }
        report
    }

    async fn deliver(&self, event: &WebhookEvent, now: DateTime<Utc>) -> Delivery {
        let operator = match self.resolve_operator(event).await {
            Ok(operator) => operator,
            Err(reason) => return Delivery::Failed(reason),
        };
        let url = match operator.webhook_url.as_deref() {
            Some(url) if !url.trim().is_empty() => url,
            _ => return Delivery::Failed(format!("operator {} has no webhook url", operator.id)),
        };

        if now - event.created_at > self.expiry {
            return Delivery::Failed(RETRY_WINDOW_EXCEEDED.to_string());
        }

        match self.sender.send(url, &operator.webhook_secret, &event.payload).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => Delivery::Retry(e.to_string()),
        }
    }

    /// Any lookup problem is terminal for the event.
    async fn resolve_operator(&self, event: &WebhookEvent) -> Result<Operator, String> {
        let operator_id = event
            .operator_id
            .ok_or_else(|| "event has no operator".to_string())?;
        match self.store.operator(operator_id).await {
            Ok(Some(operator)) => Ok(operator),
            Ok(None) => Err(format!("operator {} not found", operator_id)),
            Err(e) => Err(format!("operator {} lookup failed: {}", operator_id, e)),
        }
    }

    async fn complete(&self, event: &WebhookEvent) {
        if let Err(e) = self.store.mark_webhook_completed(event.id).await {
            error!(event_id = event.id, error = %e, "Failed to mark webhook completed");
            return;
        }
        self.metrics.record_webhook_delivered();
        info!(event_id = event.id, event_type = %event.event_type, retries = event.retries, "Webhook delivered");
        self.publish(event, WEBHOOK_DELIVERED_EVENT, None);
    }

    async fn reschedule(&self, event: &WebhookEvent, now: DateTime<Utc>, reason: &str) {
        let next_retry_at = now + next_retry_delay(event.retries);
        let rescheduled = match self.store.schedule_webhook_retry(event.id, next_retry_at, reason).await {
            Ok(rescheduled) => rescheduled,
            Err(e) => {
                error!(event_id = event.id, error = %e, "Failed to schedule webhook retry");
                return;
            }
        };
        self.metrics.record_webhook_retry();
        warn!(
            event_id = event.id,
            retries = rescheduled.retries,
            next_retry_at = %next_retry_at,
            reason,
            "Webhook delivery failed, will retry"
        );
        self.publish(&rescheduled, WEBHOOK_RETRY_EVENT, Some(reason));
    }

    async fn fail(&self, event: &WebhookEvent, reason: &str) {
        if let Err(e) = self.store.mark_webhook_failed(event.id, reason).await {
            error!(event_id = event.id, error = %e, "Failed to mark webhook failed");
            return;
        }
        self.metrics.record_webhook_failed();
        warn!(event_id = event.id, reason, "Webhook event failed");
        self.publish(event, WEBHOOK_FAILED_EVENT, Some(reason));
    }

    fn publish(&self, event: &WebhookEvent, event_type: &str, error: Option<&str>) {
        let Some(operator_id) = event.operator_id else {
            return;
        };
        self.bus.publish(
            operator_id,
            event_type,
            json!({
                "webhook_id": event.id,
                "event_type": event.event_type,
                "retries": event.retries,
                "error": error,
            }),
        );
    }
}

#[async_trait]
impl Worker for WebhookWorker {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> TickReport {
        self.run_once_at(Utc::now()).await
    }
}
