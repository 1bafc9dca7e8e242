//! Outbox worker: retries owed payouts until the wallet accepts them
//!
//! Every attempt credits under `bet-<bet_id>-retry-<outbox_id>`, so a retry
//! after a lost response is replayed by the wallet instead of paid twice.
//! There is no attempt limit.

use super::{TickReport, Worker};
use crate::events::EventBus;
use crate::metrics::SettlementMetrics;
use crate::models::{NewWebhookEvent, OutboxEntry};
use crate::store::Store;
use crate::wallet::Wallet;
use crate::webhook::settlement_notification;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const SETTLEMENT_SUCCESS_EVENT: &str = "settlement.success";
pub const SETTLEMENT_FAILED_EVENT: &str = "settlement.failed";

pub struct OutboxWorker {
    store: Arc<dyn Store>,
    wallet: Arc<dyn Wallet>,
    bus: EventBus,
    metrics: Arc<SettlementMetrics>,
    interval: Duration,
}

impl OutboxWorker {
    pub fn new(
        store: Arc<dyn Store>,
        wallet: Arc<dyn Wallet>,
        bus: EventBus,
        metrics: Arc<SettlementMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            wallet,
            bus,
            metrics,
            interval,
        }
    }

    pub async fn run_once(&self) -> TickReport {
        let mut report = TickReport::default();

        let entries = match self.store.pending_outbox().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "Failed to load pending outbox entries");
                return report;
            }
        };

        for entry in entries {
            report.attempted += 1;
            if self.retry(&entry).await {
                report.succeeded += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// One payout attempt. Failures stay queued for the next tick.
    async fn retry(&self, entry: &OutboxEntry) -> bool {
        let credit_key = entry.credit_key();
        let credited = match self.wallet.credit(entry.player_id, entry.amount, &credit_key).await {
            Ok(receipt) if receipt.success => Ok(()),
            Ok(_) => Err("credit declined".to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(reason) = credited {
            warn!(outbox_id = entry.id, bet_id = entry.bet_id, reason = %reason, "Payout retry failed");
            self.metrics.record_outbox_attempt(false);
            self.bus.publish(
                entry.operator_id,
                SETTLEMENT_FAILED_EVENT,
                json!({
                    "outbox_id": entry.id,
                    "bet_id": entry.bet_id,
                    "error": reason,
                }),
            );
            return false;
        }

        let bet = match self.store.settle_outbox(entry.id).await {
            Ok(Some(bet)) => bet,
            Ok(None) => {
                info!(outbox_id = entry.id, "Outbox entry already settled");
                return true;
            }
            Err(e) => {
                // The credit is keyed; the next tick replays it at the wallet.
                error!(outbox_id = entry.id, bet_id = entry.bet_id, error = %e, "Failed to record settled payout");
                self.metrics.record_outbox_attempt(false);
                return false;
            }
        };

        self.metrics.record_outbox_attempt(true);
        info!(outbox_id = entry.id, bet_id = bet.id, amount = entry.amount, "Pending payout settled");

        if let Some((event_type, payload)) = settlement_notification(&bet) {
            let queued = self
                .store
                .insert_webhook_event(NewWebhookEvent {
                    operator_id: Some(bet.operator_id),
                    event_type: event_type.to_string(),
                    payload,
                })
                .await;
            if let Err(e) = queued {
                warn!(bet_id = bet.id, error = %e, "Failed to queue settlement webhook");
            }
        }

        self.bus.publish(
            bet.operator_id,
            SETTLEMENT_SUCCESS_EVENT,
            json!({
                "outbox_id": entry.id,
                "bet_id": bet.id,
                "player_id": bet.player_id,
                "amount": entry.amount,
            }),
        );
        true
    }
}

#[async_trait]
impl Worker for OutboxWorker {
    fn name(&self) -> &'static str {
        "outbox"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> TickReport {
        self.run_once().await
    }
}
