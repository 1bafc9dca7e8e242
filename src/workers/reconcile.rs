//! Reconcile worker: resolves bets stuck in `processing`
//!
//! A request that dies between the reservation and the final commit leaves
//! its bet in `processing`, and every replay of its key reports that bet.
//! Once a reservation is older than the stale window the worker re-issues
//! the debit under the same idempotency key and either settles the bet or
//! releases the key.

use super::{TickReport, Worker};
use crate::games::settlement::{Reconciliation, SettlementPipeline};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub struct ReconcileWorker {
    store: Arc<dyn Store>,
    pipeline: Arc<SettlementPipeline>,
    interval: Duration,
    stale_after: chrono::Duration,
}

impl ReconcileWorker {
    pub fn new(
        store: Arc<dyn Store>,
        pipeline: Arc<SettlementPipeline>,
        interval: Duration,
        stale_after: chrono::Duration,
    ) -> Self {
        Self {
            store,
            pipeline,
            interval,
            stale_after,
        }
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let stale = match self.store.stale_reservations(now - self.stale_after).await {
            Ok(stale) => stale,
            Err(e) => {
                error!(error = %e, "Failed to load stale reservations");
                return report;
            }
        };

        for bet in stale {
            report.attempted += 1;
            let bet_id = bet.id;
            match self.pipeline.reconcile(bet).await {
                Ok(Reconciliation::Settled(_) | Reconciliation::Released(_)) => report.succeeded += 1,
                // Finished by its own request between the scan and now
                Ok(Reconciliation::AlreadyFinal(_)) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(bet_id, error = %e, "Reservation still unresolved");
                }
            }
        }
        report
    }
}

#[async_trait]
impl Worker for ReconcileWorker {
    fn name(&self) -> &'static str {
        "reconcile"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) -> TickReport {
        self.run_once_at(Utc::now()).await
    }
}
