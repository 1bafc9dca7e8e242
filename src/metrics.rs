//! Settlement counters rendered in Prometheus text format

use crate::events::EventBusStats;
use crate::models::BetStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug)]
pub struct SettlementMetrics {
    start_time: Instant,
    bets_won: AtomicU64,
    bets_lost: AtomicU64,
    bets_pending: AtomicU64,
    bets_replayed: AtomicU64,
    bets_declined: AtomicU64,
    wallet_failures: AtomicU64,
    outbox_settled: AtomicU64,
    outbox_failed: AtomicU64,
    reservations_settled: AtomicU64,
    reservations_released: AtomicU64,
    webhooks_delivered: AtomicU64,
    webhooks_retried: AtomicU64,
    webhooks_failed: AtomicU64,
}

impl Default for SettlementMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            bets_won: AtomicU64::new(0),
            bets_lost: AtomicU64::new(0),
            bets_pending: AtomicU64::new(0),
            bets_replayed: AtomicU64::new(0),
            bets_declined: AtomicU64::new(0),
            wallet_failures: AtomicU64::new(0),
            outbox_settled: AtomicU64::new(0),
            outbox_failed: AtomicU64::new(0),
            reservations_settled: AtomicU64::new(0),
            reservations_released: AtomicU64::new(0),
            webhooks_delivered: AtomicU64::new(0),
            webhooks_retried: AtomicU64::new(0),
            webhooks_failed: AtomicU64::new(0),
        }
    }

    pub fn record_settlement(&self, status: BetStatus) {
        let counter = match status {
            BetStatus::Won => &self.bets_won,
            BetStatus::Lost => &self.bets_lost,
            BetStatus::PendingSettlement => &self.bets_pending,
            BetStatus::Processing => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.bets_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decline(&self) {
        self.bets_declined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wallet_failure(&self) {
        self.wallet_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outbox_attempt(&self, settled: bool) {
        if settled {
            self.outbox_settled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.outbox_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A stale reservation was either settled or had its key released
    pub fn record_reconciliation(&self, settled: bool) {
        if settled {
            self.reservations_settled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.reservations_released.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_webhook_delivered(&self) {
        self.webhooks_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_webhook_retry(&self) {
        self.webhooks_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_webhook_failed(&self) {
        self.webhooks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bets_settled(&self, status: BetStatus) -> u64 {
        match status {
            BetStatus::Won => self.bets_won.load(Ordering::Relaxed),
            BetStatus::Lost => self.bets_lost.load(Ordering::Relaxed),
            BetStatus::PendingSettlement => self.bets_pending.load(Ordering::Relaxed),
            BetStatus::Processing => 0,
        }
    }

    pub fn webhooks_delivered(&self) -> u64 {
        self.webhooks_delivered.load(Ordering::Relaxed)
    }

    pub fn webhooks_failed(&self) -> u64 {
        self.webhooks_failed.load(Ordering::Relaxed)
    }

    pub fn outbox_settled(&self) -> u64 {
        self.outbox_settled.load(Ordering::Relaxed)
    }

    pub fn reservations_released(&self) -> u64 {
        self.reservations_released.load(Ordering::Relaxed)
    }

    /// Prometheus exposition text, including event bus counters
    pub fn to_prometheus_format(&self, bus: EventBusStats) -> String {
        let mut output = String::new();

        output.push_str(
            "# HELP rgs_bets_settled_total Bets settled by final status\n\
             # TYPE rgs_bets_settled_total counter\n",
        );
        for status in [BetStatus::Won, BetStatus::Lost, BetStatus::PendingSettlement] {
            output.push_str(&format!(
                "rgs_bets_settled_total{{status=\"{}\"}} {}\n",
                status,
                self.bets_settled(status)
            ));
        }

        let counters = [
            ("rgs_bets_replayed_total", "Idempotent bet replays", self.bets_replayed.load(Ordering::Relaxed)),
            ("rgs_bets_declined_total", "Bets declined before settlement", self.bets_declined.load(Ordering::Relaxed)),
            ("rgs_wallet_failures_total", "Wallet calls that failed or timed out", self.wallet_failures.load(Ordering::Relaxed)),
            ("rgs_outbox_settled_total", "Outbox payouts credited", self.outbox_settled.load(Ordering::Relaxed)),
            ("rgs_outbox_failed_total", "Outbox payout attempts that failed", self.outbox_failed.load(Ordering::Relaxed)),
            ("rgs_reservations_settled_total", "Stale reservations settled by reconciliation", self.reservations_settled.load(Ordering::Relaxed)),
            ("rgs_reservations_released_total", "Stale reservations released after a declined debit", self.reservations_released.load(Ordering::Relaxed)),
            ("rgs_webhooks_delivered_total", "Webhooks delivered", self.webhooks_delivered.load(Ordering::Relaxed)),
            ("rgs_webhooks_retried_total", "Webhook deliveries scheduled for retry", self.webhooks_retried.load(Ordering::Relaxed)),
            ("rgs_webhooks_failed_total", "Webhooks marked failed", self.webhooks_failed.load(Ordering::Relaxed)),
            ("rgs_events_published_total", "Event bus publishes", bus.published),
            ("rgs_events_dropped_total", "Event deliveries dropped on full subscriber channels", bus.dropped),
        ];
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }

        output.push_str(&format!(
            "# HELP rgs_event_subscribers Open event stream subscribers\n\
             # TYPE rgs_event_subscribers gauge\n\
             rgs_event_subscribers {}\n",
            bus.subscribers
        ));

        output.push_str(&format!(
            "# HELP rgs_uptime_seconds Process uptime\n\
             # TYPE rgs_uptime_seconds gauge\n\
             rgs_uptime_seconds {}\n",
            self.start_time.elapsed().as_secs()
        ));

        output
    }
}
