//! Bet settlement pipeline
//!
//! `place_bet` draws a provably-fair outcome and moves money through the
//! remote wallet with at most one debit per (operator, idempotency key).
//! The wallet is never called while a store write is open: the bet is
//! reserved first, the debit runs, and the result is committed in a second
//! unit of work (or the reservation is discarded). Bus events and webhook
//! rows are emitted only after the final commit. A reservation that never
//! got that far is picked up later by `reconcile`.

use crate::compliance::ComplianceService;
use crate::errors::{SettlementError, StoreError};
use crate::events::EventBus;
use crate::games::fairness::{generate_outcome, generate_seed, is_win, win_amount};
use crate::metrics::SettlementMetrics;
use crate::models::{Bet, BetStatus, NewBet, NewOutboxEntry, NewRound, NewWebhookEvent};
use crate::store::Store;
use crate::wallet::Wallet;
use crate::webhook::settlement_notification;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const BET_SETTLED_EVENT: &str = "bet.settled";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetRequest {
    pub operator_id: i64,
    pub player_id: i64,
    pub amount: f64,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceBetOutcome {
    /// This call settled the bet
    Settled(Bet),
    /// The key was already used; the original bet, untouched
    Replayed(Bet),
}

impl PlaceBetOutcome {
    pub fn bet(&self) -> &Bet {
        match self {
            PlaceBetOutcome::Settled(bet) | PlaceBetOutcome::Replayed(bet) => bet,
        }
    }

    pub fn into_bet(self) -> Bet {
        match self {
            PlaceBetOutcome::Settled(bet) | PlaceBetOutcome::Replayed(bet) => bet,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, PlaceBetOutcome::Replayed(_))
    }
}

/// What a reconciliation pass did with one stale reservation
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    /// Debit confirmed; the bet reached its final status
    Settled(Bet),
    /// Debit declined; the reservation was removed and its key is free
    Released(Bet),
    /// Someone else finished the bet first
    AlreadyFinal(Bet),
}

/// Source of the (server, client) seed pair for each round
pub trait SeedSource: Send + Sync {
    fn seed_pair(&self) -> Result<(String, String), SettlementError>;
}

/// 256-bit seeds from the OS entropy source
pub struct OsSeeds;

impl SeedSource for OsSeeds {
    fn seed_pair(&self) -> Result<(String, String), SettlementError> {
        Ok((generate_seed()?, generate_seed()?))
    }
}

pub struct SettlementPipeline {
    store: Arc<dyn Store>,
    wallet: Arc<dyn Wallet>,
    compliance: ComplianceService,
    bus: EventBus,
    metrics: Arc<SettlementMetrics>,
    seeds: Arc<dyn SeedSource>,
}

impl SettlementPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        wallet: Arc<dyn Wallet>,
        bus: EventBus,
        metrics: Arc<SettlementMetrics>,
    ) -> Self {
        Self {
            compliance: ComplianceService::new(store.clone()),
            store,
            wallet,
            bus,
            metrics,
            seeds: Arc::new(OsSeeds),
        }
    }

    pub fn with_seed_source(mut self, seeds: Arc<dyn SeedSource>) -> Self {
        self.seeds = seeds;
        self
    }

    pub async fn place_bet(&self, request: PlaceBetRequest) -> Result<PlaceBetOutcome, SettlementError> {
        let result = self.settle(&request).await;
        match &result {
            Ok(PlaceBetOutcome::Replayed(_)) => self.metrics.record_replay(),
            Ok(PlaceBetOutcome::Settled(bet)) => self.metrics.record_settlement(bet.status),
            Err(e) if e.is_decline() => self.metrics.record_decline(),
            Err(SettlementError::WalletUnavailable(_)) => self.metrics.record_wallet_failure(),
            Err(_) => {}
        }
        result
    }

    async fn settle(&self, request: &PlaceBetRequest) -> Result<PlaceBetOutcome, SettlementError> {
        let PlaceBetRequest {
            operator_id,
            player_id,
            amount,
            ref idempotency_key,
        } = *request;

        if !amount.is_finite() || amount <= 0.0 {
            return Err(SettlementError::InvalidAmount(amount));
        }

        if let Some(existing) = self.store.bet_by_idempotency(operator_id, idempotency_key).await? {
            info!(operator_id, bet_id = existing.id, "Idempotent replay");
            return Ok(PlaceBetOutcome::Replayed(existing));
        }

        let player = self
            .store
            .player(operator_id, player_id)
            .await?
            .ok_or(SettlementError::PlayerNotFound { operator_id, player_id })?;

        self.compliance
            .check(operator_id, player.id, &player.jurisdiction, amount)
            .await?;

        let (server_seed, client_seed) = self.seeds.seed_pair()?;
        let fair = generate_outcome(&server_seed, &client_seed);

        let reserved = self
            .store
            .reserve_bet(
                NewRound {
                    operator_id,
                    player_id,
                    server_seed,
                    client_seed,
                    hash: fair.hash,
                    outcome: fair.outcome,
                },
                NewBet {
                    operator_id,
                    player_id,
                    amount,
                    outcome: fair.outcome,
                    idempotency_key: idempotency_key.clone(),
                },
            )
            .await;

        let bet = match reserved {
            Ok((_, bet)) => bet,
            // A concurrent request with the same key won the unique index.
            Err(StoreError::DuplicateIdempotencyKey { .. }) => {
                return match self.store.bet_by_idempotency(operator_id, idempotency_key).await? {
                    Some(existing) => Ok(PlaceBetOutcome::Replayed(existing)),
                    None => Err(StoreError::Conflict(format!(
                        "bet for key '{}' was released while reserving",
                        idempotency_key
                    ))
                    .into()),
                };
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(err) = self.charge(&bet).await {
            warn!(operator_id, bet_id = bet.id, error = %err, "Debit failed, releasing reservation");
            if let Err(e) = self.store.discard_bet(bet.id).await {
                // Left in processing; reconciliation re-drives it
                error!(operator_id, bet_id = bet.id, error = %e, "Failed to release reserved bet");
            }
            return Err(err);
        }

        let bet = self.pay_out(bet).await?;
        Ok(PlaceBetOutcome::Settled(bet))
    }

    /// Resolve a reservation left in `processing` by a request that never
    /// finished. The debit is re-issued under the bet's idempotency key, so
    /// a debit the wallet already applied is replayed rather than charged
    /// twice. A wallet failure leaves the bet for the next pass.
    pub async fn reconcile(&self, bet: Bet) -> Result<Reconciliation, SettlementError> {
        if bet.status != BetStatus::Processing {
            return Ok(Reconciliation::AlreadyFinal(bet));
        }

        match self.charge(&bet).await {
            Ok(()) => {
                let bet = self.pay_out(bet).await?;
                info!(operator_id = bet.operator_id, bet_id = bet.id, status = %bet.status, "Stale reservation settled");
                self.metrics.record_settlement(bet.status);
                self.metrics.record_reconciliation(true);
                Ok(Reconciliation::Settled(bet))
            }
            Err(SettlementError::InsufficientFunds) => {
                self.store.discard_bet(bet.id).await?;
                info!(operator_id = bet.operator_id, bet_id = bet.id, "Stale reservation released");
                self.metrics.record_reconciliation(false);
                Ok(Reconciliation::Released(bet))
            }
            Err(e) => {
                self.metrics.record_wallet_failure();
                Err(e)
            }
        }
    }

    /// Debit the stake under the bet's idempotency key
    async fn charge(&self, bet: &Bet) -> Result<(), SettlementError> {
        match self.wallet.debit(bet.player_id, bet.amount, &bet.idempotency_key).await {
            Ok(receipt) if receipt.success => Ok(()),
            Ok(_) => Err(SettlementError::InsufficientFunds),
            Err(e) => Err(SettlementError::WalletUnavailable(e)),
        }
    }

    /// Credit a win (or queue it), commit the final status and emit the
    /// post-commit side effects. The stake has already been debited.
    async fn pay_out(&self, bet: Bet) -> Result<Bet, SettlementError> {
        let operator_id = bet.operator_id;
        let payout = win_amount(bet.amount, bet.outcome);
        let (status, outbox) = if is_win(bet.outcome) {
            let credit_key = format!("{}-win", bet.idempotency_key);
            match self.wallet.credit(bet.player_id, payout, &credit_key).await {
                Ok(receipt) if receipt.success => (BetStatus::Won, None),
                credit => {
                    let reason = match credit {
                        Ok(_) => "credit declined".to_string(),
                        Err(e) => e.to_string(),
                    };
                    warn!(operator_id, bet_id = bet.id, reason = %reason, "Win credit failed, queueing payout");
                    (
                        BetStatus::PendingSettlement,
                        Some(NewOutboxEntry {
                            operator_id,
                            player_id: bet.player_id,
                            amount: payout,
                        }),
                    )
                }
            }
        } else {
            (BetStatus::Lost, None)
        };

        let (bet, outbox) = self
            .store
            .finalize_bet(bet.id, status, payout, outbox)
            .await
            .map_err(|e| {
                // The debit went through; the wallet ledger keyed by the
                // idempotency key is the reconciliation source.
                error!(operator_id, bet_id = bet.id, error = %e, "Failed to commit settled bet after debit");
                SettlementError::Persistence(e)
            })?;

        info!(
            operator_id,
            bet_id = bet.id,
            round_id = bet.round_id,
            outcome = bet.outcome,
            status = %bet.status,
            outbox_id = outbox.as_ref().map(|o| o.id),
            "Bet settled"
        );

        self.emit_settlement(&bet).await;
        Ok(bet)
    }

    /// Post-commit side effects. Failures here never reach the caller.
    async fn emit_settlement(&self, bet: &Bet) {
        self.bus.publish(
            bet.operator_id,
            BET_SETTLED_EVENT,
            json!({
                "bet_id": bet.id,
                "round_id": bet.round_id,
                "player_id": bet.player_id,
                "amount": bet.amount,
                "outcome": bet.outcome,
                "win_amount": bet.win_amount,
                "status": bet.status,
            }),
        );

        let Some((event_type, payload)) = settlement_notification(bet) else {
            return;
        };
        let queued = self
            .store
            .insert_webhook_event(NewWebhookEvent {
                operator_id: Some(bet.operator_id),
                event_type: event_type.to_string(),
                payload,
            })
            .await;
        if let Err(e) = queued {
            warn!(operator_id = bet.operator_id, bet_id = bet.id, error = %e, "Failed to queue settlement webhook");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::{ComplianceViolation, WalletError};
    use crate::models::{NewOperator, OperatorLimits, WebhookStatus};
    use crate::store::MemoryStore;
    use crate::wallet::WalletReceipt;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum Reply {
        Approve,
        Decline,
        Fail,
    }

    /// Wallet double with scripted replies and a call log
    pub struct ScriptedWallet {
        pub debit_reply: Mutex<Reply>,
        pub credit_reply: Mutex<Reply>,
        pub calls: Mutex<Vec<(&'static str, String, f64)>>,
        pub delay: Duration,
        failing_keys: Mutex<HashSet<String>>,
    }

    impl ScriptedWallet {
        pub fn new() -> Self {
            Self {
                debit_reply: Mutex::new(Reply::Approve),
                credit_reply: Mutex::new(Reply::Approve),
                calls: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
                failing_keys: Mutex::new(HashSet::new()),
            }
        }

        /// Time out every call carrying this request id, whatever the scripted reply
        pub fn fail_request(&self, key: &str) {
            self.failing_keys.lock().unwrap().insert(key.to_string());
        }

        pub fn calls(&self, op: &str) -> Vec<(String, f64)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(o, _, _)| *o == op)
                .map(|(_, key, amount)| (key.clone(), *amount))
                .collect()
        }

        async fn reply(&self, op: &'static str, reply: Reply, key: &str, amount: f64) -> Result<WalletReceipt, WalletError> {
            self.calls.lock().unwrap().push((op, key.to_string(), amount));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing_keys.lock().unwrap().contains(key) {
                return Err(WalletError::Timeout { timeout_ms: 3000 });
            }
            match reply {
                Reply::Approve => Ok(WalletReceipt { success: true, balance: 100.0 }),
                Reply::Decline => Ok(WalletReceipt { success: false, balance: 0.0 }),
                Reply::Fail => Err(WalletError::Timeout { timeout_ms: 3000 }),
            }
        }
    }

    #[async_trait]
    impl Wallet for ScriptedWallet {
        async fn debit(&self, _player_id: i64, amount: f64, request_id: &str) -> Result<WalletReceipt, WalletError> {
            let reply = *self.debit_reply.lock().unwrap();
            self.reply("debit", reply, request_id, amount).await
        }

        async fn credit(&self, _player_id: i64, amount: f64, request_id: &str) -> Result<WalletReceipt, WalletError> {
            let reply = *self.credit_reply.lock().unwrap();
            self.reply("credit", reply, request_id, amount).await
        }
    }

    pub struct FixedSeeds(pub String, pub String);

    impl SeedSource for FixedSeeds {
        fn seed_pair(&self) -> Result<(String, String), SettlementError> {
            Ok((self.0.clone(), self.1.clone()))
        }
    }

    /// Seeds whose outcome is (or is not) the winning face
    pub fn seeds_for(win: bool) -> Arc<FixedSeeds> {
        let server = "fixed-server-seed".to_string();
        let client = (0..)
            .map(|i| format!("client-{}", i))
            .find(|c| is_win(generate_outcome(&server, c).outcome) == win)
            .unwrap();
        Arc::new(FixedSeeds(server, client))
    }

    struct Harness {
        store: Arc<MemoryStore>,
        wallet: Arc<ScriptedWallet>,
        bus: EventBus,
        metrics: Arc<SettlementMetrics>,
        operator_id: i64,
        player_id: i64,
    }

    impl Harness {
        async fn new(wallet: ScriptedWallet) -> Self {
            let store = Arc::new(MemoryStore::new());
            let operator = store
                .insert_operator(NewOperator {
                    name: "Acme".into(),
                    api_key: "key".into(),
                    webhook_url: Some("http://hooks.test".into()),
                    webhook_secret: "whsec".into(),
                })
                .await
                .unwrap();
            let player = store.get_or_create_player(operator.id, "p-1", "MT").await.unwrap();
            Self {
                store,
                wallet: Arc::new(wallet),
                bus: EventBus::default(),
                metrics: Arc::new(SettlementMetrics::new()),
                operator_id: operator.id,
                player_id: player.id,
            }
        }

        fn pipeline(&self, win: bool) -> SettlementPipeline {
            SettlementPipeline::new(self.store.clone(), self.wallet.clone(), self.bus.clone(), self.metrics.clone())
                .with_seed_source(seeds_for(win))
        }

        fn request(&self, key: &str, amount: f64) -> PlaceBetRequest {
            PlaceBetRequest {
                operator_id: self.operator_id,
                player_id: self.player_id,
                amount,
                idempotency_key: key.to_string(),
            }
        }

        /// A bet left in `processing`, as if its request died before the debit returned
        async fn reserve(&self, key: &str, amount: f64, win: bool) -> Bet {
            let (server_seed, client_seed) = seeds_for(win).seed_pair().unwrap();
            let fair = generate_outcome(&server_seed, &client_seed);
            let (_, bet) = self
                .store
                .reserve_bet(
                    NewRound {
                        operator_id: self.operator_id,
                        player_id: self.player_id,
                        server_seed,
                        client_seed,
                        hash: fair.hash,
                        outcome: fair.outcome,
                    },
                    NewBet {
                        operator_id: self.operator_id,
                        player_id: self.player_id,
                        amount,
                        outcome: fair.outcome,
                        idempotency_key: key.to_string(),
                    },
                )
                .await
                .unwrap();
            bet
        }

        async fn webhooks(&self) -> Vec<crate::models::WebhookEvent> {
            self.store.list_webhooks(self.operator_id, Some(WebhookStatus::Pending)).await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_lost_bet_never_credits() {
        let h = Harness::new(ScriptedWallet::new()).await;
        let outcome = h.pipeline(false).place_bet(h.request("k-lost", 10.0)).await.unwrap();

        let bet = outcome.bet();
        assert!(!outcome.is_replay());
        assert_eq!(bet.status, BetStatus::Lost);
        assert_eq!(bet.win_amount, 0.0);
        assert_ne!(bet.outcome, 6);
        assert_eq!(h.wallet.calls("debit"), vec![("k-lost".to_string(), 10.0)]);
        assert!(h.wallet.calls("credit").is_empty());

        let hooks = h.webhooks().await;
        assert_eq!(hooks.len(), 1);
        assert_eq!(hooks[0].event_type, "settlement_lost");

        let events = h.bus.replay_since(h.operator_id, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, BET_SETTLED_EVENT);
        assert_eq!(events[0].data["status"], "lost");
        assert_eq!(h.metrics.bets_settled(BetStatus::Lost), 1);
    }

    #[tokio::test]
    async fn test_won_bet_credits_once_with_win_key() {
        let h = Harness::new(ScriptedWallet::new()).await;
        let bet = h.pipeline(true).place_bet(h.request("k-win", 10.0)).await.unwrap().into_bet();

        assert_eq!(bet.status, BetStatus::Won);
        assert_eq!(bet.outcome, 6);
        assert_eq!(bet.win_amount, 50.0);
        assert_eq!(h.wallet.calls("credit"), vec![("k-win-win".to_string(), 50.0)]);
        assert!(h.store.list_outbox(h.operator_id, None).await.unwrap().is_empty());

        let hooks = h.webhooks().await;
        assert_eq!(hooks[0].event_type, "settlement_success");
        assert_eq!(hooks[0].payload["amount"], 50.0);

        let round = h.store.round(bet.round_id).await.unwrap().unwrap();
        assert!(crate::games::fairness::verify_outcome(
            &round.server_seed,
            &round.client_seed,
            &round.hash,
            round.outcome
        ));
    }

    #[tokio::test]
    async fn test_failed_credit_queues_outbox() {
        let wallet = ScriptedWallet::new();
        *wallet.credit_reply.lock().unwrap() = Reply::Fail;
        let h = Harness::new(wallet).await;

        let bet = h.pipeline(true).place_bet(h.request("k-pend", 4.0)).await.unwrap().into_bet();
        assert_eq!(bet.status, BetStatus::PendingSettlement);
        assert_eq!(bet.win_amount, 20.0);

        let outbox = h.store.pending_outbox().await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].bet_id, bet.id);
        assert_eq!(outbox[0].amount, 20.0);

        let hooks = h.webhooks().await;
        assert_eq!(hooks[0].event_type, "settlement_pending");
        assert_eq!(hooks[0].payload["status"], "pending");
    }

    #[tokio::test]
    async fn test_declined_credit_also_queues_outbox() {
        let wallet = ScriptedWallet::new();
        *wallet.credit_reply.lock().unwrap() = Reply::Decline;
        let h = Harness::new(wallet).await;

        let bet = h.pipeline(true).place_bet(h.request("k-decl", 1.0)).await.unwrap().into_bet();
        assert_eq!(bet.status, BetStatus::PendingSettlement);
        assert_eq!(h.store.pending_outbox().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_replay_returns_original_without_wallet_call() {
        let h = Harness::new(ScriptedWallet::new()).await;
        let pipeline = h.pipeline(false);

        let first = pipeline.place_bet(h.request("k-rep", 10.0)).await.unwrap();
        let second = pipeline.place_bet(h.request("k-rep", 99.0)).await.unwrap();

        assert!(second.is_replay());
        assert_eq!(second.bet(), first.bet());
        assert_eq!(h.wallet.calls("debit").len(), 1);
        assert_eq!(h.bus.replay_since(h.operator_id, None).len(), 1);
        assert_eq!(h.webhooks().await.len(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_funds_rolls_back() {
        let wallet = ScriptedWallet::new();
        *wallet.debit_reply.lock().unwrap() = Reply::Decline;
        let h = Harness::new(wallet).await;
        let pipeline = h.pipeline(false);

        let err = pipeline.place_bet(h.request("k-broke", 10.0)).await.unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientFunds));
        assert!(h.store.bet_by_idempotency(h.operator_id, "k-broke").await.unwrap().is_none());
        assert!(h.store.round(1).await.unwrap().is_none());
        assert!(h.bus.replay_since(h.operator_id, None).is_empty());
        assert!(h.webhooks().await.is_empty());

        // Same key is free for a legitimate retry
        *h.wallet.debit_reply.lock().unwrap() = Reply::Approve;
        let retry = pipeline.place_bet(h.request("k-broke", 10.0)).await.unwrap();
        assert!(!retry.is_replay());
    }

    #[tokio::test]
    async fn test_wallet_outage_is_unavailable() {
        let wallet = ScriptedWallet::new();
        *wallet.debit_reply.lock().unwrap() = Reply::Fail;
        let h = Harness::new(wallet).await;

        let err = h.pipeline(true).place_bet(h.request("k-down", 10.0)).await.unwrap_err();
        assert!(matches!(err, SettlementError::WalletUnavailable(_)));
        assert!(!err.is_decline());
        assert!(h.store.bet_by_idempotency(h.operator_id, "k-down").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_player() {
        let h = Harness::new(ScriptedWallet::new()).await;
        let mut request = h.request("k-ghost", 10.0);
        request.player_id = 999;

        let err = h.pipeline(false).place_bet(request).await.unwrap_err();
        assert!(matches!(err, SettlementError::PlayerNotFound { player_id: 999, .. }));
        assert!(h.wallet.calls("debit").is_empty());
    }

    #[tokio::test]
    async fn test_compliance_block_has_no_side_effects() {
        let h = Harness::new(ScriptedWallet::new()).await;
        h.store
            .set_operator_limits(OperatorLimits {
                operator_id: h.operator_id,
                allowed_jurisdictions: vec!["GB".into()],
                max_bet: 0.0,
            })
            .await
            .unwrap();

        let err = h.pipeline(false).place_bet(h.request("k-blocked", 10.0)).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementError::ComplianceViolation(ComplianceViolation::JurisdictionNotAllowed(_))
        ));
        assert!(h.wallet.calls("debit").is_empty());
        assert!(h.store.bet_by_idempotency(h.operator_id, "k-blocked").await.unwrap().is_none());
        assert!(h.bus.replay_since(h.operator_id, None).is_empty());

        let audit = h.store.list_audit_logs(h.operator_id, None, 50, 0).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, crate::compliance::JURISDICTION_BLOCK);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_amount() {
        let h = Harness::new(ScriptedWallet::new()).await;
        for amount in [0.0, -5.0, f64::NAN] {
            let err = h.pipeline(false).place_bet(h.request("k-bad", amount)).await.unwrap_err();
            assert!(matches!(err, SettlementError::InvalidAmount(_)));
        }
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_debit_once() {
        let mut wallet = ScriptedWallet::new();
        wallet.delay = Duration::from_millis(20);
        let h = Harness::new(wallet).await;
        let pipeline = Arc::new(h.pipeline(false));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pipeline = pipeline.clone();
            let request = h.request("k-race", 10.0);
            handles.push(tokio::spawn(async move { pipeline.place_bet(request).await }));
        }

        let mut bet_ids = Vec::new();
        for handle in handles {
            bet_ids.push(handle.await.unwrap().unwrap().bet().id);
        }
        bet_ids.dedup();
        assert_eq!(bet_ids.len(), 1);
        assert_eq!(h.wallet.calls("debit").len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_settles_reservation_with_original_key() {
        let h = Harness::new(ScriptedWallet::new()).await;
        let bet = h.reserve("k-stuck", 3.0, true).await;
        assert_eq!(bet.status, BetStatus::Processing);

        let result = h.pipeline(true).reconcile(bet.clone()).await.unwrap();
        let Reconciliation::Settled(settled) = result else {
            panic!("expected settlement, got {:?}", result);
        };
        assert_eq!(settled.id, bet.id);
        assert_eq!(settled.status, BetStatus::Won);
        assert_eq!(settled.win_amount, 15.0);
        assert_eq!(h.wallet.calls("debit"), vec![("k-stuck".to_string(), 3.0)]);
        assert_eq!(h.wallet.calls("credit"), vec![("k-stuck-win".to_string(), 15.0)]);

        assert_eq!(h.webhooks().await[0].event_type, "settlement_success");
        let events = h.bus.replay_since(h.operator_id, None);
        assert_eq!(events[0].event_type, BET_SETTLED_EVENT);
        assert_eq!(h.metrics.bets_settled(BetStatus::Won), 1);

        // Replays now see the final bet
        let replay = h.pipeline(true).place_bet(h.request("k-stuck", 3.0)).await.unwrap();
        assert!(replay.is_replay());
        assert_eq!(replay.bet(), &settled);
    }

    #[tokio::test]
    async fn test_reconcile_lost_reservation() {
        let h = Harness::new(ScriptedWallet::new()).await;
        let bet = h.reserve("k-stuck-lost", 3.0, false).await;

        let result = h.pipeline(false).reconcile(bet).await.unwrap();
        assert!(matches!(result, Reconciliation::Settled(ref b) if b.status == BetStatus::Lost));
        assert!(h.wallet.calls("credit").is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_declined_debit_frees_key() {
        let wallet = ScriptedWallet::new();
        *wallet.debit_reply.lock().unwrap() = Reply::Decline;
        let h = Harness::new(wallet).await;
        let bet = h.reserve("k-orphan", 10.0, false).await;

        let result = h.pipeline(false).reconcile(bet.clone()).await.unwrap();
        assert_eq!(result, Reconciliation::Released(bet.clone()));
        assert!(h.store.bet(bet.id).await.unwrap().is_none());
        assert!(h.store.bet_by_idempotency(h.operator_id, "k-orphan").await.unwrap().is_none());
        assert!(h.bus.replay_since(h.operator_id, None).is_empty());
        assert_eq!(h.metrics.reservations_released(), 1);

        *h.wallet.debit_reply.lock().unwrap() = Reply::Approve;
        let retry = h.pipeline(false).place_bet(h.request("k-orphan", 10.0)).await.unwrap();
        assert!(!retry.is_replay());
    }

    #[tokio::test]
    async fn test_reconcile_wallet_outage_keeps_reservation() {
        let wallet = ScriptedWallet::new();
        *wallet.debit_reply.lock().unwrap() = Reply::Fail;
        let h = Harness::new(wallet).await;
        let bet = h.reserve("k-later", 10.0, false).await;

        let err = h.pipeline(false).reconcile(bet.clone()).await.unwrap_err();
        assert!(matches!(err, SettlementError::WalletUnavailable(_)));
        let still = h.store.bet(bet.id).await.unwrap().unwrap();
        assert_eq!(still.status, BetStatus::Processing);

        // A replay keeps reporting the in-flight bet until it resolves
        let replay = h.pipeline(false).place_bet(h.request("k-later", 10.0)).await.unwrap();
        assert!(replay.is_replay());
        assert_eq!(replay.bet().status, BetStatus::Processing);
    }

    #[tokio::test]
    async fn test_reconcile_skips_finished_bet() {
        let h = Harness::new(ScriptedWallet::new()).await;
        let bet = h.pipeline(false).place_bet(h.request("k-done", 1.0)).await.unwrap().into_bet();

        let result = h.pipeline(false).reconcile(bet.clone()).await.unwrap();
        assert_eq!(result, Reconciliation::AlreadyFinal(bet));
        assert_eq!(h.wallet.calls("debit").len(), 1);
    }
}
