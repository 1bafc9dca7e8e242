//! In-memory store
//!
//! Every call runs under one mutex, which gives each unit of work the same
//! atomicity and isolation a transaction would.

use super::Store;
use crate::errors::{StoreError, StoreResult};
use crate::models::{
    AuditLog, Bet, BetStatus, NewAuditLog, NewBet, NewOperator, NewOutboxEntry, NewRound,
    NewWebhookEvent, Operator, OperatorLimits, OutboxEntry, Player, Round, WebhookEvent,
    WebhookStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    next_id: HashMap<&'static str, i64>,
    operators: BTreeMap<i64, Operator>,
    players: BTreeMap<i64, Player>,
    limits: HashMap<i64, OperatorLimits>,
    audit_logs: BTreeMap<i64, AuditLog>,
    rounds: BTreeMap<i64, Round>,
    bets: BTreeMap<i64, Bet>,
    bet_keys: HashMap<(i64, String), i64>,
    outbox: BTreeMap<i64, OutboxEntry>,
    webhooks: BTreeMap<i64, WebhookEvent>,
}

impl Tables {
    fn next_id(&mut self, table: &'static str) -> i64 {
        let id = self.next_id.entry(table).or_insert(0);
        *id += 1;
        *id
    }

    fn webhook_mut(&mut self, event_id: i64) -> StoreResult<&mut WebhookEvent> {
        self.webhooks
            .get_mut(&event_id)
            .ok_or_else(|| StoreError::NotFound(format!("webhook event {}", event_id)))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_operator(&self, operator: NewOperator) -> StoreResult<Operator> {
        let mut t = self.tables.lock().await;
        if t.operators.values().any(|o| o.api_key == operator.api_key) {
            return Err(StoreError::Conflict("operator api key already registered".to_string()));
        }
        let row = Operator {
            id: t.next_id("operators"),
            name: operator.name,
            api_key: operator.api_key,
            webhook_url: operator.webhook_url,
            webhook_secret: operator.webhook_secret,
        };
        t.operators.insert(row.id, row.clone());
        Ok(row)
    }

    async fn operator(&self, operator_id: i64) -> StoreResult<Option<Operator>> {
        Ok(self.tables.lock().await.operators.get(&operator_id).cloned())
    }

    async fn operator_by_api_key(&self, api_key: &str) -> StoreResult<Option<Operator>> {
        let t = self.tables.lock().await;
        Ok(t.operators.values().find(|o| o.api_key == api_key).cloned())
    }

    async fn player(&self, operator_id: i64, player_id: i64) -> StoreResult<Option<Player>> {
        let t = self.tables.lock().await;
        Ok(t.players.get(&player_id).filter(|p| p.operator_id == operator_id).cloned())
    }

    async fn get_or_create_player(
        &self,
        operator_id: i64,
        external_player_id: &str,
        jurisdiction: &str,
    ) -> StoreResult<Player> {
        let mut t = self.tables.lock().await;
        if let Some(existing) = t
            .players
            .values()
            .find(|p| p.operator_id == operator_id && p.external_player_id == external_player_id)
        {
            return Ok(existing.clone());
        }
        let row = Player {
            id: t.next_id("players"),
            operator_id,
            external_player_id: external_player_id.to_string(),
            jurisdiction: jurisdiction.to_string(),
            created_at: Utc::now(),
        };
        t.players.insert(row.id, row.clone());
        Ok(row)
    }

    async fn operator_limits(&self, operator_id: i64) -> StoreResult<Option<OperatorLimits>> {
        Ok(self.tables.lock().await.limits.get(&operator_id).cloned())
    }

    async fn set_operator_limits(&self, limits: OperatorLimits) -> StoreResult<()> {
        self.tables.lock().await.limits.insert(limits.operator_id, limits);
        Ok(())
    }

    async fn insert_audit_log(&self, entry: NewAuditLog) -> StoreResult<AuditLog> {
        let mut t = self.tables.lock().await;
        let row = AuditLog {
            id: t.next_id("audit_logs"),
            operator_id: entry.operator_id,
            player_id: entry.player_id,
            action: entry.action,
            details: entry.details,
            created_at: Utc::now(),
        };
        t.audit_logs.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_audit_logs(
        &self,
        operator_id: i64,
        player_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<AuditLog>> {
        let t = self.tables.lock().await;
        Ok(t.audit_logs
            .values()
            .rev()
            .filter(|l| l.operator_id == operator_id)
            .filter(|l| player_id.map_or(true, |p| l.player_id == Some(p)))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn round(&self, round_id: i64) -> StoreResult<Option<Round>> {
        Ok(self.tables.lock().await.rounds.get(&round_id).cloned())
    }

    async fn bet(&self, bet_id: i64) -> StoreResult<Option<Bet>> {
        Ok(self.tables.lock().await.bets.get(&bet_id).cloned())
    }

    async fn bet_by_idempotency(&self, operator_id: i64, key: &str) -> StoreResult<Option<Bet>> {
        let t = self.tables.lock().await;
        Ok(t.bet_keys
            .get(&(operator_id, key.to_string()))
            .and_then(|id| t.bets.get(id))
            .cloned())
    }

    async fn reserve_bet(&self, round: NewRound, bet: NewBet) -> StoreResult<(Round, Bet)> {
        let mut t = self.tables.lock().await;
        let index_key = (bet.operator_id, bet.idempotency_key.clone());
        if t.bet_keys.contains_key(&index_key) {
            return Err(StoreError::DuplicateIdempotencyKey {
                operator_id: bet.operator_id,
                key: bet.idempotency_key,
            });
        }

        let now = Utc::now();
        let round = Round {
            id: t.next_id("rounds"),
            operator_id: round.operator_id,
            player_id: round.player_id,
            server_seed: round.server_seed,
            client_seed: round.client_seed,
            hash: round.hash,
            outcome: round.outcome,
            created_at: now,
        };
        let bet = Bet {
            id: t.next_id("bets"),
            operator_id: bet.operator_id,
            player_id: bet.player_id,
            round_id: round.id,
            amount: bet.amount,
            outcome: bet.outcome,
            win_amount: 0.0,
            status: BetStatus::Processing,
            idempotency_key: bet.idempotency_key,
            created_at: now,
        };

        t.rounds.insert(round.id, round.clone());
        t.bets.insert(bet.id, bet.clone());
        t.bet_keys.insert(index_key, bet.id);
        Ok((round, bet))
    }

    async fn discard_bet(&self, bet_id: i64) -> StoreResult<()> {
        let mut t = self.tables.lock().await;
        let bet = t
            .bets
            .get(&bet_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("bet {}", bet_id)))?;
        if bet.status != BetStatus::Processing {
            return Err(StoreError::Conflict(format!("bet {} is already {}", bet_id, bet.status)));
        }

        t.bets.remove(&bet_id);
        t.rounds.remove(&bet.round_id);
        t.bet_keys.remove(&(bet.operator_id, bet.idempotency_key));
        Ok(())
    }

    async fn finalize_bet(
        &self,
        bet_id: i64,
        status: BetStatus,
        win_amount: f64,
        outbox: Option<NewOutboxEntry>,
    ) -> StoreResult<(Bet, Option<OutboxEntry>)> {
        let mut t = self.tables.lock().await;
        let mut bet = t
            .bets
            .get(&bet_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("bet {}", bet_id)))?;
        if bet.status != BetStatus::Processing {
            return Err(StoreError::Conflict(format!("bet {} is already {}", bet_id, bet.status)));
        }

        bet.status = status;
        bet.win_amount = win_amount;

        let entry = outbox.map(|new| OutboxEntry {
            id: t.next_id("outbox"),
            bet_id,
            operator_id: new.operator_id,
            player_id: new.player_id,
            amount: new.amount,
            processed: false,
            created_at: Utc::now(),
        });

        t.bets.insert(bet.id, bet.clone());
        if let Some(ref entry) = entry {
            t.outbox.insert(entry.id, entry.clone());
        }
        Ok((bet, entry))
    }

    async fn stale_reservations(&self, before: DateTime<Utc>) -> StoreResult<Vec<Bet>> {
        let t = self.tables.lock().await;
        Ok(t.bets
            .values()
            .filter(|b| b.status == BetStatus::Processing && b.created_at < before)
            .cloned()
            .collect())
    }

    async fn outbox_entry(&self, outbox_id: i64) -> StoreResult<Option<OutboxEntry>> {
        Ok(self.tables.lock().await.outbox.get(&outbox_id).cloned())
    }

    async fn pending_outbox(&self) -> StoreResult<Vec<OutboxEntry>> {
        let t = self.tables.lock().await;
        Ok(t.outbox.values().filter(|e| !e.processed).cloned().collect())
    }

    async fn settle_outbox(&self, outbox_id: i64) -> StoreResult<Option<Bet>> {
        let mut t = self.tables.lock().await;
        let entry = t
            .outbox
            .get(&outbox_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("outbox entry {}", outbox_id)))?;
        if entry.processed {
            return Ok(None);
        }

        let mut bet = t
            .bets
            .get(&entry.bet_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("bet {}", entry.bet_id)))?;
        bet.status = BetStatus::Won;

        t.bets.insert(bet.id, bet.clone());
        if let Some(e) = t.outbox.get_mut(&outbox_id) {
            e.processed = true;
        }
        Ok(Some(bet))
    }

    async fn list_outbox(&self, operator_id: i64, processed: Option<bool>) -> StoreResult<Vec<OutboxEntry>> {
        let t = self.tables.lock().await;
        Ok(t.outbox
            .values()
            .rev()
            .filter(|e| e.operator_id == operator_id)
            .filter(|e| processed.map_or(true, |p| e.processed == p))
            .cloned()
            .collect())
    }

    async fn insert_webhook_event(&self, event: NewWebhookEvent) -> StoreResult<WebhookEvent> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let row = WebhookEvent {
            id: t.next_id("webhooks"),
            operator_id: event.operator_id,
            event_type: event.event_type,
            payload: event.payload,
            status: WebhookStatus::Pending,
            retries: 0,
            created_at: now,
            next_retry_at: now,
            error_message: None,
        };
        t.webhooks.insert(row.id, row.clone());
        Ok(row)
    }

    async fn webhook_event(&self, event_id: i64) -> StoreResult<Option<WebhookEvent>> {
        Ok(self.tables.lock().await.webhooks.get(&event_id).cloned())
    }

    async fn due_webhook_events(&self, now: DateTime<Utc>) -> StoreResult<Vec<WebhookEvent>> {
        let t = self.tables.lock().await;
        Ok(t.webhooks
            .values()
            .filter(|e| e.status == WebhookStatus::Pending && e.next_retry_at <= now)
            .cloned()
            .collect())
    }

    async fn claim_webhook_event(&self, event_id: i64) -> StoreResult<Option<WebhookEvent>> {
        let mut t = self.tables.lock().await;
        match t.webhooks.get_mut(&event_id) {
            Some(event) if event.status == WebhookStatus::Pending => {
                event.status = WebhookStatus::Processing;
                Ok(Some(event.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_webhook_completed(&self, event_id: i64) -> StoreResult<WebhookEvent> {
        let mut t = self.tables.lock().await;
        let event = t.webhook_mut(event_id)?;
        event.status = WebhookStatus::Completed;
        event.error_message = None;
        Ok(event.clone())
    }

    async fn mark_webhook_failed(&self, event_id: i64, error: &str) -> StoreResult<WebhookEvent> {
        let mut t = self.tables.lock().await;
        let event = t.webhook_mut(event_id)?;
        event.status = WebhookStatus::Failed;
        event.error_message = Some(error.to_string());
        Ok(event.clone())
    }

    async fn schedule_webhook_retry(
        &self,
        event_id: i64,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<WebhookEvent> {
        let mut t = self.tables.lock().await;
        let event = t.webhook_mut(event_id)?;
        event.status = WebhookStatus::Pending;
        event.retries += 1;
        event.next_retry_at = next_retry_at;
        event.error_message = Some(error.to_string());
        Ok(event.clone())
    }

    async fn reset_webhook(
        &self,
        operator_id: i64,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookEvent>> {
        let mut t = self.tables.lock().await;
        match t.webhooks.get_mut(&event_id) {
            Some(event) if event.operator_id == Some(operator_id) => {
                if event.status == WebhookStatus::Processing {
                    return Err(StoreError::Conflict(format!("webhook event {} is being delivered", event_id)));
                }
                event.status = WebhookStatus::Pending;
                event.retries = 0;
                event.created_at = now;
                event.next_retry_at = now;
                event.error_message = None;
                Ok(Some(event.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn list_webhooks(
        &self,
        operator_id: i64,
        status: Option<WebhookStatus>,
    ) -> StoreResult<Vec<WebhookEvent>> {
        let t = self.tables.lock().await;
        Ok(t.webhooks
            .values()
            .rev()
            .filter(|e| e.operator_id == Some(operator_id))
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[tokio::test]
    async fn test_operators_and_players() {
        conformance::operators_and_players(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_bet_lifecycle() {
        conformance::bet_lifecycle(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_discard_frees_key() {
        conformance::discard_frees_key(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_webhook_lifecycle() {
        conformance::webhook_lifecycle(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_audit_log_paging() {
        conformance::audit_log_paging(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_stale_reservations() {
        conformance::stale_reservations(&MemoryStore::new()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reservations_single_winner() {
        conformance::concurrent_reservations(std::sync::Arc::new(MemoryStore::new())).await;
    }
}
