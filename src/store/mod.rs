//! Persistence interface
//!
//! Each method is one unit of work: it either applies all of its writes or
//! none of them. Multi-row writes the settlement pipeline needs (round + bet,
//! bet status + outbox row, outbox settle + bet status) are single calls so
//! every backend can make them atomic.

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::RocksStore;

use crate::errors::StoreResult;
use crate::models::{
    AuditLog, Bet, BetStatus, NewAuditLog, NewBet, NewOperator, NewOutboxEntry, NewRound,
    NewWebhookEvent, Operator, OperatorLimits, OutboxEntry, Player, Round, WebhookEvent,
    WebhookStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_operator(&self, operator: NewOperator) -> StoreResult<Operator>;

    async fn operator(&self, operator_id: i64) -> StoreResult<Option<Operator>>;

    async fn operator_by_api_key(&self, api_key: &str) -> StoreResult<Option<Operator>>;

    /// Player scoped to its operator; another operator's player is `None`.
    async fn player(&self, operator_id: i64, player_id: i64) -> StoreResult<Option<Player>>;

    async fn get_or_create_player(
        &self,
        operator_id: i64,
        external_player_id: &str,
        jurisdiction: &str,
    ) -> StoreResult<Player>;

    async fn operator_limits(&self, operator_id: i64) -> StoreResult<Option<OperatorLimits>>;

    async fn set_operator_limits(&self, limits: OperatorLimits) -> StoreResult<()>;

    async fn insert_audit_log(&self, entry: NewAuditLog) -> StoreResult<AuditLog>;

    /// Newest first
    async fn list_audit_logs(
        &self,
        operator_id: i64,
        player_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<AuditLog>>;

    async fn round(&self, round_id: i64) -> StoreResult<Option<Round>>;

    async fn bet(&self, bet_id: i64) -> StoreResult<Option<Bet>>;

    async fn bet_by_idempotency(&self, operator_id: i64, key: &str) -> StoreResult<Option<Bet>>;

    /// Insert the round and a `processing` bet referencing it.
    ///
    /// Fails with `DuplicateIdempotencyKey` when the (operator, key) pair is
    /// already taken; nothing is written in that case.
    async fn reserve_bet(&self, round: NewRound, bet: NewBet) -> StoreResult<(Round, Bet)>;

    /// Remove a reserved bet and its round. Only a `processing` bet can be
    /// discarded; the idempotency key becomes free again.
    async fn discard_bet(&self, bet_id: i64) -> StoreResult<()>;

    /// Move a `processing` bet to its final status, writing the outbox row
    /// in the same unit of work when a payout is still owed.
    async fn finalize_bet(
        &self,
        bet_id: i64,
        status: BetStatus,
        win_amount: f64,
        outbox: Option<NewOutboxEntry>,
    ) -> StoreResult<(Bet, Option<OutboxEntry>)>;

    /// `processing` bets reserved before `before`, oldest first. These are
    /// reservations whose request never reached `finalize_bet` or
    /// `discard_bet`.
    async fn stale_reservations(&self, before: DateTime<Utc>) -> StoreResult<Vec<Bet>>;

    async fn outbox_entry(&self, outbox_id: i64) -> StoreResult<Option<OutboxEntry>>;

    /// Unprocessed entries, oldest first
    async fn pending_outbox(&self) -> StoreResult<Vec<OutboxEntry>>;

    /// Mark the bet won and the entry processed together. Returns `None` when
    /// the entry was already processed.
    async fn settle_outbox(&self, outbox_id: i64) -> StoreResult<Option<Bet>>;

    /// Newest first
    async fn list_outbox(&self, operator_id: i64, processed: Option<bool>) -> StoreResult<Vec<OutboxEntry>>;

    /// New events start `pending` with zero retries and are due immediately.
    async fn insert_webhook_event(&self, event: NewWebhookEvent) -> StoreResult<WebhookEvent>;

    async fn webhook_event(&self, event_id: i64) -> StoreResult<Option<WebhookEvent>>;

    /// Pending events with `next_retry_at <= now`, oldest first
    async fn due_webhook_events(&self, now: DateTime<Utc>) -> StoreResult<Vec<WebhookEvent>>;

    /// Conditional pending -> processing. `None` if another worker got there
    /// first or the event is no longer pending.
    async fn claim_webhook_event(&self, event_id: i64) -> StoreResult<Option<WebhookEvent>>;

    async fn mark_webhook_completed(&self, event_id: i64) -> StoreResult<WebhookEvent>;

    async fn mark_webhook_failed(&self, event_id: i64, error: &str) -> StoreResult<WebhookEvent>;

    /// Back to `pending` with one more retry recorded
    async fn schedule_webhook_retry(
        &self,
        event_id: i64,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<WebhookEvent>;

    /// Manual retry: pending, zero retries, due and aged from `now`.
    /// `None` if the event does not belong to the operator; `Conflict` while
    /// a worker holds it in `processing`.
    async fn reset_webhook(
        &self,
        operator_id: i64,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookEvent>>;

    /// Newest first
    async fn list_webhooks(
        &self,
        operator_id: i64,
        status: Option<WebhookStatus>,
    ) -> StoreResult<Vec<WebhookEvent>>;
}
