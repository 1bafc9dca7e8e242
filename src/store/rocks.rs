//! RocksDB-backed store
//!
//! Records are JSON values under typed key prefixes with big-endian ids, so
//! a forward prefix scan returns rows in insertion order. Each unit of work
//! is a single `WriteBatch`, and a write lock serialises the read-check-write
//! sequences behind the uniqueness and conditional-claim guarantees.

use super::Store;
use crate::errors::{StoreError, StoreResult};
use crate::models::{
    AuditLog, Bet, BetStatus, NewAuditLog, NewBet, NewOperator, NewOutboxEntry, NewRound,
    NewWebhookEvent, Operator, OperatorLimits, OutboxEntry, Player, Round, WebhookEvent,
    WebhookStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

const OPERATOR_PREFIX: &[u8] = b"operator:";
const OPERATOR_KEY_PREFIX: &[u8] = b"operator_key:";
const PLAYER_PREFIX: &[u8] = b"player:";
const PLAYER_EXT_PREFIX: &[u8] = b"player_ext:";
const LIMITS_PREFIX: &[u8] = b"limits:";
const AUDIT_PREFIX: &[u8] = b"audit:";
const ROUND_PREFIX: &[u8] = b"round:";
const BET_PREFIX: &[u8] = b"bet:";
const BET_KEY_PREFIX: &[u8] = b"bet_key:";
const BET_PROCESSING_PREFIX: &[u8] = b"bet_processing:";
const OUTBOX_PREFIX: &[u8] = b"outbox:";
const OUTBOX_PENDING_PREFIX: &[u8] = b"outbox_pending:";
const WEBHOOK_PREFIX: &[u8] = b"webhook:";
const WEBHOOK_PENDING_PREFIX: &[u8] = b"webhook_pending:";
const SEQ_PREFIX: &[u8] = b"seq:";

fn id_key(prefix: &[u8], id: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 8);
    key.extend_from_slice(prefix);
    key.extend_from_slice(&(id as u64).to_be_bytes());
    key
}

/// prefix | operator_id(be) | value
fn scoped_key(prefix: &[u8], operator_id: i64, value: &str) -> Vec<u8> {
    let mut key = id_key(prefix, operator_id);
    key.extend_from_slice(value.as_bytes());
    key
}

fn text_key(prefix: &[u8], value: &str) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(value.as_bytes());
    key
}

fn decode_id(bytes: &[u8]) -> StoreResult<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Codec(format!("expected 8-byte id, got {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw) as i64)
}

fn put_json<T: Serialize>(batch: &mut WriteBatch, key: &[u8], value: &T) -> StoreResult<()> {
    batch.put(key, serde_json::to_vec(value)?);
    Ok(())
}

pub struct RocksStore {
    db: DB,
    write_lock: Mutex<()>,
}

impl RocksStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path.as_ref())?;
        info!(path = %path.as_ref().display(), "RocksDB store opened");
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> StoreResult<Option<T>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_index(&self, key: &[u8]) -> StoreResult<Option<i64>> {
        match self.db.get(key)? {
            Some(bytes) => Ok(Some(decode_id(&bytes)?)),
            None => Ok(None),
        }
    }

    fn require<T: DeserializeOwned>(&self, prefix: &[u8], id: i64, what: &str) -> StoreResult<T> {
        self.get_json(&id_key(prefix, id))?
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", what, id)))
    }

    /// All rows under a prefix, in key order
    fn scan<T: DeserializeOwned>(&self, prefix: &[u8]) -> StoreResult<Vec<T>> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push(serde_json::from_slice(&value)?);
        }
        Ok(rows)
    }

    /// Ids stored as key suffixes of an index prefix
    fn scan_ids(&self, prefix: &[u8]) -> StoreResult<Vec<i64>> {
        let mut ids = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            ids.push(decode_id(&key[prefix.len()..])?);
        }
        Ok(ids)
    }

    /// Allocate the next id for `table`; the bumped counter rides in `batch`.
    /// Callers hold the write lock.
    fn next_id(&self, batch: &mut WriteBatch, table: &str) -> StoreResult<i64> {
        let key = text_key(SEQ_PREFIX, table);
        let current = self.get_index(&key)?.unwrap_or(0);
        let next = current + 1;
        batch.put(&key, (next as u64).to_be_bytes());
        Ok(next)
    }

    fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        self.db.write(batch)?;
        Ok(())
    }

    fn update_webhook<F>(&self, event_id: i64, apply: F) -> StoreResult<WebhookEvent>
    where
        F: FnOnce(&mut WebhookEvent),
    {
        let mut event: WebhookEvent = self.require(WEBHOOK_PREFIX, event_id, "webhook event")?;
        apply(&mut event);

        let mut batch = WriteBatch::default();
        put_json(&mut batch, &id_key(WEBHOOK_PREFIX, event_id), &event)?;
        let pending_key = id_key(WEBHOOK_PENDING_PREFIX, event_id);
        if event.status == WebhookStatus::Pending {
            batch.put(&pending_key, b"");
        } else {
            batch.delete(&pending_key);
        }
        self.write(batch)?;
        Ok(event)
    }
}

#[async_trait]
impl Store for RocksStore {
    async fn insert_operator(&self, operator: NewOperator) -> StoreResult<Operator> {
        let _guard = self.write_lock.lock().await;
        let api_key_index = text_key(OPERATOR_KEY_PREFIX, &operator.api_key);
        if self.get_index(&api_key_index)?.is_some() {
            return Err(StoreError::Conflict("operator api key already registered".to_string()));
        }

        let mut batch = WriteBatch::default();
        let row = Operator {
            id: self.next_id(&mut batch, "operators")?,
            name: operator.name,
            api_key: operator.api_key,
            webhook_url: operator.webhook_url,
            webhook_secret: operator.webhook_secret,
        };
        put_json(&mut batch, &id_key(OPERATOR_PREFIX, row.id), &row)?;
        batch.put(&api_key_index, (row.id as u64).to_be_bytes());
        self.write(batch)?;
        Ok(row)
    }

    async fn operator(&self, operator_id: i64) -> StoreResult<Option<Operator>> {
        self.get_json(&id_key(OPERATOR_PREFIX, operator_id))
    }

    async fn operator_by_api_key(&self, api_key: &str) -> StoreResult<Option<Operator>> {
        match self.get_index(&text_key(OPERATOR_KEY_PREFIX, api_key))? {
            Some(id) => self.get_json(&id_key(OPERATOR_PREFIX, id)),
            None => Ok(None),
        }
    }

    async fn player(&self, operator_id: i64, player_id: i64) -> StoreResult<Option<Player>> {
        let player: Option<Player> = self.get_json(&id_key(PLAYER_PREFIX, player_id))?;
        Ok(player.filter(|p| p.operator_id == operator_id))
    }

    async fn get_or_create_player(
        &self,
        operator_id: i64,
        external_player_id: &str,
        jurisdiction: &str,
    ) -> StoreResult<Player> {
        let _guard = self.write_lock.lock().await;
        let ext_index = scoped_key(PLAYER_EXT_PREFIX, operator_id, external_player_id);
        if let Some(id) = self.get_index(&ext_index)? {
            return self.require(PLAYER_PREFIX, id, "player");
        }

        let mut batch = WriteBatch::default();
        let row = Player {
            id: self.next_id(&mut batch, "players")?,
            operator_id,
            external_player_id: external_player_id.to_string(),
            jurisdiction: jurisdiction.to_string(),
            created_at: Utc::now(),
        };
        put_json(&mut batch, &id_key(PLAYER_PREFIX, row.id), &row)?;
        batch.put(&ext_index, (row.id as u64).to_be_bytes());
        self.write(batch)?;
        debug!(operator_id, player_id = row.id, "Player created");
        Ok(row)
    }

    async fn operator_limits(&self, operator_id: i64) -> StoreResult<Option<OperatorLimits>> {
        self.get_json(&id_key(LIMITS_PREFIX, operator_id))
    }

    async fn set_operator_limits(&self, limits: OperatorLimits) -> StoreResult<()> {
        let mut batch = WriteBatch::default();
        put_json(&mut batch, &id_key(LIMITS_PREFIX, limits.operator_id), &limits)?;
        self.write(batch)
    }

    async fn insert_audit_log(&self, entry: NewAuditLog) -> StoreResult<AuditLog> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        let row = AuditLog {
            id: self.next_id(&mut batch, "audit_logs")?,
            operator_id: entry.operator_id,
            player_id: entry.player_id,
            action: entry.action,
            details: entry.details,
            created_at: Utc::now(),
        };
        put_json(&mut batch, &id_key(AUDIT_PREFIX, row.id), &row)?;
        self.write(batch)?;
        Ok(row)
    }

    async fn list_audit_logs(
        &self,
        operator_id: i64,
        player_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<AuditLog>> {
        let logs: Vec<AuditLog> = self.scan(AUDIT_PREFIX)?;
        Ok(logs
            .into_iter()
            .rev()
            .filter(|l| l.operator_id == operator_id)
            .filter(|l| player_id.map_or(true, |p| l.player_id == Some(p)))
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn round(&self, round_id: i64) -> StoreResult<Option<Round>> {
        self.get_json(&id_key(ROUND_PREFIX, round_id))
    }

    async fn bet(&self, bet_id: i64) -> StoreResult<Option<Bet>> {
        self.get_json(&id_key(BET_PREFIX, bet_id))
    }

    async fn bet_by_idempotency(&self, operator_id: i64, key: &str) -> StoreResult<Option<Bet>> {
        match self.get_index(&scoped_key(BET_KEY_PREFIX, operator_id, key))? {
            Some(id) => self.get_json(&id_key(BET_PREFIX, id)),
            None => Ok(None),
        }
    }

    async fn reserve_bet(&self, round: NewRound, bet: NewBet) -> StoreResult<(Round, Bet)> {
        let _guard = self.write_lock.lock().await;
        let key_index = scoped_key(BET_KEY_PREFIX, bet.operator_id, &bet.idempotency_key);
        if self.get_index(&key_index)?.is_some() {
            return Err(StoreError::DuplicateIdempotencyKey {
                operator_id: bet.operator_id,
                key: bet.idempotency_key,
            });
        }

        let now = Utc::now();
        let mut batch = WriteBatch::default();
        let round = Round {
            id: self.next_id(&mut batch, "rounds")?,
            operator_id: round.operator_id,
            player_id: round.player_id,
            server_seed: round.server_seed,
            client_seed: round.client_seed,
            hash: round.hash,
            outcome: round.outcome,
            created_at: now,
        };
        let bet = Bet {
            id: self.next_id(&mut batch, "bets")?,
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

        put_json(&mut batch, &id_key(ROUND_PREFIX, round.id), &round)?;
        put_json(&mut batch, &id_key(BET_PREFIX, bet.id), &bet)?;
        batch.put(&key_index, (bet.id as u64).to_be_bytes());
        batch.put(id_key(BET_PROCESSING_PREFIX, bet.id), b"");
        self.write(batch)?;
        Ok((round, bet))
    }

    async fn discard_bet(&self, bet_id: i64) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let bet: Bet = self.require(BET_PREFIX, bet_id, "bet")?;
        if bet.status != BetStatus::Processing {
            return Err(StoreError::Conflict(format!("bet {} is already {}", bet_id, bet.status)));
        }

        let mut batch = WriteBatch::default();
        batch.delete(id_key(BET_PREFIX, bet_id));
        batch.delete(id_key(ROUND_PREFIX, bet.round_id));
        batch.delete(scoped_key(BET_KEY_PREFIX, bet.operator_id, &bet.idempotency_key));
        batch.delete(id_key(BET_PROCESSING_PREFIX, bet_id));
        self.write(batch)
    }

    async fn finalize_bet(
        &self,
        bet_id: i64,
        status: BetStatus,
        win_amount: f64,
        outbox: Option<NewOutboxEntry>,
    ) -> StoreResult<(Bet, Option<OutboxEntry>)> {
        let _guard = self.write_lock.lock().await;
        let mut bet: Bet = self.require(BET_PREFIX, bet_id, "bet")?;
        if bet.status != BetStatus::Processing {
            return Err(StoreError::Conflict(format!("bet {} is already {}", bet_id, bet.status)));
        }
        bet.status = status;
        bet.win_amount = win_amount;

        let mut batch = WriteBatch::default();
        put_json(&mut batch, &id_key(BET_PREFIX, bet.id), &bet)?;
        batch.delete(id_key(BET_PROCESSING_PREFIX, bet_id));

        let entry = match outbox {
            Some(new) => {
                let entry = OutboxEntry {
                    id: self.next_id(&mut batch, "outbox")?,
                    bet_id,
                    operator_id: new.operator_id,
                    player_id: new.player_id,
                    amount: new.amount,
                    processed: false,
                    created_at: Utc::now(),
                };
                put_json(&mut batch, &id_key(OUTBOX_PREFIX, entry.id), &entry)?;
                batch.put(id_key(OUTBOX_PENDING_PREFIX, entry.id), b"");
                Some(entry)
            }
            None => None,
        };

        self.write(batch)?;
        Ok((bet, entry))
    }

    async fn stale_reservations(&self, before: DateTime<Utc>) -> StoreResult<Vec<Bet>> {
        let mut stale = Vec::new();
        for id in self.scan_ids(BET_PROCESSING_PREFIX)? {
            if let Some(bet) = self.get_json::<Bet>(&id_key(BET_PREFIX, id))? {
                if bet.status == BetStatus::Processing && bet.created_at < before {
                    stale.push(bet);
                }
            }
        }
        Ok(stale)
    }

    async fn outbox_entry(&self, outbox_id: i64) -> StoreResult<Option<OutboxEntry>> {
        self.get_json(&id_key(OUTBOX_PREFIX, outbox_id))
    }

    async fn pending_outbox(&self) -> StoreResult<Vec<OutboxEntry>> {
        let mut entries = Vec::new();
        for id in self.scan_ids(OUTBOX_PENDING_PREFIX)? {
            if let Some(entry) = self.get_json::<OutboxEntry>(&id_key(OUTBOX_PREFIX, id))? {
                if !entry.processed {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    async fn settle_outbox(&self, outbox_id: i64) -> StoreResult<Option<Bet>> {
        let _guard = self.write_lock.lock().await;
        let mut entry: OutboxEntry = self.require(OUTBOX_PREFIX, outbox_id, "outbox entry")?;
        if entry.processed {
            return Ok(None);
        }
        let mut bet: Bet = self.require(BET_PREFIX, entry.bet_id, "bet")?;

        bet.status = BetStatus::Won;
        entry.processed = true;

        let mut batch = WriteBatch::default();
        put_json(&mut batch, &id_key(BET_PREFIX, bet.id), &bet)?;
        put_json(&mut batch, &id_key(OUTBOX_PREFIX, entry.id), &entry)?;
        batch.delete(id_key(OUTBOX_PENDING_PREFIX, entry.id));
        self.write(batch)?;
        Ok(Some(bet))
    }

    async fn list_outbox(&self, operator_id: i64, processed: Option<bool>) -> StoreResult<Vec<OutboxEntry>> {
        let entries: Vec<OutboxEntry> = self.scan(OUTBOX_PREFIX)?;
        Ok(entries
            .into_iter()
            .rev()
            .filter(|e| e.operator_id == operator_id)
            .filter(|e| processed.map_or(true, |p| e.processed == p))
            .collect())
    }

    async fn insert_webhook_event(&self, event: NewWebhookEvent) -> StoreResult<WebhookEvent> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let mut batch = WriteBatch::default();
        let row = WebhookEvent {
            id: self.next_id(&mut batch, "webhooks")?,
            operator_id: event.operator_id,
            event_type: event.event_type,
            payload: event.payload,
            status: WebhookStatus::Pending,
            retries: 0,
            created_at: now,
            next_retry_at: now,
            error_message: None,
        };
        put_json(&mut batch, &id_key(WEBHOOK_PREFIX, row.id), &row)?;
        batch.put(id_key(WEBHOOK_PENDING_PREFIX, row.id), b"");
        self.write(batch)?;
        Ok(row)
    }

    async fn webhook_event(&self, event_id: i64) -> StoreResult<Option<WebhookEvent>> {
        self.get_json(&id_key(WEBHOOK_PREFIX, event_id))
    }

    async fn due_webhook_events(&self, now: DateTime<Utc>) -> StoreResult<Vec<WebhookEvent>> {
        let mut due = Vec::new();
        for id in self.scan_ids(WEBHOOK_PENDING_PREFIX)? {
            if let Some(event) = self.get_json::<WebhookEvent>(&id_key(WEBHOOK_PREFIX, id))? {
                if event.status == WebhookStatus::Pending && event.next_retry_at <= now {
                    due.push(event);
                }
            }
        }
        Ok(due)
    }

    async fn claim_webhook_event(&self, event_id: i64) -> StoreResult<Option<WebhookEvent>> {
        let _guard = self.write_lock.lock().await;
        let Some(event) = self.get_json::<WebhookEvent>(&id_key(WEBHOOK_PREFIX, event_id))? else {
            return Ok(None);
        };
        if event.status != WebhookStatus::Pending {
            return Ok(None);
        }
        self.update_webhook(event_id, |e| e.status = WebhookStatus::Processing)
            .map(Some)
    }

    async fn mark_webhook_completed(&self, event_id: i64) -> StoreResult<WebhookEvent> {
        let _guard = self.write_lock.lock().await;
        self.update_webhook(event_id, |e| {
            e.status = WebhookStatus::Completed;
            e.error_message = None;
        })
    }

    async fn mark_webhook_failed(&self, event_id: i64, error: &str) -> StoreResult<WebhookEvent> {
        let _guard = self.write_lock.lock().await;
        self.update_webhook(event_id, |e| {
            e.status = WebhookStatus::Failed;
            e.error_message = Some(error.to_string());
        })
    }

    async fn schedule_webhook_retry(
        &self,
        event_id: i64,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<WebhookEvent> {
        let _guard = self.write_lock.lock().await;
        self.update_webhook(event_id, |e| {
            e.status = WebhookStatus::Pending;
            e.retries += 1;
            e.next_retry_at = next_retry_at;
            e.error_message = Some(error.to_string());
        })
    }

    async fn reset_webhook(
        &self,
        operator_id: i64,
        event_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<WebhookEvent>> {
        let _guard = self.write_lock.lock().await;
        let Some(event) = self.get_json::<WebhookEvent>(&id_key(WEBHOOK_PREFIX, event_id))? else {
            return Ok(None);
        };
        if event.operator_id != Some(operator_id) {
            return Ok(None);
        }
        if event.status == WebhookStatus::Processing {
            return Err(StoreError::Conflict(format!("webhook event {} is being delivered", event_id)));
        }
        self.update_webhook(event_id, |e| {
            e.status = WebhookStatus::Pending;
            e.retries = 0;
            e.created_at = now;
            e.next_retry_at = now;
            e.error_message = None;
        })
        .map(Some)
    }

    async fn list_webhooks(
        &self,
        operator_id: i64,
        status: Option<WebhookStatus>,
    ) -> StoreResult<Vec<WebhookEvent>> {
        let events: Vec<WebhookEvent> = self.scan(WEBHOOK_PREFIX)?;
        Ok(events
            .into_iter()
            .rev()
            .filter(|e| e.operator_id == Some(operator_id))
            .filter(|e| status.map_or(true, |s| e.status == s))
            .collect())
    }
}
