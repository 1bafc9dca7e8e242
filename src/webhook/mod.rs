//! Operator webhook notifications
//!
//! Rows describing settlement facts are queued in the store and delivered
//! by the webhook worker through a [`WebhookSender`].

pub mod client;

pub use client::HttpWebhookSender;

use crate::errors::WebhookError;
use crate::models::{Bet, BetStatus};
use async_trait::async_trait;
use serde_json::{json, Value};

pub const SETTLEMENT_SUCCESS: &str = "settlement_success";
pub const SETTLEMENT_PENDING: &str = "settlement_pending";
pub const SETTLEMENT_LOST: &str = "settlement_lost";

pub const TIMESTAMP_HEADER: &str = "X-RGS-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-RGS-Signature";

#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// One signed delivery attempt. Only a 2xx response is success.
    async fn send(&self, url: &str, secret: &str, payload: &Value) -> Result<(), WebhookError>;
}

/// Event type and payload for a bet that reached a final status. `None`
/// while the bet is still processing.
pub fn settlement_notification(bet: &Bet) -> Option<(&'static str, Value)> {
    let (event_type, status, amount) = match bet.status {
        BetStatus::Won => (SETTLEMENT_SUCCESS, "won", bet.win_amount),
        BetStatus::PendingSettlement => (SETTLEMENT_PENDING, "pending", bet.win_amount),
        BetStatus::Lost => (SETTLEMENT_LOST, "lost", 0.0),
        BetStatus::Processing => return None,
    };

    Some((
        event_type,
        json!({
            "bet_id": bet.id,
            "round_id": bet.round_id,
            "amount": amount,
            "status": status,
            "player_id": bet.player_id,
        }),
    ))
}

/// Webhook backoff: 0s, 5s, 10s, 20s, then 25s for every later retry
pub fn next_retry_delay(retries: u32) -> chrono::Duration {
    let secs = match retries {
        0 => 0,
        1 => 5,
        2 => 10,
        3 => 20,
        _ => 25,
    };
    chrono::Duration::seconds(secs)
}
