//! Persistent records of the settlement core
//!
//! Rows are owned by the [`Store`](crate::store::Store) implementation; the
//! `New*` structs are what callers hand in before ids and timestamps exist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Casino operator integrating with the RGS
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operator {
    pub id: i64,
    pub name: String,
    pub api_key: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct NewOperator {
    pub name: String,
    pub api_key: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: i64,
    pub operator_id: i64,
    pub external_player_id: String,
    pub jurisdiction: String,
    pub created_at: DateTime<Utc>,
}

/// Per-operator compliance configuration. An empty allow-list and a zero
/// max bet both mean "unrestricted".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperatorLimits {
    pub operator_id: i64,
    #[serde(default)]
    pub allowed_jurisdictions: Vec<String>,
    #[serde(default)]
    pub max_bet: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLog {
    pub id: i64,
    pub operator_id: i64,
    pub player_id: Option<i64>,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub operator_id: i64,
    pub player_id: Option<i64>,
    pub action: String,
    pub details: serde_json::Value,
}

/// One provably-fair draw. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub id: i64,
    pub operator_id: i64,
    pub player_id: i64,
    pub server_seed: String,
    pub client_seed: String,
    /// Hex HMAC-SHA256(server_seed, client_seed); lets anyone re-derive `outcome`
    pub hash: String,
    pub outcome: u8,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewRound {
    pub operator_id: i64,
    pub player_id: i64,
    pub server_seed: String,
    pub client_seed: String,
    pub hash: String,
    pub outcome: u8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Processing,
    Won,
    Lost,
    PendingSettlement,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Processing => "processing",
            BetStatus::Won => "won",
            BetStatus::Lost => "lost",
            BetStatus::PendingSettlement => "pending_settlement",
        }
    }
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub id: i64,
    pub operator_id: i64,
    pub player_id: i64,
    pub round_id: i64,
    pub amount: f64,
    pub outcome: u8,
    pub win_amount: f64,
    pub status: BetStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Bet as reserved before the wallet debit; `round_id` comes from the round
/// written in the same unit of work.
#[derive(Debug, Clone)]
pub struct NewBet {
    pub operator_id: i64,
    pub player_id: i64,
    pub amount: f64,
    pub outcome: u8,
    pub idempotency_key: String,
}

/// Payout still owed to a player after a failed win credit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub bet_id: i64,
    pub operator_id: i64,
    pub player_id: i64,
    pub amount: f64,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Wallet request id for this retry; distinct from the original
    /// `<key>-win` credit so the wallet treats it as its own operation.
    pub fn credit_key(&self) -> String {
        format!("bet-{}-retry-{}", self.bet_id, self.id)
    }
}

#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub operator_id: i64,
    pub player_id: i64,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Processing => "processing",
            WebhookStatus::Completed => "completed",
            WebhookStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WebhookStatus::Completed | WebhookStatus::Failed)
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(WebhookStatus::Pending),
            "processing" => Ok(WebhookStatus::Processing),
            "completed" => Ok(WebhookStatus::Completed),
            "failed" => Ok(WebhookStatus::Failed),
            other => Err(format!("unknown webhook status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookEvent {
    pub id: i64,
    pub operator_id: Option<i64>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: WebhookStatus,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub operator_id: Option<i64>,
    pub event_type: String,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bet_status_wire_names() {
        let json = serde_json::to_string(&BetStatus::PendingSettlement).unwrap();
        assert_eq!(json, "\"pending_settlement\"");
        assert_eq!(BetStatus::Won.to_string(), "won");
    }

    #[test]
    fn test_webhook_status_parse() {
        assert_eq!("Pending".parse::<WebhookStatus>(), Ok(WebhookStatus::Pending));
        assert!("retrying".parse::<WebhookStatus>().is_err());
        assert!(WebhookStatus::Failed.is_terminal());
        assert!(!WebhookStatus::Processing.is_terminal());
    }

    #[test]
    fn test_outbox_credit_key() {
        let entry = OutboxEntry {
            id: 9,
            bet_id: 42,
            operator_id: 1,
            player_id: 3,
            amount: 50.0,
            processed: false,
            created_at: Utc::now(),
        };
        assert_eq!(entry.credit_key(), "bet-42-retry-9");
    }
}
