//! Error types for the RGS transaction core
//!
//! One enum per concern, rolled up into [`RgsError`] for binaries and
//! top-level callers.

use thiserror::Error;

/// Root error type for all RGS operations
#[derive(Debug, Error)]
pub enum RgsError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Missing required setting: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// The unique (operator_id, idempotency_key) index rejected a second bet.
    #[error("Bet with idempotency key '{key}' already exists for operator {operator_id}")]
    DuplicateIdempotencyKey { operator_id: i64, key: String },

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Storage backend failure: {0}")]
    Backend(String),

    #[error("Corrupted record: {0}")]
    Codec(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

/// Remote wallet call failures. Never retried inside the client.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Wallet request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Wallet transport failure: {0}")]
    Transport(String),

    #[error("Wallet returned HTTP {0}")]
    Status(u16),

    #[error("Failed to decode wallet response: {0}")]
    Decode(String),

    #[error("Failed to sign wallet request: {0}")]
    Signature(String),
}

impl From<reqwest::Error> for WalletError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            WalletError::Decode(e.to_string())
        } else {
            WalletError::Transport(e.to_string())
        }
    }
}

/// Webhook delivery failures
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Failed to encode webhook payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Webhook request failed: {0}")]
    Transport(String),

    #[error("Webhook delivery returned status {0}")]
    Status(u16),
}

impl From<reqwest::Error> for WebhookError {
    fn from(e: reqwest::Error) -> Self {
        WebhookError::Transport(e.to_string())
    }
}

/// Compliance rule that blocked a bet
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComplianceViolation {
    #[error("jurisdiction '{0}' not allowed")]
    JurisdictionNotAllowed(String),

    #[error("bet {amount} exceeds operator max bet limit {max_bet}")]
    MaxBetExceeded { amount: f64, max_bet: f64 },
}

/// Outcomes of `place_bet` that are not a settled bet
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Player {player_id} not found for operator {operator_id}")]
    PlayerNotFound { operator_id: i64, player_id: i64 },

    #[error("Compliance violation: {0}")]
    ComplianceViolation(#[from] ComplianceViolation),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Wallet unavailable: {0}")]
    WalletUnavailable(#[source] WalletError),

    #[error("Invalid bet amount: {0}")]
    InvalidAmount(f64),

    #[error("Entropy source failure: {0}")]
    Entropy(String),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

impl SettlementError {
    /// Business declines are surfaced to the caller as a refused bet, not an
    /// internal failure.
    pub fn is_decline(&self) -> bool {
        matches!(
            self,
            SettlementError::PlayerNotFound { .. }
                | SettlementError::ComplianceViolation(_)
                | SettlementError::InsufficientFunds
                | SettlementError::InvalidAmount(_)
        )
    }
}

pub type RgsResult<T> = Result<T, RgsError>;
pub type StoreResult<T> = Result<T, StoreError>;
