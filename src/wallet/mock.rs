//! Local wallet for development and tests
//!
//! Same signed protocol as a real wallet: verifies the request signature,
//! replays a request id it has already applied, and declines debits that
//! would overdraw. Usable in-process through [`Wallet`] or over HTTP via
//! [`router`].

use super::{Wallet, WalletReceipt, WalletRequest};
use crate::errors::WalletError;
use crate::signing::{verify_hex, wallet_payload};
use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Debit,
    Credit,
}

struct Ledger {
    secret: String,
    default_balance: f64,
    balances: DashMap<i64, f64>,
    /// Successful request ids; declines are not recorded since nothing moved
    applied: DashMap<String, WalletReceipt>,
    debit_calls: AtomicU64,
    credit_calls: AtomicU64,
    credits_unavailable: AtomicBool,
}

#[derive(Clone)]
pub struct MockWallet {
    ledger: Arc<Ledger>,
}

impl MockWallet {
    /// Every unseen player starts at `default_balance`
    pub fn new(secret: &str, default_balance: f64) -> Self {
        Self {
            ledger: Arc::new(Ledger {
                secret: secret.to_string(),
                default_balance,
                balances: DashMap::new(),
                applied: DashMap::new(),
                debit_calls: AtomicU64::new(0),
                credit_calls: AtomicU64::new(0),
                credits_unavailable: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_balance(&self, player_id: i64, balance: f64) {
        self.ledger.balances.insert(player_id, balance);
    }

    pub fn balance(&self, player_id: i64) -> f64 {
        self.ledger
            .balances
            .get(&player_id)
            .map_or(self.ledger.default_balance, |b| *b)
    }

    /// Make credit calls fail with 503 until switched back
    pub fn set_credits_unavailable(&self, unavailable: bool) {
        self.ledger.credits_unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn debit_calls(&self) -> u64 {
        self.ledger.debit_calls.load(Ordering::SeqCst)
    }

    pub fn credit_calls(&self) -> u64 {
        self.ledger.credit_calls.load(Ordering::SeqCst)
    }

    pub fn verify(&self, request: &WalletRequest) -> bool {
        let payload = wallet_payload(request.player_id, request.amount, &request.request_id);
        verify_hex(self.ledger.secret.as_bytes(), &[payload.as_bytes()], &request.signature)
    }

    fn apply(&self, op: Operation, player_id: i64, amount: f64, request_id: &str) -> Result<WalletReceipt, StatusCode> {
        let ledger = &self.ledger;
        match op {
            Operation::Debit => ledger.debit_calls.fetch_add(1, Ordering::SeqCst),
            Operation::Credit => ledger.credit_calls.fetch_add(1, Ordering::SeqCst),
        };

        if op == Operation::Credit && ledger.credits_unavailable.load(Ordering::SeqCst) {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }

        // The entry guard serialises concurrent calls with the same request id.
        let slot = match ledger.applied.entry(request_id.to_string()) {
            Entry::Occupied(prior) => {
                debug!(request_id, "Replayed wallet request");
                return Ok(WalletReceipt {
                    success: prior.get().success,
                    balance: self.balance(player_id),
                });
            }
            Entry::Vacant(slot) => slot,
        };

        let mut balance = ledger.balances.entry(player_id).or_insert(ledger.default_balance);
        let receipt = match op {
            Operation::Debit if *balance < amount => {
                return Ok(WalletReceipt {
                    success: false,
                    balance: *balance,
                });
            }
            Operation::Debit => {
                *balance -= amount;
                WalletReceipt { success: true, balance: *balance }
            }
            Operation::Credit => {
                *balance += amount;
                WalletReceipt { success: true, balance: *balance }
            }
        };
        drop(balance);

        slot.insert(receipt);
        Ok(receipt)
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn debit(&self, player_id: i64, amount: f64, request_id: &str) -> Result<WalletReceipt, WalletError> {
        self.apply(Operation::Debit, player_id, amount, request_id)
            .map_err(|status| WalletError::Status(status.as_u16()))
    }

    async fn credit(&self, player_id: i64, amount: f64, request_id: &str) -> Result<WalletReceipt, WalletError> {
        self.apply(Operation::Credit, player_id, amount, request_id)
            .map_err(|status| WalletError::Status(status.as_u16()))
    }
}

async fn handle(
    wallet: &MockWallet,
    op: Operation,
    request: WalletRequest,
) -> Result<Json<WalletReceipt>, (StatusCode, &'static str)> {
    if !wallet.verify(&request) {
        warn!(request_id = %request.request_id, "Rejected wallet request with bad signature");
        return Err((StatusCode::UNAUTHORIZED, "invalid signature"));
    }

    wallet
        .apply(op, request.player_id, request.amount, &request.request_id)
        .map(Json)
        .map_err(|status| (status, "wallet unavailable"))
}

async fn debit_handler(
    State(wallet): State<MockWallet>,
    Json(request): Json<WalletRequest>,
) -> Result<Json<WalletReceipt>, (StatusCode, &'static str)> {
    handle(&wallet, Operation::Debit, request).await
}

async fn credit_handler(
    State(wallet): State<MockWallet>,
    Json(request): Json<WalletRequest>,
) -> Result<Json<WalletReceipt>, (StatusCode, &'static str)> {
    handle(&wallet, Operation::Credit, request).await
}

pub fn router(wallet: MockWallet) -> Router {
    info!("Wallet mock routes: POST /wallet/debit, POST /wallet/credit");
    Router::new()
        .route("/wallet/debit", post(debit_handler))
        .route("/wallet/credit", post(credit_handler))
        .with_state(wallet)
}
