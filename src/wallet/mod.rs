//! Remote wallet integration
//!
//! The RGS never holds balances. Money moves through signed debit/credit
//! calls, each carrying a request id the wallet uses to deduplicate.

pub mod client;
pub mod mock;

pub use client::HttpWallet;
pub use mock::MockWallet;

use crate::errors::WalletError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Signed body of `POST /wallet/debit` and `POST /wallet/credit`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalletRequest {
    pub player_id: i64,
    pub amount: f64,
    pub request_id: String,
    pub signature: String,
}

/// `success == false` is an explicit decline (e.g. insufficient funds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WalletReceipt {
    pub success: bool,
    pub balance: f64,
}

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn debit(&self, player_id: i64, amount: f64, request_id: &str) -> Result<WalletReceipt, WalletError>;

    async fn credit(&self, player_id: i64, amount: f64, request_id: &str) -> Result<WalletReceipt, WalletError>;
}
