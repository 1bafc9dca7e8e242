//! Signed HTTP wallet client. Failures are reported, never retried here.

use super::{Wallet, WalletReceipt, WalletRequest};
use crate::errors::WalletError;
use crate::signing::{sign_hex, wallet_payload};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

pub struct HttpWallet {
    base_url: String,
    secret: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpWallet {
    pub fn new(base_url: &str, secret: &str, timeout: Duration) -> Result<Self, WalletError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
            timeout,
            client,
        })
    }

    pub fn sign(&self, player_id: i64, amount: f64, request_id: &str) -> String {
        let payload = wallet_payload(player_id, amount, request_id);
        sign_hex(self.secret.as_bytes(), &[payload.as_bytes()])
    }

    async fn call(
        &self,
        path: &str,
        player_id: i64,
        amount: f64,
        request_id: &str,
    ) -> Result<WalletReceipt, WalletError> {
        let body = WalletRequest {
            player_id,
            amount,
            request_id: request_id.to_string(),
            signature: self.sign(player_id, amount, request_id),
        };

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            warn!(path, player_id, request_id, status = status.as_u16(), "Wallet returned error status");
            return Err(WalletError::Status(status.as_u16()));
        }

        let receipt: WalletReceipt = response.json().await.map_err(|e| self.classify(e))?;
        debug!(path, player_id, request_id, success = receipt.success, "Wallet call complete");
        Ok(receipt)
    }

    fn classify(&self, e: reqwest::Error) -> WalletError {
        if e.is_timeout() {
            WalletError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            warn!(error = %e, "Wallet request failed");
            WalletError::from(e)
        }
    }
}

#[async_trait]
impl Wallet for HttpWallet {
    async fn debit(&self, player_id: i64, amount: f64, request_id: &str) -> Result<WalletReceipt, WalletError> {
        self.call("/wallet/debit", player_id, amount, request_id).await
    }

    async fn credit(&self, player_id: i64, amount: f64, request_id: &str) -> Result<WalletReceipt, WalletError> {
        self.call("/wallet/credit", player_id, amount, request_id).await
    }
}
