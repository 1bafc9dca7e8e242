//! Signed webhook delivery over HTTP

use super::{WebhookSender, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::errors::WebhookError;
use crate::signing::{sign_hex, verify_hex};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Hex HMAC-SHA256(secret, timestamp || body)
pub fn signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
    sign_hex(secret.as_bytes(), &[timestamp.as_bytes(), body])
}

/// Receiver-side check an operator can run against the delivery headers
pub fn verify_signature(secret: &str, timestamp: &str, body: &[u8], signature: &str) -> bool {
    verify_hex(secret.as_bytes(), &[timestamp.as_bytes(), body], signature)
}

pub struct HttpWebhookSender {
    client: reqwest::Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, secret: &str, payload: &Value) -> Result<(), WebhookError> {
        let body = serde_json::to_vec(payload)?;
        let timestamp = Utc::now().timestamp().to_string();
        let sig = signature(secret, &timestamp, &body);

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(TIMESTAMP_HEADER, &timestamp)
            .header(SIGNATURE_HEADER, sig)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebhookError::Status(status.as_u16()));
        }

        debug!(url, status = status.as_u16(), "Webhook delivered");
        Ok(())
    }
}
