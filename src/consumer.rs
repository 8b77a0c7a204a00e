//! NATS consumer for incoming transaction contexts

use crate::types::transaction::TransactionContext;
use anyhow::{Context, Result};
use async_nats::{Client, Subscriber};
use tracing::info;

/// Subscribes to the transaction subject and decodes contexts
pub struct TransactionConsumer {
    client: Client,
    subject: String,
}

impl TransactionConsumer {
    pub fn new(client: Client, subject: &str) -> Self {
        Self {
            client,
            subject: subject.to_string(),
        }
    }

    pub async fn subscribe(&self) -> Result<Subscriber> {
        let subscriber = self
            .client
            .subscribe(self.subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", self.subject))?;
        info!(subject = %self.subject, "Subscribed to transaction subject");
        Ok(subscriber)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Decode one message payload
    pub fn decode(payload: &[u8]) -> Result<TransactionContext> {
        serde_json::from_slice(payload).context("Failed to deserialize transaction context")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_context() {
        let payload = br#"{
            "transaction_id": "tx_1",
            "account_id": "acct_9",
            "amount": 120.5,
            "currency": "USD",
            "timestamp": "2026-03-01T12:00:00Z",
            "media": {"uri": "s3://kyc/tx_1.jpg", "expected_code": "4821"}
        }"#;
        let ctx = TransactionConsumer::decode(payload).unwrap();
        assert_eq!(ctx.account_id, "acct_9");
        assert_eq!(ctx.media.unwrap().expected_code.as_deref(), Some("4821"));
        assert!(ctx.device.is_none());

        assert!(TransactionConsumer::decode(b"{\"amount\": 1}").is_err());
    }
}
