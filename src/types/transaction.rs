//! Transaction context submitted for risk evaluation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;

/// Pointer to a biometric sample (selfie, liveness clip) held in external storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Storage location of the uploaded sample
    pub uri: String,
    /// Verification code the subject was asked to present, if any
    #[serde(default)]
    pub expected_code: Option<String>,
}

/// Device and channel metadata attached to a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    /// Stable device identifier
    #[serde(default)]
    pub device_id: Option<String>,
    /// Channel the transaction arrived on (online, pos, atm, mobile, ...)
    #[serde(default)]
    pub channel: Option<String>,
    /// Coarse location string
    #[serde(default)]
    pub location: Option<String>,
}

/// Immutable input to one evaluation.
///
/// Created once per request and never mutated; every downstream component
/// receives a shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionContext {
    /// Globally unique transaction identifier
    pub transaction_id: String,

    /// Subject account identifier
    pub account_id: String,

    /// Monetary amount
    pub amount: f64,

    /// ISO 4217 currency code
    pub currency: String,

    /// Transaction timestamp
    pub timestamp: DateTime<Utc>,

    /// Biometric sample accompanying the transaction
    #[serde(default)]
    pub media: Option<MediaRef>,

    /// Device/channel metadata
    #[serde(default)]
    pub device: Option<DeviceMetadata>,
}

impl TransactionContext {
    /// Create a context with the required fields and no media or device data
    pub fn new(
        transaction_id: impl Into<String>,
        account_id: impl Into<String>,
        amount: f64,
        currency: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            account_id: account_id.into(),
            amount,
            currency: currency.into(),
            timestamp,
            media: None,
            device: None,
        }
    }

    /// Attach a biometric sample
    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media = Some(media);
        self
    }

    /// Attach device metadata
    pub fn with_device(mut self, device: DeviceMetadata) -> Self {
        self.device = Some(device);
        self
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device.as_ref().and_then(|d| d.device_id.as_deref())
    }

    pub fn channel(&self) -> Option<&str> {
        self.device.as_ref().and_then(|d| d.channel.as_deref())
    }

    /// Reject contexts missing required fields or carrying malformed values
    pub fn validate(&self) -> Result<(), EvaluationError> {
        if self.transaction_id.trim().is_empty() {
            return Err(EvaluationError::invalid_input("transaction_id is empty"));
        }
        if self.account_id.trim().is_empty() {
            return Err(EvaluationError::invalid_input("account_id is empty"));
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(EvaluationError::invalid_input(format!(
                "amount must be a finite non-negative number, got {}",
                self.amount
            )));
        }
        let currency_ok =
            self.currency.len() == 3 && self.currency.chars().all(|c| c.is_ascii_uppercase());
        if !currency_ok {
            return Err(EvaluationError::invalid_input(format!(
                "currency must be a 3-letter ISO code, got {:?}",
                self.currency
            )));
        }
        if let Some(media) = &self.media {
            if media.uri.trim().is_empty() {
                return Err(EvaluationError::invalid_input("media uri is empty"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> TransactionContext {
        TransactionContext::new(
            "tx_123",
            "acct_1",
            250.0,
            "USD",
            Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_context_deserializes_without_optional_fields() {
        let json = r#"{
            "transaction_id": "tx_9",
            "account_id": "acct_9",
            "amount": 10.5,
            "currency": "EUR",
            "timestamp": "2025-03-04T12:00:00Z"
        }"#;
        let ctx: TransactionContext = serde_json::from_str(json).unwrap();
        assert!(ctx.media.is_none());
        assert!(ctx.device_id().is_none());
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_malformed_input() {
        let mut ctx = sample();
        ctx.transaction_id = "  ".to_string();
        assert!(matches!(ctx.validate(), Err(EvaluationError::InvalidInput { .. })));

        let mut ctx = sample();
        ctx.amount = f64::NAN;
        assert!(ctx.validate().is_err());

        let mut ctx = sample();
        ctx.currency = "usd".to_string();
        assert!(ctx.validate().is_err());

        let ctx = sample().with_media(MediaRef {
            uri: String::new(),
            expected_code: None,
        });
        assert!(ctx.validate().is_err());
    }
}
