//! Evidence collection: account history into a complete feature bundle.
//!
//! Missing history never fails collection. Each history-derived feature
//! falls back to a sentinel when there is nothing to derive it from:
//!
//! | feature                  | sentinel |
//! |--------------------------|----------|
//! | counts                   | `0`      |
//! | averages / highest       | `0.0`    |
//! | `amount_deviation_ratio` | `1.0`    |
//! | `days_since_last_txn`    | `+∞`     |
//! | `device_seen_before`     | `false`  |
//! | `is_high_value`          | `false`  |
//!
//! Only an unreachable history source is an error.

use crate::config::EvidenceConfig;
use crate::error::EvidenceError;
use crate::types::features::{FeatureBundle, FeatureName, FeatureValue};
use crate::types::transaction::TransactionContext;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// A past transaction on the account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTransaction {
    pub transaction_id: String,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Declined or failed authorization
    #[serde(default)]
    pub failed: bool,
}

/// Long-lived account attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    #[serde(default)]
    pub known_devices: Vec<String>,
    #[serde(default)]
    pub fraud_history_count: u32,
}

/// Everything the history source knows about one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub account_id: String,
    #[serde(default)]
    pub profile: Option<AccountProfile>,
    #[serde(default)]
    pub transactions: Vec<HistoricalTransaction>,
}

/// Source of account history.
///
/// `Ok(None)` means the account is unknown (a new account); `Err` means the
/// source itself could not be reached.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn get_history(&self, account_id: &str) -> Result<Option<HistoryRecord>, EvidenceError>;
}

/// In-memory history source, optionally seeded from a JSON file
pub struct InMemoryHistorySource {
    records: RwLock<HashMap<String, HistoryRecord>>,
    available: AtomicBool,
}

impl InMemoryHistorySource {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Load a JSON array of [`HistoryRecord`]s
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read history file {}", path.display()))?;
        let records: Vec<HistoryRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse history file {}", path.display()))?;
        let source = Self::new();
        for record in records {
            source.insert(record);
        }
        Ok(source)
    }

    pub fn insert(&self, record: HistoryRecord) {
        if let Ok(mut records) = self.records.write() {
            records.insert(record.account_id.clone(), record);
        }
    }

    /// Simulate the backing store going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryHistorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistorySource for InMemoryHistorySource {
    async fn get_history(&self, account_id: &str) -> Result<Option<HistoryRecord>, EvidenceError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(EvidenceError::Unavailable {
                reason: "history store offline".to_string(),
            });
        }
        let records = self.records.read().map_err(|e| EvidenceError::Unavailable {
            reason: format!("history store lock poisoned: {}", e),
        })?;
        Ok(records.get(account_id).cloned())
    }
}

/// Builds the shared feature bundle for a transaction
pub struct EvidenceCollector {
    source: Arc<dyn HistorySource>,
    config: EvidenceConfig,
}

impl EvidenceCollector {
    pub fn new(source: Arc<dyn HistorySource>, config: EvidenceConfig) -> Self {
        Self { source, config }
    }

    /// Fetch history and derive the feature bundle
    pub async fn collect(&self, ctx: &TransactionContext) -> Result<FeatureBundle, EvidenceError> {
        let history = self.source.get_history(&ctx.account_id).await?;
        let bundle = self.assemble(ctx, history.as_ref())?;

        debug!(
            transaction_id = %ctx.transaction_id,
            features = bundle.len(),
            defaulted = bundle.defaulted.len(),
            patterns = ?bundle.patterns,
            "Evidence collected"
        );

        Ok(bundle)
    }

    /// Derive features from the context and (possibly absent) history.
    ///
    /// All time arithmetic is relative to the transaction timestamp.
    pub fn assemble(
        &self,
        ctx: &TransactionContext,
        history: Option<&HistoryRecord>,
    ) -> Result<FeatureBundle, EvidenceError> {
        let now = ctx.timestamp;
        let window_start = now - Duration::days(self.config.history_window_days);
        let day_start = now - Duration::hours(24);
        let week_start = now - Duration::days(7);

        let prior: Vec<&HistoricalTransaction> = history
            .map(|h| {
                h.transactions
                    .iter()
                    .filter(|t| t.timestamp < now && t.transaction_id != ctx.transaction_id)
                    .collect()
            })
            .unwrap_or_default();
        let settled: Vec<f64> = prior
            .iter()
            .filter(|t| !t.failed && t.timestamp >= window_start)
            .map(|t| t.amount)
            .collect();

        let mut values = BTreeMap::new();
        let mut defaulted = BTreeSet::new();
        let mut patterns = Vec::new();

        let mut put = |name: FeatureName, value: FeatureValue| {
            values.insert(name, value);
        };

        put(FeatureName::TransactionAmount, FeatureValue::Numeric(ctx.amount));

        // 30-day amount statistics
        let avg = if settled.is_empty() {
            defaulted.insert(FeatureName::AvgTxnAmount30d);
            defaulted.insert(FeatureName::HighestTxnAmount30d);
            defaulted.insert(FeatureName::AmountDeviationRatio);
            defaulted.insert(FeatureName::IsHighValue);
            put(FeatureName::AvgTxnAmount30d, FeatureValue::Numeric(0.0));
            put(FeatureName::HighestTxnAmount30d, FeatureValue::Numeric(0.0));
            put(FeatureName::AmountDeviationRatio, FeatureValue::Numeric(1.0));
            put(FeatureName::IsHighValue, FeatureValue::Flag(false));
            0.0
        } else {
            let avg = settled.iter().sum::<f64>() / settled.len() as f64;
            let highest = settled.iter().copied().fold(0.0_f64, f64::max);
            let ratio = if avg > 0.0 { ctx.amount / avg } else { 1.0 };
            put(FeatureName::AvgTxnAmount30d, FeatureValue::Numeric(avg));
            put(FeatureName::HighestTxnAmount30d, FeatureValue::Numeric(highest));
            put(FeatureName::AmountDeviationRatio, FeatureValue::Numeric(ratio));
            put(
                FeatureName::IsHighValue,
                FeatureValue::Flag(highest > 0.0 && ctx.amount > highest * 0.8),
            );
            avg
        };
        put(
            FeatureName::TxnCount30d,
            FeatureValue::Numeric(settled.len() as f64),
        );

        let count_24h = prior.iter().filter(|t| t.timestamp >= day_start).count();
        put(FeatureName::TxnCount24h, FeatureValue::Numeric(count_24h as f64));

        let failed_7d = prior
            .iter()
            .filter(|t| t.failed && t.timestamp >= week_start)
            .count();
        put(
            FeatureName::FailedTxnCount7d,
            FeatureValue::Numeric(failed_7d as f64),
        );
        if history.is_none() {
            defaulted.insert(FeatureName::TxnCount30d);
            defaulted.insert(FeatureName::TxnCount24h);
            defaulted.insert(FeatureName::FailedTxnCount7d);
        }

        match prior.iter().map(|t| t.timestamp).max() {
            Some(last) => {
                let days = (now - last).num_seconds() as f64 / 86_400.0;
                put(FeatureName::DaysSinceLastTxn, FeatureValue::Numeric(days));
            }
            None => {
                defaulted.insert(FeatureName::DaysSinceLastTxn);
                put(
                    FeatureName::DaysSinceLastTxn,
                    FeatureValue::Numeric(f64::INFINITY),
                );
            }
        }

        let profile = history.and_then(|h| h.profile.as_ref());
        match profile {
            Some(p) => put(
                FeatureName::PriorFraudCount,
                FeatureValue::Numeric(p.fraud_history_count as f64),
            ),
            None => {
                defaulted.insert(FeatureName::PriorFraudCount);
                put(FeatureName::PriorFraudCount, FeatureValue::Numeric(0.0));
            }
        }

        let has_history = !prior.is_empty() || profile.is_some();
        let device_known = ctx.device_id().map(|device| {
            profile.map_or(false, |p| p.known_devices.iter().any(|d| d == device))
                || prior.iter().any(|t| t.device_id.as_deref() == Some(device))
        });
        match device_known {
            Some(known) if has_history => {
                put(FeatureName::DeviceSeenBefore, FeatureValue::Flag(known));
                if !known {
                    patterns.push("New device detected".to_string());
                }
            }
            _ => {
                defaulted.insert(FeatureName::DeviceSeenBefore);
                put(FeatureName::DeviceSeenBefore, FeatureValue::Flag(false));
            }
        }

        put(FeatureName::IsNewAccount, FeatureValue::Flag(prior.is_empty()));

        // Calendar features
        let hour = now.hour();
        let weekday = now.weekday().num_days_from_monday();
        put(FeatureName::HourOfDay, FeatureValue::Numeric(hour as f64));
        put(FeatureName::DayOfWeek, FeatureValue::Numeric(weekday as f64));
        put(FeatureName::IsWeekend, FeatureValue::Flag(weekday >= 5));
        put(
            FeatureName::IsUnusualHour,
            FeatureValue::Flag((2..=6).contains(&hour)),
        );

        match ctx.channel() {
            Some(channel) => put(
                FeatureName::Channel,
                FeatureValue::Category(channel.to_lowercase()),
            ),
            None => {
                defaulted.insert(FeatureName::Channel);
                put(
                    FeatureName::Channel,
                    FeatureValue::Category("unknown".to_string()),
                );
            }
        }
        put(FeatureName::MediaPresent, FeatureValue::Flag(ctx.media.is_some()));

        // Patterns
        if avg > 0.0 && ctx.amount > avg * self.config.amount_anomaly_multiplier {
            patterns.insert(
                0,
                format!("Amount {:.0}x higher than normal", ctx.amount / avg),
            );
        }
        if count_24h > self.config.velocity_limit_24h as usize {
            patterns.push(format!("High velocity: {} transactions in 24h", count_24h));
        }
        if prior.is_empty() {
            patterns.push("No prior history for account".to_string());
        }

        FeatureBundle::new(ctx.transaction_id.clone(), values, defaulted, patterns).map_err(
            |missing| EvidenceError::IncompleteBundle {
                feature: missing.as_str().to_string(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    fn past(id: &str, amount: f64, at: DateTime<Utc>, device: &str) -> HistoricalTransaction {
        HistoricalTransaction {
            transaction_id: id.to_string(),
            amount,
            timestamp: at,
            device_id: Some(device.to_string()),
            failed: false,
        }
    }

    fn collector(source: Arc<InMemoryHistorySource>) -> EvidenceCollector {
        EvidenceCollector::new(source, EvidenceConfig::default())
    }

    fn context(amount: f64, device: &str) -> TransactionContext {
        TransactionContext::new("tx_now", "acct_1", amount, "USD", ts(15, 3)).with_device(
            crate::types::DeviceMetadata {
                device_id: Some(device.to_string()),
                channel: Some("Online".to_string()),
                location: None,
            },
        )
    }

    #[tokio::test]
    async fn test_new_account_gets_sentinels() {
        let source = Arc::new(InMemoryHistorySource::new());
        let bundle = collector(source).collect(&context(120.0, "dev_a")).await.unwrap();

        assert_eq!(bundle.len(), FeatureName::bundle_features().count());
        assert_eq!(bundle.numeric(FeatureName::TxnCount30d), Some(0.0));
        assert_eq!(
            bundle.numeric(FeatureName::DaysSinceLastTxn),
            Some(f64::INFINITY)
        );
        assert_eq!(bundle.numeric(FeatureName::AmountDeviationRatio), Some(1.0));
        assert_eq!(bundle.flag(FeatureName::IsNewAccount), Some(true));
        assert!(bundle.is_defaulted(FeatureName::AvgTxnAmount30d));
        assert!(bundle.is_defaulted(FeatureName::DeviceSeenBefore));
        for count in [
            FeatureName::TxnCount30d,
            FeatureName::TxnCount24h,
            FeatureName::FailedTxnCount7d,
        ] {
            assert!(bundle.is_defaulted(count), "{:?} should be defaulted", count);
            assert_eq!(bundle.numeric(count), Some(0.0));
        }
        assert!(!bundle.is_defaulted(FeatureName::TransactionAmount));
        assert!(bundle
            .patterns
            .contains(&"No prior history for account".to_string()));
    }

    #[tokio::test]
    async fn test_history_features_and_patterns() {
        let source = Arc::new(InMemoryHistorySource::new());
        let mut transactions = vec![
            past("t1", 100.0, ts(1, 10), "dev_a"),
            past("t2", 200.0, ts(10, 10), "dev_a"),
        ];
        for i in 0..11 {
            transactions.push(past(&format!("v{}", i), 150.0, ts(14, 12), "dev_a"));
        }
        transactions.push(HistoricalTransaction {
            failed: true,
            ..past("f1", 900.0, ts(14, 20), "dev_b")
        });
        // Future and self entries are ignored
        transactions.push(past("late", 5.0, ts(20, 10), "dev_a"));
        transactions.push(past("tx_now", 5000.0, ts(15, 3), "dev_z"));
        source.insert(HistoryRecord {
            account_id: "acct_1".to_string(),
            profile: Some(AccountProfile {
                known_devices: vec!["dev_a".to_string()],
                fraud_history_count: 1,
            }),
            transactions,
        });

        let bundle = collector(source).collect(&context(5000.0, "dev_z")).await.unwrap();

        assert_eq!(bundle.numeric(FeatureName::TxnCount30d), Some(13.0));
        let avg = bundle.numeric(FeatureName::AvgTxnAmount30d).unwrap();
        assert!((avg - 150.0).abs() < 1e-9);
        assert_eq!(bundle.numeric(FeatureName::TxnCount24h), Some(12.0));
        assert_eq!(bundle.numeric(FeatureName::FailedTxnCount7d), Some(1.0));
        assert_eq!(bundle.numeric(FeatureName::PriorFraudCount), Some(1.0));
        assert_eq!(bundle.flag(FeatureName::DeviceSeenBefore), Some(false));
        assert_eq!(bundle.flag(FeatureName::IsHighValue), Some(true));
        assert_eq!(bundle.flag(FeatureName::IsUnusualHour), Some(true));
        assert_eq!(
            bundle.get(FeatureName::Channel),
            Some(&FeatureValue::Category("online".to_string()))
        );
        assert!(bundle.defaulted.is_empty());
        assert!(bundle.patterns[0].starts_with("Amount 33x"));
        assert!(bundle
            .patterns
            .contains(&"High velocity: 12 transactions in 24h".to_string()));
        assert!(bundle.patterns.contains(&"New device detected".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_source_is_an_error() {
        let source = Arc::new(InMemoryHistorySource::new());
        source.set_available(false);
        let err = collector(source)
            .collect(&context(10.0, "dev_a"))
            .await
            .unwrap_err();
        assert!(matches!(err, EvidenceError::Unavailable { .. }));
    }

    #[test]
    fn test_history_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("history-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("history.json");
        let records = vec![HistoryRecord {
            account_id: "acct_9".to_string(),
            profile: None,
            transactions: vec![past("t1", 10.0, ts(1, 1), "dev_a")],
        }];
        std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

        let source = InMemoryHistorySource::from_file(&path).unwrap();
        assert_eq!(source.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }
}
