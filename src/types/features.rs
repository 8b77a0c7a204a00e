//! Versioned feature vocabulary and the per-request feature bundle.
//!
//! Every scoring agent reads the same [`FeatureBundle`]. The bundle always
//! holds a value for every bundle feature in the vocabulary; features that
//! could not be derived from history carry a documented sentinel and are
//! listed in [`FeatureBundle::defaulted`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version of the feature vocabulary stamped on bundles and verdicts
pub const FEATURE_VOCABULARY_VERSION: &str = "fv-2";

/// Recency value used in place of +∞ when encoding for a model
pub const RECENCY_CAP_DAYS: f32 = 3650.0;

/// Known channel categories, in label-encoder order. Unknown channels encode as 0.
pub const CHANNEL_CATEGORIES: [&str; 5] = ["unknown", "online", "mobile", "pos", "atm"];

/// Where a vocabulary entry comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    /// Read directly off the transaction
    Transaction,
    /// Derived from account history
    History,
    /// Biometric verification signal (attribution target only)
    Biometric,
}

/// Closed, versioned feature vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    TransactionAmount,
    AvgTxnAmount30d,
    AmountDeviationRatio,
    TxnCount30d,
    TxnCount24h,
    DaysSinceLastTxn,
    HighestTxnAmount30d,
    IsHighValue,
    FailedTxnCount7d,
    PriorFraudCount,
    DeviceSeenBefore,
    IsNewAccount,
    HourOfDay,
    DayOfWeek,
    IsWeekend,
    IsUnusualHour,
    Channel,
    MediaPresent,
    FaceMatchScore,
    DeepfakeArtifacts,
    VerificationCodeMatch,
}

impl FeatureName {
    /// Full vocabulary in canonical order
    pub const ALL: [FeatureName; 21] = [
        FeatureName::TransactionAmount,
        FeatureName::AvgTxnAmount30d,
        FeatureName::AmountDeviationRatio,
        FeatureName::TxnCount30d,
        FeatureName::TxnCount24h,
        FeatureName::DaysSinceLastTxn,
        FeatureName::HighestTxnAmount30d,
        FeatureName::IsHighValue,
        FeatureName::FailedTxnCount7d,
        FeatureName::PriorFraudCount,
        FeatureName::DeviceSeenBefore,
        FeatureName::IsNewAccount,
        FeatureName::HourOfDay,
        FeatureName::DayOfWeek,
        FeatureName::IsWeekend,
        FeatureName::IsUnusualHour,
        FeatureName::Channel,
        FeatureName::MediaPresent,
        FeatureName::FaceMatchScore,
        FeatureName::DeepfakeArtifacts,
        FeatureName::VerificationCodeMatch,
    ];

    /// Features carried by every bundle, in model input order
    pub fn bundle_features() -> impl Iterator<Item = FeatureName> {
        Self::ALL
            .into_iter()
            .filter(|f| f.source() != FeatureSource::Biometric)
    }

    /// Stable snake_case identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::TransactionAmount => "transaction_amount",
            FeatureName::AvgTxnAmount30d => "avg_txn_amount_30d",
            FeatureName::AmountDeviationRatio => "amount_deviation_ratio",
            FeatureName::TxnCount30d => "txn_count_30d",
            FeatureName::TxnCount24h => "txn_count_24h",
            FeatureName::DaysSinceLastTxn => "days_since_last_txn",
            FeatureName::HighestTxnAmount30d => "highest_txn_amount_30d",
            FeatureName::IsHighValue => "is_high_value",
            FeatureName::FailedTxnCount7d => "failed_txn_count_7d",
            FeatureName::PriorFraudCount => "prior_fraud_count",
            FeatureName::DeviceSeenBefore => "device_seen_before",
            FeatureName::IsNewAccount => "is_new_account",
            FeatureName::HourOfDay => "hour_of_day",
            FeatureName::DayOfWeek => "day_of_week",
            FeatureName::IsWeekend => "is_weekend",
            FeatureName::IsUnusualHour => "is_unusual_hour",
            FeatureName::Channel => "channel",
            FeatureName::MediaPresent => "media_present",
            FeatureName::FaceMatchScore => "face_match_score",
            FeatureName::DeepfakeArtifacts => "deepfake_artifacts",
            FeatureName::VerificationCodeMatch => "verification_code_match",
        }
    }

    /// Human-readable label used in explanations
    pub fn label(&self) -> &'static str {
        match self {
            FeatureName::TransactionAmount => "Transaction amount",
            FeatureName::AvgTxnAmount30d => "Average transaction amount (30 days)",
            FeatureName::AmountDeviationRatio => "Amount relative to account average",
            FeatureName::TxnCount30d => "Transactions in the last 30 days",
            FeatureName::TxnCount24h => "Transactions in the last 24 hours",
            FeatureName::DaysSinceLastTxn => "Days since previous transaction",
            FeatureName::HighestTxnAmount30d => "Highest transaction amount (30 days)",
            FeatureName::IsHighValue => "High-value transaction",
            FeatureName::FailedTxnCount7d => "Failed transactions in the last 7 days",
            FeatureName::PriorFraudCount => "Prior confirmed fraud",
            FeatureName::DeviceSeenBefore => "Known device",
            FeatureName::IsNewAccount => "Account has no history",
            FeatureName::HourOfDay => "Hour of day",
            FeatureName::DayOfWeek => "Day of week",
            FeatureName::IsWeekend => "Weekend transaction",
            FeatureName::IsUnusualHour => "Unusual hour (02:00-06:00)",
            FeatureName::Channel => "Transaction channel",
            FeatureName::MediaPresent => "Biometric sample supplied",
            FeatureName::FaceMatchScore => "Face match against reference",
            FeatureName::DeepfakeArtifacts => "Synthetic media artifacts",
            FeatureName::VerificationCodeMatch => "Verification code match",
        }
    }

    pub fn source(&self) -> FeatureSource {
        match self {
            FeatureName::TransactionAmount
            | FeatureName::HourOfDay
            | FeatureName::DayOfWeek
            | FeatureName::IsWeekend
            | FeatureName::IsUnusualHour
            | FeatureName::Channel
            | FeatureName::MediaPresent => FeatureSource::Transaction,
            FeatureName::FaceMatchScore
            | FeatureName::DeepfakeArtifacts
            | FeatureName::VerificationCodeMatch => FeatureSource::Biometric,
            _ => FeatureSource::History,
        }
    }

    /// Column name the transaction model was trained with
    pub fn model_column(&self) -> &'static str {
        match self {
            FeatureName::TransactionAmount => "Transaction_Amount",
            FeatureName::AvgTxnAmount30d => "Avg_Transaction_Amount_30d",
            FeatureName::AmountDeviationRatio => "amount_deviation_ratio",
            FeatureName::TxnCount30d => "Transaction_Count_30d",
            FeatureName::TxnCount24h => "Daily_Transaction_Count",
            FeatureName::DaysSinceLastTxn => "Days_Since_Last_Transaction",
            FeatureName::HighestTxnAmount30d => "Highest_Transaction_30d",
            FeatureName::IsHighValue => "is_high_value",
            FeatureName::FailedTxnCount7d => "Failed_Transaction_Count_7d",
            FeatureName::PriorFraudCount => "Previous_Fraudulent_Activity",
            FeatureName::DeviceSeenBefore => "Known_Device",
            FeatureName::IsNewAccount => "is_new_account",
            FeatureName::HourOfDay => "hour_of_day",
            FeatureName::DayOfWeek => "day_of_week",
            FeatureName::IsWeekend => "Is_Weekend",
            FeatureName::IsUnusualHour => "is_unusual_hour",
            FeatureName::Channel => "Transaction_Type",
            FeatureName::MediaPresent => "media_present",
            FeatureName::FaceMatchScore => "face_match",
            FeatureName::DeepfakeArtifacts => "deepfake_artifacts",
            FeatureName::VerificationCodeMatch => "code_validated",
        }
    }

    /// Resolve a native identifier (canonical id, model column, or legacy alias)
    pub fn resolve(raw: &str) -> Option<FeatureName> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == trimmed || f.model_column().eq_ignore_ascii_case(trimmed))
            .or_else(|| match trimmed {
                "Avg_Transaction_Amount_7d" => Some(FeatureName::AvgTxnAmount30d),
                "is_new_device" => Some(FeatureName::DeviceSeenBefore),
                "face_match_score" => Some(FeatureName::FaceMatchScore),
                _ => None,
            })
    }
}

/// A single feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FeatureValue {
    Numeric(f64),
    Flag(bool),
    Category(String),
}

impl FeatureValue {
    /// Encode as a model input, label-encoding categories and capping +∞
    pub fn encode(&self) -> f32 {
        match self {
            FeatureValue::Numeric(v) if v.is_infinite() && *v > 0.0 => RECENCY_CAP_DAYS,
            FeatureValue::Numeric(v) if v.is_nan() => 0.0,
            FeatureValue::Numeric(v) => *v as f32,
            FeatureValue::Flag(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            FeatureValue::Category(c) => CHANNEL_CATEGORIES
                .iter()
                .position(|known| known.eq_ignore_ascii_case(c))
                .unwrap_or(0) as f32,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FeatureValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

/// Derived features for one transaction, shared read-only by every agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBundle {
    pub transaction_id: String,
    pub vocabulary_version: String,
    values: BTreeMap<FeatureName, FeatureValue>,
    /// Features that fell back to their sentinel because history was missing
    pub defaulted: BTreeSet<FeatureName>,
    /// Human-readable patterns found while collecting evidence
    pub patterns: Vec<String>,
}

impl FeatureBundle {
    /// Build a bundle; fails if any bundle feature is missing or a biometric
    /// feature is present.
    pub fn new(
        transaction_id: impl Into<String>,
        values: BTreeMap<FeatureName, FeatureValue>,
        defaulted: BTreeSet<FeatureName>,
        patterns: Vec<String>,
    ) -> Result<Self, FeatureName> {
        if let Some(missing) = FeatureName::bundle_features().find(|f| !values.contains_key(f)) {
            return Err(missing);
        }
        if let Some(stray) = values
            .keys()
            .find(|f| f.source() == FeatureSource::Biometric)
        {
            return Err(*stray);
        }
        Ok(Self {
            transaction_id: transaction_id.into(),
            vocabulary_version: FEATURE_VOCABULARY_VERSION.to_string(),
            values,
            defaulted,
            patterns,
        })
    }

    pub fn get(&self, name: FeatureName) -> Option<&FeatureValue> {
        self.values.get(&name)
    }

    pub fn numeric(&self, name: FeatureName) -> Option<f64> {
        self.get(name).and_then(FeatureValue::as_f64)
    }

    pub fn flag(&self, name: FeatureName) -> Option<bool> {
        self.get(name).and_then(FeatureValue::as_flag)
    }

    pub fn is_defaulted(&self, name: FeatureName) -> bool {
        self.defaulted.contains(&name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FeatureName, &FeatureValue)> {
        self.values.iter()
    }

    /// Encode into the model input vector, in vocabulary order
    pub fn to_model_input(&self) -> Vec<f32> {
        FeatureName::bundle_features()
            .map(|f| self.values.get(&f).map(FeatureValue::encode).unwrap_or(0.0))
            .collect()
    }
}
