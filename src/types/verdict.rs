//! Fused risk verdict: the canonical audit artifact

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::types::agent::{AgentId, AgentResult, AgentStatus, Attribution};

/// Discrete risk band, ordered by score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskBand {
    /// Determine band from score and thresholds
    pub fn from_score(score: f64, thresholds: &BandThresholds) -> Self {
        if score >= thresholds.critical {
            RiskBand::Critical
        } else if score >= thresholds.high {
            RiskBand::High
        } else if score >= thresholds.medium {
            RiskBand::Medium
        } else {
            RiskBand::Low
        }
    }

    /// Bands that open an escalation record
    pub fn warrants_escalation(&self) -> bool {
        matches!(self, RiskBand::High | RiskBand::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBand::Low => "low",
            RiskBand::Medium => "medium",
            RiskBand::High => "high",
            RiskBand::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower cut-points for each band above `Low`.
///
/// `[0, medium)` is Low, `[medium, high)` Medium, `[high, critical)` High and
/// `[critical, 1]` Critical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl BandThresholds {
    /// Cut-points must be strictly increasing inside (0, 1]
    pub fn validate(&self) -> Result<(), String> {
        let ordered = 0.0 < self.medium && self.medium < self.high && self.high < self.critical;
        if !ordered || self.critical > 1.0 {
            return Err(format!(
                "band thresholds must satisfy 0 < medium < high < critical <= 1, got {}/{}/{}",
                self.medium, self.high, self.critical
            ));
        }
        Ok(())
    }
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self {
            medium: 0.50,
            high: 0.70,
            critical: 0.85,
        }
    }
}

/// Which combination rule produced the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    /// Confidence-weighted mean of usable contributions
    ConfidenceWeighted,
    /// Every usable agent reported zero confidence; plain mean instead
    UnweightedMean,
    /// No agent produced a usable contribution
    NoUsableSignal,
}

impl FusionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionMethod::ConfidenceWeighted => "confidence_weighted",
            FusionMethod::UnweightedMean => "unweighted_mean",
            FusionMethod::NoUsableSignal => "no_usable_signal",
        }
    }
}

/// Fused output of one evaluation. Never partially populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub transaction_id: String,
    /// Final score in [0,1]
    pub score: f64,
    /// Score before the unusable-agent penalty
    pub base_score: f64,
    /// Multiplicative factor applied to `1 - base_score` (1.0 = no penalty)
    pub penalty_factor: f64,
    pub band: RiskBand,
    pub method: FusionMethod,
    /// One entry per agent, in invocation order
    pub agents: Vec<AgentResult>,
    /// Merged, de-duplicated, ranked top-K attributions
    pub attributions: Vec<Attribution>,
    pub vocabulary_version: String,
    /// Content fingerprint; stable across replays of the same verdict
    pub fingerprint: String,
}

impl RiskVerdict {
    pub fn agent(&self, id: AgentId) -> Option<&AgentResult> {
        self.agents.iter().find(|a| a.agent == id)
    }

    pub fn unusable_count(&self) -> usize {
        self.agents.iter().filter(|a| !a.is_usable()).count()
    }

    /// Recompute the fingerprint from content
    pub fn compute_fingerprint(&self) -> String {
        let view = FingerprintView {
            transaction_id: &self.transaction_id,
            score: self.score,
            band: self.band,
            method: self.method,
            vocabulary_version: &self.vocabulary_version,
            agents: self
                .agents
                .iter()
                .map(|a| AgentFingerprint {
                    agent: a.agent,
                    status: a.status,
                    contribution: a.contribution,
                    confidence: a.confidence,
                    attributions: &a.attributions,
                })
                .collect(),
            attributions: &self.attributions,
        };
        // Serializing plain structs of strings, floats and enums cannot fail.
        let bytes = serde_json::to_vec(&view).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

// Latency and free-text detail are excluded: a re-delivered verdict must
// fingerprint identically.
#[derive(Serialize)]
struct FingerprintView<'a> {
    transaction_id: &'a str,
    score: f64,
    band: RiskBand,
    method: FusionMethod,
    vocabulary_version: &'a str,
    agents: Vec<AgentFingerprint<'a>>,
    attributions: &'a [Attribution],
}

#[derive(Serialize)]
struct AgentFingerprint<'a> {
    agent: AgentId,
    status: AgentStatus,
    contribution: Option<f64>,
    confidence: f64,
    attributions: &'a [Attribution],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict() -> RiskVerdict {
        let mut verdict = RiskVerdict {
            transaction_id: "tx_1".to_string(),
            score: 0.72,
            base_score: 0.7,
            penalty_factor: 0.85,
            band: RiskBand::High,
            method: FusionMethod::ConfidenceWeighted,
            agents: vec![AgentResult::skipped(AgentId::DeepfakeDetection, "no media")],
            attributions: vec![],
            vocabulary_version: "fv-2".to_string(),
            fingerprint: String::new(),
        };
        verdict.fingerprint = verdict.compute_fingerprint();
        verdict
    }

    #[test]
    fn test_band_from_score() {
        let thresholds = BandThresholds::default();

        assert_eq!(RiskBand::from_score(0.1, &thresholds), RiskBand::Low);
        assert_eq!(RiskBand::from_score(0.5, &thresholds), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(0.75, &thresholds), RiskBand::High);
        assert_eq!(RiskBand::from_score(0.85, &thresholds), RiskBand::Critical);
        assert_eq!(RiskBand::from_score(1.0, &thresholds), RiskBand::Critical);
        assert!(RiskBand::Low < RiskBand::Critical);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(BandThresholds::default().validate().is_ok());
        let overlapping = BandThresholds {
            medium: 0.6,
            high: 0.6,
            critical: 0.9,
        };
        assert!(overlapping.validate().is_err());
        let out_of_range = BandThresholds {
            medium: 0.3,
            high: 0.6,
            critical: 1.2,
        };
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_fingerprint_ignores_latency() {
        let original = verdict();
        let mut redelivered = original.clone();
        redelivered.agents[0].latency_us = 999;
        redelivered.agents[0].detail = Some("different wording".to_string());
        assert_eq!(original.fingerprint, redelivered.compute_fingerprint());

        let mut changed = original.clone();
        changed.score = 0.73;
        assert_ne!(original.fingerprint, changed.compute_fingerprint());
    }

    #[test]
    fn test_verdict_serialization() {
        let original = verdict();
        let json = serde_json::to_string(&original).unwrap();
        let deserialized: RiskVerdict = serde_json::from_str(&json).unwrap();

        assert_eq!(original.band, deserialized.band);
        assert_eq!(original.fingerprint, deserialized.fingerprint);
        assert!(json.contains("\"confidence_weighted\""));
    }
}
